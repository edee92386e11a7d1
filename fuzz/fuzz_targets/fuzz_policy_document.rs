#![no_main]
use libfuzzer_sys::fuzz_target;
use siteplan::{DocumentPurpose, PolicyDocument};

// Malformed policy JSON must be rejected, never panic
fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(document) = PolicyDocument::from_json(json) else {
        return;
    };

    for purpose in [
        DocumentPurpose::Identity,
        DocumentPurpose::Trust,
        DocumentPurpose::Resource,
    ] {
        let _ = document.validate(purpose);
    }

    // Whatever parsed must serialize and parse back to the same document
    let encoded = document.to_json().expect("parsed documents serialize");
    let reparsed = PolicyDocument::from_json(&encoded).expect("serialized documents parse");
    assert_eq!(document, reparsed);
});
