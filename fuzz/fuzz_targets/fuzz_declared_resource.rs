#![no_main]
use libfuzzer_sys::fuzz_target;
use siteplan::{DeclaredResource, Resource};

fuzz_target!(|data: &[u8]| {
    let Ok(declared) = serde_json::from_slice::<DeclaredResource>(data) else {
        return;
    };
    let Ok(resource) = Resource::from_declared(declared) else {
        return;
    };

    // Accepted resources survive the persisted form unchanged
    let again = Resource::from_declared(resource.to_declared()).expect("round trip");
    assert_eq!(resource.name(), again.name());
    assert_eq!(resource.kind(), again.kind());
    assert_eq!(resource.dependencies(), again.dependencies());
});
