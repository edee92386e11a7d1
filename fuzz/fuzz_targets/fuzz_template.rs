#![no_main]
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};
use siteplan::Template;

#[derive(Debug, Arbitrary)]
struct Input {
    text: String,
    value: String,
}

fuzz_target!(|input: Input| {
    let Ok(template) = Template::parse(&input.text) else {
        return;
    };
    assert_eq!(Template::parse(&template.to_string()).ok(), Some(template.clone()));

    // Rendering with every reference answered never defers
    let rendered = template.render(|_| Some(input.value.clone()));
    assert!(rendered.is_ok());
});
