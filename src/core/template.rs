//! References and interpolated attribute templates
//!
//! A [`Reference`] points at a computed attribute of another resource, e.g. the
//! ARN of a bucket that only exists after materialization. Configuration fields that
//! may contain references are [`Template`]s: text with `${name.attribute}`
//! interpolations, such as `${site.arn}/*`.

use crate::core::validation::{LogicalName, NAME_CHARS};
use crate::error::{PlanError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\$\{{({NAME_CHARS})\.([A-Za-z][A-Za-z0-9_]*)\}}"))
            .expect("static pattern")
    })
}

/// A dependency edge to another resource's computed attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Resource that exposes the attribute
    pub resource: LogicalName,
    /// Attribute name (e.g. `arn`, `website_endpoint`)
    pub attribute: String,
}

impl Reference {
    pub fn new(resource: &LogicalName, attribute: impl Into<String>) -> Self {
        Reference {
            resource: resource.clone(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Resolution of a template hit a reference whose target is not materialized yet.
///
/// Not an error: the caller retries once the target exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred(pub Reference);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Segment {
    Text(String),
    Ref(Reference),
}

/// Text with embedded references
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// A template without references
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Template::default();
        }
        Template {
            segments: vec![Segment::Text(text)],
        }
    }

    /// A template that is exactly one reference
    pub fn reference(reference: Reference) -> Self {
        Template {
            segments: vec![Segment::Ref(reference)],
        }
    }

    /// Shorthand for `${resource.attribute}`
    pub fn attr(resource: &LogicalName, attribute: &str) -> Self {
        Template::reference(Reference::new(resource, attribute))
    }

    /// Parse `${name.attribute}` interpolations out of a string
    ///
    /// ```
    /// use siteplan::Template;
    ///
    /// let t = Template::parse("${site.arn}/*").unwrap();
    /// assert_eq!(t.references().count(), 1);
    /// assert_eq!(t.to_string(), "${site.arn}/*");
    ///
    /// assert!(Template::parse("${site}").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in reference_regex().captures_iter(input) {
            let whole = caps.get(0).expect("group 0 always matches");
            push_text(&mut segments, input, last, whole.start())?;
            let resource = LogicalName::new(&caps[1]).map_err(|e| PlanError::InvalidTemplate {
                template: input.to_string(),
                reason: e.to_string(),
            })?;
            segments.push(Segment::Ref(Reference {
                resource,
                attribute: caps[2].to_string(),
            }));
            last = whole.end();
        }
        push_text(&mut segments, input, last, input.len())?;

        Ok(Template { segments })
    }

    /// All references in order of appearance
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Ref(r) => Some(r),
            Segment::Text(_) => None,
        })
    }

    /// True when the template has no references
    pub fn is_literal(&self) -> bool {
        self.references().next().is_none()
    }

    /// The text of a reference-free template
    pub fn as_literal(&self) -> Option<String> {
        if !self.is_literal() {
            return None;
        }
        Some(self.to_string())
    }

    /// True if the template starts with a reference (its address is anchored to a
    /// concrete resource rather than free text)
    pub fn starts_with_reference(&self) -> bool {
        matches!(self.segments.first(), Some(Segment::Ref(_)))
    }

    /// Literal text before the first reference
    pub fn leading_text(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Text(t)) => t,
            _ => "",
        }
    }

    /// Append literal text, e.g. `/*` for object-level addresses
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut out = self.clone();
        if suffix.is_empty() {
            return out;
        }
        match out.segments.last_mut() {
            Some(Segment::Text(t)) => t.push_str(suffix),
            _ => out.segments.push(Segment::Text(suffix.to_string())),
        }
        out
    }

    /// Substitute every reference through `lookup`
    pub fn render<F>(&self, lookup: F) -> std::result::Result<String, Deferred>
    where
        F: Fn(&Reference) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Ref(r) => match lookup(r) {
                    Some(value) => out.push_str(&value),
                    None => return Err(Deferred(r.clone())),
                },
            }
        }
        Ok(out)
    }
}

fn push_text(segments: &mut Vec<Segment>, input: &str, start: usize, end: usize) -> Result<()> {
    if start >= end {
        return Ok(());
    }
    let text = &input[start..end];
    if text.contains("${") {
        return Err(PlanError::InvalidTemplate {
            template: input.to_string(),
            reason: "malformed reference, expected ${name.attribute}".to_string(),
        });
    }
    segments.push(Segment::Text(text.to_string()));
    Ok(())
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => write!(f, "{}", t)?,
                Segment::Ref(r) => write!(f, "${{{}}}", r)?,
            }
        }
        Ok(())
    }
}

impl From<Reference> for Template {
    fn from(value: Reference) -> Self {
        Template::reference(value)
    }
}

impl Serialize for Template {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Template::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Collect references from every string inside a JSON value
pub(crate) fn collect_references(value: &serde_json::Value, out: &mut Vec<Reference>) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                out.extend(Template::parse(s)?.references().cloned());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(item, out)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_references(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace every reference inside a JSON value with its resolved value
pub(crate) fn render_value<F>(
    value: &serde_json::Value,
    lookup: &F,
) -> std::result::Result<serde_json::Value, Deferred>
where
    F: Fn(&Reference) -> Option<String>,
{
    Ok(match value {
        serde_json::Value::String(s) if s.contains("${") => {
            // Strings were validated when the declaration was built.
            match Template::parse(s) {
                Ok(t) => serde_json::Value::String(t.render(lookup)?),
                Err(_) => value.clone(),
            }
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| render_value(v, lookup))
                .collect::<std::result::Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, lookup)?);
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> LogicalName {
        LogicalName::new(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let t = Template::parse("arn:aws:s3:::${site.id}/*").unwrap();
        assert_eq!(t.to_string(), "arn:aws:s3:::${site.id}/*");
        assert_eq!(t.leading_text(), "arn:aws:s3:::");
        assert!(!t.starts_with_reference());

        let refs: Vec<_> = t.references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resource.as_str(), "site");
        assert_eq!(refs[0].attribute, "id");
    }

    #[test]
    fn test_literal() {
        let t = Template::parse("index.html").unwrap();
        assert!(t.is_literal());
        assert_eq!(t.as_literal().as_deref(), Some("index.html"));
        assert_eq!(Template::literal("").to_string(), "");
    }

    #[test]
    fn test_malformed_reference() {
        assert!(Template::parse("${site}").is_err());
        assert!(Template::parse("${site.arn").is_err());
        assert!(Template::parse("prefix ${1site.arn}").is_err());
    }

    #[test]
    fn test_render() {
        let t = Template::attr(&name("site"), "arn").with_suffix("/*");
        let rendered = t
            .render(|r| (r.attribute == "arn").then(|| "arn:aws:s3:::my-site".to_string()))
            .unwrap();
        assert_eq!(rendered, "arn:aws:s3:::my-site/*");

        let deferred = t.render(|_| None).unwrap_err();
        assert_eq!(deferred.0.resource.as_str(), "site");
    }

    #[test]
    fn test_value_walk() {
        let value = serde_json::json!({
            "role": "${build_role.name}",
            "nested": ["${site.arn}", "${site.arn}/*", "plain"],
        });
        let mut refs = Vec::new();
        collect_references(&value, &mut refs).unwrap();
        assert_eq!(refs.len(), 3);

        let rendered = render_value(&value, &|r: &Reference| Some(format!("<{}>", r))).unwrap();
        assert_eq!(rendered["role"], "<build_role.name>");
        assert_eq!(rendered["nested"][1], "<site.arn>/*");
        assert_eq!(rendered["nested"][2], "plain");
    }

    #[test]
    fn test_serde_roundtrip() {
        let t = Template::parse("${pipeline_role.arn}").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"${pipeline_role.arn}\"");
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
