//! Exported outputs
//!
//! Outputs are templates over resource attributes, resolved from state after a
//! successful apply. They are read-only values for downstream tooling.

use crate::core::template::{Reference, Template};
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declared output value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: LogicalName,
    pub value: Template,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutputDecl {
    pub fn new(name: LogicalName, value: Template) -> Self {
        OutputDecl {
            name,
            value,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Resolved output values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Exports {
    values: BTreeMap<LogicalName, String>,
}

impl Exports {
    /// Resolve every output through `lookup`
    ///
    /// # Errors
    ///
    /// Returns `Unresolved` with the first reference `lookup` cannot answer.
    pub fn resolve<F>(outputs: &[OutputDecl], lookup: F) -> Result<Self>
    where
        F: Fn(&Reference) -> Option<String>,
    {
        let mut values = BTreeMap::new();
        for output in outputs {
            let value = output
                .value
                .render(&lookup)
                .map_err(|deferred| PlanError::Unresolved(deferred.0))?;
            values.insert(output.name.clone(), value);
        }
        Ok(Exports { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogicalName, &str)> {
        self.values.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(name: &str, value: &str) -> OutputDecl {
        OutputDecl::new(LogicalName::new(name).unwrap(), Template::parse(value).unwrap())
    }

    #[test]
    fn test_resolve() {
        let outputs = vec![
            output("website_endpoint", "http://${site.website_endpoint}"),
            output("bucket_id", "${site.id}"),
        ];
        let exports = Exports::resolve(&outputs, |r| match r.attribute.as_str() {
            "website_endpoint" => Some("docs.s3-website-us-east-1.amazonaws.com".to_string()),
            "id" => Some("docs".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            exports.get("website_endpoint"),
            Some("http://docs.s3-website-us-east-1.amazonaws.com")
        );
        assert_eq!(exports.get("bucket_id"), Some("docs"));
        assert_eq!(exports.len(), 2);

        let json: serde_json::Value = serde_json::from_str(&exports.to_json().unwrap()).unwrap();
        assert_eq!(json["bucket_id"], "docs");
    }

    #[test]
    fn test_unresolved() {
        let outputs = vec![output("role", "${build_role.arn}")];
        let err = Exports::resolve(&outputs, |_| None).unwrap_err();
        assert!(matches!(err, PlanError::Unresolved(r) if r.to_string() == "build_role.arn"));
    }
}
