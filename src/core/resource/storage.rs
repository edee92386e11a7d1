//! Website bucket and bucket policy

use crate::core::iam::{DocumentPurpose, PolicyDocument};
use crate::core::template::Template;
use crate::core::validation::{BucketName, LogicalName};
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canned bucket ACL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CannedAcl {
    #[default]
    Private,
    /// Every object is world-readable
    PublicRead,
}

/// Website serving mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteConfig {
    pub index_document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_document: Option<String>,
}

impl WebsiteConfig {
    pub fn new(index_document: impl Into<String>) -> Self {
        WebsiteConfig {
            index_document: index_document.into(),
            error_document: None,
        }
    }

    pub fn with_error_document(mut self, error_document: impl Into<String>) -> Self {
        self.error_document = Some(error_document.into());
        self
    }

    fn validate(&self, name: &LogicalName) -> Result<()> {
        check_document(name, "index document", &self.index_document)?;
        if let Some(error) = &self.error_document {
            check_document(name, "error document", error)?;
        }
        Ok(())
    }
}

fn check_document(name: &LogicalName, what: &str, key: &str) -> Result<()> {
    if key.is_empty() || key.contains('/') {
        return Err(PlanError::InvalidResource {
            name: name.clone(),
            reason: format!("{} '{}' must be a non-empty key suffix without '/'", what, key),
        });
    }
    Ok(())
}

/// An object-storage bucket, optionally serving a website
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBucket {
    pub bucket: BucketName,
    #[serde(default)]
    pub acl: CannedAcl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<WebsiteConfig>,
    #[serde(default)]
    pub force_destroy: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl StorageBucket {
    pub fn new(bucket: BucketName) -> Self {
        StorageBucket {
            bucket,
            acl: CannedAcl::Private,
            website: None,
            force_destroy: false,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_website(mut self, website: WebsiteConfig) -> Self {
        self.website = Some(website);
        self
    }

    pub fn with_acl(mut self, acl: CannedAcl) -> Self {
        self.acl = acl;
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_public_read(&self) -> bool {
        self.acl == CannedAcl::PublicRead
    }

    pub(crate) fn validate(&self, name: &LogicalName) -> Result<()> {
        if let Some(website) = &self.website {
            website.validate(name)?;
        }
        Ok(())
    }
}

/// A resource policy attached to a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPolicy {
    /// Bucket id, normally `${bucket.id}`
    pub bucket: Template,
    pub policy: PolicyDocument,
}

impl BucketPolicy {
    pub fn new(bucket: Template, policy: PolicyDocument) -> Self {
        BucketPolicy { bucket, policy }
    }

    /// Logical name of the bucket this policy is attached to, when given by reference
    pub fn target(&self) -> Option<&LogicalName> {
        self.bucket.references().next().map(|r| &r.resource)
    }

    pub(crate) fn validate(&self, name: &LogicalName) -> Result<()> {
        if self.bucket.to_string().is_empty() {
            return Err(PlanError::InvalidResource {
                name: name.clone(),
                reason: "bucket policy needs a bucket".to_string(),
            });
        }
        self.policy.validate(DocumentPurpose::Resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> LogicalName {
        LogicalName::new("site").unwrap()
    }

    #[test]
    fn test_website_documents() {
        let bucket = StorageBucket::new(BucketName::new("docs.example.com").unwrap())
            .with_website(WebsiteConfig::new("index.html").with_error_document("error.html"));
        assert!(bucket.validate(&name()).is_ok());

        let nested = StorageBucket::new(BucketName::new("docs.example.com").unwrap())
            .with_website(WebsiteConfig::new("docs/index.html"));
        assert!(matches!(
            nested.validate(&name()),
            Err(PlanError::InvalidResource { .. })
        ));

        let empty = StorageBucket::new(BucketName::new("docs.example.com").unwrap())
            .with_website(WebsiteConfig::new(""));
        assert!(empty.validate(&name()).is_err());
    }

    #[test]
    fn test_acl_serde() {
        let bucket = StorageBucket::new(BucketName::new("docs.example.com").unwrap())
            .with_acl(CannedAcl::PublicRead);
        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["acl"], "public-read");
        assert!(bucket.is_public_read());

        let back: StorageBucket = serde_json::from_value(json).unwrap();
        assert_eq!(back, bucket);
    }

    #[test]
    fn test_bucket_policy_target() {
        let policy = PolicyDocument::from_json(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":"*","Action":"s3:GetObject","Resource":"${site.arn}/*"}]}"#,
        )
        .unwrap();
        let bp = BucketPolicy::new(Template::parse("${site.id}").unwrap(), policy);
        assert_eq!(bp.target().map(LogicalName::as_str), Some("site"));
        assert!(bp.validate(&LogicalName::new("site_policy").unwrap()).is_ok());
    }
}
