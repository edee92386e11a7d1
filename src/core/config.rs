//! Plan and site configuration
//!
//! Provider settings (region, account, partition) are an explicit immutable value
//! handed to the plan at build time. The site settings describe the one website
//! and delivery pipeline the blueprint declares.
//!
//! # Example
//!
//! ```toml
//! [provider]
//! region = "us-east-1"
//! account_id = "123456789012"
//!
//! [site]
//! project = "docs-site"
//! bucket_name = "docs.example.com"
//! ```

use crate::core::validation::{
    validate_account_id, validate_bucket_name, validate_logical_name, validate_region,
};
use crate::error::{PlanError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use validator::Validate;

/// Provider settings for one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PlanConfig {
    /// Declaration format version
    #[serde(default = "default_format_version")]
    pub format_version: Version,

    /// Provider identifier
    #[serde(default = "default_provider")]
    #[validate(length(min = 1))]
    pub provider: String,

    /// Target region (e.g. "us-east-1")
    #[validate(custom(function = "validate_region"))]
    pub region: String,

    /// 12-digit account id used in ARNs
    #[validate(custom(function = "validate_account_id"))]
    pub account_id: String,

    /// ARN partition
    #[serde(default = "default_partition")]
    #[validate(length(min = 1))]
    pub partition: String,

    /// Tags applied to every taggable resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn default_format_version() -> Version {
    Version::new(1, 0, 0)
}

fn default_provider() -> String {
    "aws".to_string()
}

fn default_partition() -> String {
    "aws".to_string()
}

impl PlanConfig {
    /// Create a config for `region` and `account_id` with defaults elsewhere
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        PlanConfig {
            format_version: default_format_version(),
            provider: default_provider(),
            region: region.into(),
            account_id: account_id.into(),
            partition: default_partition(),
            tags: BTreeMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Validate all fields and the format version
    pub fn check(&self) -> Result<()> {
        if self.format_version.major != 1 {
            return Err(PlanError::UnsupportedVersion(self.format_version.clone()));
        }
        self.validate()
            .map_err(|e| PlanError::InvalidConfig(e.to_string()))
    }

    /// Build an ARN in this partition
    ///
    /// Global services (S3 buckets, IAM) pass `regional = false` to leave the region
    /// and account fields as the service expects.
    pub fn arn(&self, service: &str, regional: bool, with_account: bool, resource: &str) -> String {
        let region = if regional { self.region.as_str() } else { "" };
        let account = if with_account { self.account_id.as_str() } else { "" };
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition, service, region, account, resource
        )
    }

    pub fn bucket_arn(&self, bucket: &str) -> String {
        self.arn("s3", false, false, bucket)
    }

    pub fn role_arn(&self, role: &str) -> String {
        self.arn("iam", false, true, &format!("role/{}", role))
    }

    pub fn build_project_arn(&self, project: &str) -> String {
        self.arn("codebuild", true, true, &format!("project/{}", project))
    }

    pub fn pipeline_arn(&self, pipeline: &str) -> String {
        self.arn("codepipeline", true, true, pipeline)
    }

    pub fn log_group_arn(&self, log_group: &str) -> String {
        self.arn("logs", true, true, &format!("log-group:{}", log_group))
    }

    /// Website endpoint host of a bucket in this region
    pub fn website_endpoint(&self, bucket: &str) -> String {
        format!("{}.s3-website-{}.amazonaws.com", bucket, self.region)
    }

    /// Name prefix of the artifact buckets the pipeline service creates on demand
    pub fn artifact_bucket_prefix(&self) -> String {
        format!("codepipeline-{}-", self.region)
    }
}

/// How the site bucket is made world-readable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublicReadMechanism {
    /// Canned `public-read` ACL on the bucket
    Acl,
    /// Bucket policy granting `s3:GetObject` to everyone
    #[default]
    BucketPolicy,
}

/// Build environment for the build stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BuildSettings {
    #[serde(default = "default_image")]
    #[validate(length(min = 1))]
    pub image: String,

    #[serde(default = "default_compute_type")]
    #[validate(length(min = 1))]
    pub compute_type: String,

    /// Buildspec path in the source or inline buildspec
    #[serde(default = "default_buildspec")]
    #[validate(length(min = 1))]
    pub buildspec: String,
}

fn default_image() -> String {
    "aws/codebuild/standard:7.0".to_string()
}

fn default_compute_type() -> String {
    "BUILD_GENERAL1_SMALL".to_string()
}

fn default_buildspec() -> String {
    "buildspec.yml".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings {
            image: default_image(),
            compute_type: default_compute_type(),
            buildspec: default_buildspec(),
        }
    }
}

/// The website and its delivery pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SiteConfig {
    /// Project name; prefixes role, build project and pipeline names
    #[validate(length(max = 40), custom(function = "validate_logical_name"))]
    pub project: String,

    /// Name of the bucket that serves the site
    #[validate(custom(function = "validate_bucket_name"))]
    pub bucket_name: String,

    #[serde(default = "default_index_document")]
    #[validate(length(min = 1))]
    pub index_document: String,

    #[serde(default = "default_error_document")]
    pub error_document: Option<String>,

    #[serde(default)]
    pub public_read: PublicReadMechanism,

    /// Allow destroying the bucket while it still holds objects
    #[serde(default)]
    pub force_destroy: bool,

    #[serde(default)]
    #[validate(nested)]
    pub build: BuildSettings,
}

fn default_index_document() -> String {
    "index.html".to_string()
}

fn default_error_document() -> Option<String> {
    Some("error.html".to_string())
}

impl SiteConfig {
    pub fn new(project: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        SiteConfig {
            project: project.into(),
            bucket_name: bucket_name.into(),
            index_document: default_index_document(),
            error_document: default_error_document(),
            public_read: PublicReadMechanism::default(),
            force_destroy: false,
            build: BuildSettings::default(),
        }
    }

    pub fn with_public_read(mut self, mechanism: PublicReadMechanism) -> Self {
        self.public_read = mechanism;
        self
    }

    pub fn with_force_destroy(mut self, force_destroy: bool) -> Self {
        self.force_destroy = force_destroy;
        self
    }

    pub fn with_error_document(mut self, error_document: Option<String>) -> Self {
        self.error_document = error_document;
        self
    }

    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| PlanError::InvalidConfig(e.to_string()))
    }
}

/// A settings file: provider plus site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub provider: PlanConfig,
    pub site: SiteConfig,
}

impl Settings {
    /// Parse and validate TOML settings
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(input)?;
        settings.provider.check()?;
        settings.site.check()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
