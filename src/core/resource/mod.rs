//! Declared resources
//!
//! A [`Resource`] is a logical name, a typed body and explicit ordering edges. The
//! body's string fields may embed references to other resources' computed
//! attributes. Rendering substitutes them once the targets are materialized.
//!
//! The persisted form is [`DeclaredResource`]:
//!
//! ```json
//! { "type": "bucket_policy", "name": "site_public_read",
//!   "config": { "bucket": "${site.id}", "policy": { ... } },
//!   "outputs": ["id"], "depends_on": [] }
//! ```

pub mod delivery;
pub mod identity;
pub mod storage;

pub use delivery::{
    ActionCategory, ArtifactStore, BuildEnvironment, BuildProject, DeliveryPipeline, Stage,
    StageAction,
};
pub use identity::{Identity, IdentityLifecycle, IdentityState, InlinePolicy, PolicyAttachment};
pub use storage::{BucketPolicy, CannedAcl, StorageBucket, WebsiteConfig};

use crate::core::template::{collect_references, render_value, Deferred, Reference};
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Resource type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    BucketPolicy,
    Identity,
    PolicyAttachment,
    BuildProject,
    DeliveryPipeline,
}

impl ResourceKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::BucketPolicy => "bucket_policy",
            ResourceKind::Identity => "identity",
            ResourceKind::PolicyAttachment => "policy_attachment",
            ResourceKind::BuildProject => "build_project",
            ResourceKind::DeliveryPipeline => "delivery_pipeline",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "bucket" => ResourceKind::Bucket,
            "bucket_policy" => ResourceKind::BucketPolicy,
            "identity" => ResourceKind::Identity,
            "policy_attachment" => ResourceKind::PolicyAttachment,
            "build_project" => ResourceKind::BuildProject,
            "delivery_pipeline" => ResourceKind::DeliveryPipeline,
            _ => return None,
        })
    }

    /// Attributes available for reference once materialized
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Bucket => &["id", "arn", "bucket_domain_name", "website_endpoint"],
            ResourceKind::BucketPolicy | ResourceKind::PolicyAttachment => &["id"],
            ResourceKind::Identity | ResourceKind::BuildProject => &["id", "arn", "name"],
            ResourceKind::DeliveryPipeline => &["id", "arn"],
        }
    }

    pub fn exports(&self, attribute: &str) -> bool {
        self.outputs().contains(&attribute)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Typed configuration of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceBody {
    Bucket(StorageBucket),
    BucketPolicy(BucketPolicy),
    Identity(Identity),
    PolicyAttachment(PolicyAttachment),
    BuildProject(BuildProject),
    DeliveryPipeline(DeliveryPipeline),
}

impl ResourceBody {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceBody::Bucket(_) => ResourceKind::Bucket,
            ResourceBody::BucketPolicy(_) => ResourceKind::BucketPolicy,
            ResourceBody::Identity(_) => ResourceKind::Identity,
            ResourceBody::PolicyAttachment(_) => ResourceKind::PolicyAttachment,
            ResourceBody::BuildProject(_) => ResourceKind::BuildProject,
            ResourceBody::DeliveryPipeline(_) => ResourceKind::DeliveryPipeline,
        }
    }

    fn validate(&self, name: &LogicalName) -> Result<()> {
        match self {
            ResourceBody::Bucket(b) => b.validate(name),
            ResourceBody::BucketPolicy(b) => b.validate(name),
            ResourceBody::Identity(b) => b.validate(name),
            ResourceBody::PolicyAttachment(b) => b.validate(name),
            ResourceBody::BuildProject(b) => b.validate(name),
            ResourceBody::DeliveryPipeline(b) => b.validate(name),
        }
    }

    fn to_config(&self) -> Result<serde_json::Value> {
        Ok(match self {
            ResourceBody::Bucket(b) => serde_json::to_value(b)?,
            ResourceBody::BucketPolicy(b) => serde_json::to_value(b)?,
            ResourceBody::Identity(b) => serde_json::to_value(b)?,
            ResourceBody::PolicyAttachment(b) => serde_json::to_value(b)?,
            ResourceBody::BuildProject(b) => serde_json::to_value(b)?,
            ResourceBody::DeliveryPipeline(b) => serde_json::to_value(b)?,
        })
    }

    pub(crate) fn from_config(kind: ResourceKind, config: serde_json::Value) -> Result<Self> {
        Ok(match kind {
            ResourceKind::Bucket => ResourceBody::Bucket(serde_json::from_value(config)?),
            ResourceKind::BucketPolicy => ResourceBody::BucketPolicy(serde_json::from_value(config)?),
            ResourceKind::Identity => ResourceBody::Identity(serde_json::from_value(config)?),
            ResourceKind::PolicyAttachment => {
                ResourceBody::PolicyAttachment(serde_json::from_value(config)?)
            }
            ResourceKind::BuildProject => ResourceBody::BuildProject(serde_json::from_value(config)?),
            ResourceKind::DeliveryPipeline => {
                ResourceBody::DeliveryPipeline(serde_json::from_value(config)?)
            }
        })
    }
}

macro_rules! body_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for ResourceBody {
            fn from(value: $ty) -> Self {
                ResourceBody::$variant(value)
            }
        })*
    };
}

body_from!(
    Bucket(StorageBucket),
    BucketPolicy(BucketPolicy),
    Identity(Identity),
    PolicyAttachment(PolicyAttachment),
    BuildProject(BuildProject),
    DeliveryPipeline(DeliveryPipeline),
);

/// A declared resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    name: LogicalName,
    body: ResourceBody,
    depends_on: BTreeSet<LogicalName>,
    config: serde_json::Value,
    references: Vec<Reference>,
}

impl Resource {
    /// Declare and validate a resource
    pub fn new(name: LogicalName, body: impl Into<ResourceBody>) -> Result<Self> {
        let body = body.into();
        body.validate(&name)?;
        let config = body.to_config()?;
        let mut references = Vec::new();
        collect_references(&config, &mut references)?;
        Ok(Resource {
            name,
            body,
            depends_on: BTreeSet::new(),
            config,
            references,
        })
    }

    /// Add an explicit ordering edge
    pub fn depends_on(mut self, other: &LogicalName) -> Self {
        self.depends_on.insert(other.clone());
        self
    }

    pub fn name(&self) -> &LogicalName {
        &self.name
    }

    pub fn body(&self) -> &ResourceBody {
        &self.body
    }

    pub fn kind(&self) -> ResourceKind {
        self.body.kind()
    }

    /// Explicit ordering edges
    pub fn explicit_dependencies(&self) -> &BTreeSet<LogicalName> {
        &self.depends_on
    }

    /// References embedded in the configuration
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Every resource this one must come after
    pub fn dependencies(&self) -> BTreeSet<LogicalName> {
        self.references
            .iter()
            .map(|r| r.resource.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }

    /// Substitute references, or report the first one whose target is missing
    pub fn render<F>(&self, lookup: F) -> std::result::Result<RenderedResource, Deferred>
    where
        F: Fn(&Reference) -> Option<String>,
    {
        let config = render_value(&self.config, &lookup)?;
        Ok(RenderedResource::new(self.name.clone(), self.kind(), config))
    }

    /// Persisted form
    pub fn to_declared(&self) -> DeclaredResource {
        DeclaredResource {
            kind: self.kind().tag().to_string(),
            name: self.name.to_string(),
            config: self.config.clone(),
            outputs: self.kind().outputs().iter().map(|s| s.to_string()).collect(),
            depends_on: self.depends_on.iter().map(ToString::to_string).collect(),
        }
    }

    /// Parse and validate a persisted resource
    pub fn from_declared(declared: DeclaredResource) -> Result<Self> {
        let name = LogicalName::new(declared.name)?;
        let kind = ResourceKind::from_tag(&declared.kind).ok_or_else(|| PlanError::InvalidResource {
            name: name.clone(),
            reason: format!("unknown resource type '{}'", declared.kind),
        })?;
        if let Some(output) = declared.outputs.iter().find(|o| !kind.exports(o)) {
            return Err(PlanError::InvalidResource {
                name,
                reason: format!("type '{}' does not export '{}'", kind, output),
            });
        }

        let body = ResourceBody::from_config(kind, declared.config)?;
        let mut resource = Resource::new(name, body)?;
        for dep in declared.depends_on {
            resource.depends_on.insert(LogicalName::new(dep)?);
        }
        Ok(resource)
    }
}

/// Serialized resource declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// A resource with every reference substituted, ready for the provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedResource {
    pub name: LogicalName,
    pub kind: ResourceKind,
    pub config: serde_json::Value,
    /// SHA-256 over kind and canonical config
    pub fingerprint: String,
}

impl RenderedResource {
    fn new(name: LogicalName, kind: ResourceKind, config: serde_json::Value) -> Self {
        let fingerprint = fingerprint(kind, &config);
        RenderedResource {
            name,
            kind,
            config,
            fingerprint,
        }
    }

    /// Decode the rendered config into its typed body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.config.clone())?)
    }

    /// Decode the rendered config according to its kind
    pub fn body(&self) -> Result<ResourceBody> {
        ResourceBody::from_config(self.kind, self.config.clone())
    }
}

/// Hex SHA-256 of the kind tag and canonical JSON config
///
/// `serde_json` maps are sorted by key, so equal configs hash equally.
pub fn fingerprint(kind: ResourceKind, config: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.tag().as_bytes());
    hasher.update([0u8]);
    hasher.update(config.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
