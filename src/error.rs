//! Error types for plan construction and materialization

use crate::core::template::Reference;
use crate::core::validation::LogicalName;
use thiserror::Error;

/// Plan result type
pub type Result<T> = std::result::Result<T, PlanError>;

/// Errors detected while declaring, validating or building a plan.
///
/// Every variant aborts the plan before any resource is materialized.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Invalid logical name: {0}")]
    InvalidName(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported format version: {0} (supported: 1.x)")]
    UnsupportedVersion(semver::Version),

    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Invalid policy document: {0}")]
    InvalidPolicy(String),

    #[error("Statement grants '{action}' on unrestricted resource '*'")]
    UnrestrictedResource { action: String },

    #[error("Unscoped wildcard resource pattern: {0}")]
    UnscopedWildcard(String),

    #[error("No resource target for action '{0}'")]
    NoTargetForAction(String),

    #[error("Trust statement must name exactly one service principal (found {0})")]
    TrustPrincipalCount(usize),

    #[error("Invalid resource '{name}': {reason}")]
    InvalidResource { name: LogicalName, reason: String },

    #[error("Duplicate logical name: {0}")]
    DuplicateName(LogicalName),

    #[error("'{from}' references undeclared resource '{to}'")]
    UnknownResource { from: LogicalName, to: LogicalName },

    #[error("'{from}' references attribute '{reference}' which is not exported")]
    UnknownAttribute { from: LogicalName, reference: Reference },

    #[error("Dependency cycle between: {}", format_cycle(.0))]
    Cycle(Vec<LogicalName>),

    #[error("Identity '{identity}' has more than one permission document: {}", join_names(.documents))]
    MultiplePermissionDocuments {
        identity: LogicalName,
        documents: Vec<LogicalName>,
    },

    #[error("Identity '{identity}' cannot move from {from} to {to}")]
    InvalidTransition {
        identity: LogicalName,
        from: String,
        to: String,
    },

    #[error("Bucket '{bucket}' grants public read through both its ACL and policy '{policy}'")]
    ConflictingPublicRead {
        bucket: LogicalName,
        policy: LogicalName,
    },

    #[error("Unresolved reference: {0}")]
    Unresolved(Reference),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlanError {
    /// True for errors in the shape of the graph itself (as opposed to a bad field).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PlanError::DuplicateName(_)
                | PlanError::UnknownResource { .. }
                | PlanError::UnknownAttribute { .. }
                | PlanError::Cycle(_)
                | PlanError::MultiplePermissionDocuments { .. }
                | PlanError::ConflictingPublicRead { .. }
        )
    }
}

fn format_cycle(names: &[LogicalName]) -> String {
    names
        .iter()
        .map(LogicalName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn join_names(names: &[LogicalName]) -> String {
    names
        .iter()
        .map(LogicalName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures reported by the external provisioning engine, surfaced verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider API error: {0}")]
    Api(String),
}
