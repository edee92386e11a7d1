//! Identities, policy attachments and the identity lifecycle
//!
//! An identity moves through `Declared -> TrustBound -> PermissionBound -> Active`.
//! Trust is part of creation. The permission document comes either inline or from
//! exactly one [`PolicyAttachment`]; a second source is rejected, never merged.

use crate::core::iam::{DocumentPurpose, PolicyDocument};
use crate::core::template::Template;
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn role_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w+=,.@-]{1,64}$").expect("static pattern"))
}

/// Permission document embedded in the identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlinePolicy {
    pub name: String,
    pub document: PolicyDocument,
}

/// An executable principal assumed by an external service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub role_name: String,
    /// Assume-role document naming one service principal
    pub trust: PolicyDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_policy: Option<InlinePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Identity {
    /// Identity trusting one service
    pub fn assumed_by(role_name: impl Into<String>, service: &str) -> Result<Self> {
        Ok(Identity {
            role_name: role_name.into(),
            trust: PolicyDocument::trust(service)?,
            inline_policy: None,
            description: None,
        })
    }

    pub fn with_inline_policy(mut self, name: impl Into<String>, document: PolicyDocument) -> Self {
        self.inline_policy = Some(InlinePolicy {
            name: name.into(),
            document,
        });
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn trusted_service(&self) -> Option<&str> {
        self.trust.trusted_service()
    }

    pub(crate) fn validate(&self, name: &LogicalName) -> Result<()> {
        if !role_name_regex().is_match(&self.role_name) {
            return Err(PlanError::InvalidResource {
                name: name.clone(),
                reason: format!("invalid role name '{}'", self.role_name),
            });
        }
        self.trust.validate(DocumentPurpose::Trust)?;
        if let Some(inline) = &self.inline_policy {
            check_policy_name(name, &inline.name)?;
            inline.document.validate(DocumentPurpose::Identity)?;
        }
        Ok(())
    }
}

fn check_policy_name(name: &LogicalName, policy_name: &str) -> Result<()> {
    if !role_name_regex().is_match(policy_name) {
        return Err(PlanError::InvalidResource {
            name: name.clone(),
            reason: format!("invalid policy name '{}'", policy_name),
        });
    }
    Ok(())
}

/// Binds a permission document to an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAttachment {
    /// Role name of the identity, normally `${identity.name}`
    pub role: Template,
    pub policy_name: String,
    pub policy: PolicyDocument,
}

impl PolicyAttachment {
    pub fn new(role: Template, policy_name: impl Into<String>, policy: PolicyDocument) -> Self {
        PolicyAttachment {
            role,
            policy_name: policy_name.into(),
            policy,
        }
    }

    /// Logical name of the identity this attachment binds to
    pub fn target(&self) -> Option<&LogicalName> {
        self.role.references().next().map(|r| &r.resource)
    }

    pub(crate) fn validate(&self, name: &LogicalName) -> Result<()> {
        if self.target().is_none() {
            return Err(PlanError::InvalidResource {
                name: name.clone(),
                reason: "attachment must reference the identity it binds to".to_string(),
            });
        }
        check_policy_name(name, &self.policy_name)?;
        self.policy.validate(DocumentPurpose::Identity)
    }
}

/// Lifecycle state of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdentityState {
    Declared,
    TrustBound,
    PermissionBound,
    Active,
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentityState::Declared => "Declared",
            IdentityState::TrustBound => "TrustBound",
            IdentityState::PermissionBound => "PermissionBound",
            IdentityState::Active => "Active",
        };
        f.write_str(s)
    }
}

/// Tracks one identity through its bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityLifecycle {
    identity: LogicalName,
    state: IdentityState,
    permission_source: Option<LogicalName>,
}

impl IdentityLifecycle {
    pub fn new(identity: LogicalName) -> Self {
        IdentityLifecycle {
            identity,
            state: IdentityState::Declared,
            permission_source: None,
        }
    }

    pub fn identity(&self) -> &LogicalName {
        &self.identity
    }

    pub fn state(&self) -> IdentityState {
        self.state
    }

    /// Resource that supplied the permission document
    pub fn permission_source(&self) -> Option<&LogicalName> {
        self.permission_source.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == IdentityState::Active
    }

    /// Attach the assume-role trust statement
    pub fn bind_trust(&mut self) -> Result<()> {
        self.transition(IdentityState::Declared, IdentityState::TrustBound)
    }

    /// Bind the single permission document supplied by `source`
    pub fn bind_permissions(&mut self, source: &LogicalName) -> Result<()> {
        if let Some(existing) = &self.permission_source {
            if existing != source {
                return Err(PlanError::MultiplePermissionDocuments {
                    identity: self.identity.clone(),
                    documents: vec![existing.clone(), source.clone()],
                });
            }
        }
        self.transition(IdentityState::TrustBound, IdentityState::PermissionBound)?;
        self.permission_source = Some(source.clone());
        Ok(())
    }

    /// Mark the identity usable
    pub fn activate(&mut self) -> Result<()> {
        self.transition(IdentityState::PermissionBound, IdentityState::Active)
    }

    fn transition(&mut self, from: IdentityState, to: IdentityState) -> Result<()> {
        if self.state != from {
            return Err(PlanError::InvalidTransition {
                identity: self.identity.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}
