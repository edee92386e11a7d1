//! IAM policy document structure
//!
//! Documents are lists of typed statements. Read and write grants are separate
//! variants, and service trust (who may assume an identity) has its own variant.
//! Every statement is validated when it is constructed, so a document that exists
//! is already well-formed for the purpose it was built for.
//!
//! The wire format is the AWS policy JSON (`Version` + `Statement`).

use super::action::Action;
use super::pattern::{PatternMatcher, ResourcePattern};
use crate::core::template::{Deferred, Reference, Template};
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Policy language version written into every document
pub const POLICY_VERSION: &str = "2012-10-17";

const LEGACY_POLICY_VERSION: &str = "2008-10-17";

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// Who a resource-policy statement applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// A service principal such as `codebuild.amazonaws.com`
    Service(String),
    /// Everyone, including unauthenticated callers
    Anyone,
}

/// An (effect, actions, resources) rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionStatement {
    pub sid: Option<String>,
    pub effect: Effect,
    pub actions: BTreeSet<Action>,
    pub resources: BTreeSet<Template>,
    /// Only set on resource policies
    pub principal: Option<Principal>,
}

impl PermissionStatement {
    /// Create a new statement
    pub fn new(
        effect: Effect,
        actions: impl IntoIterator<Item = Action>,
        resources: impl IntoIterator<Item = Template>,
    ) -> Self {
        PermissionStatement {
            sid: None,
            effect,
            actions: actions.into_iter().collect(),
            resources: resources.into_iter().collect(),
            principal: None,
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Check shape and resource scoping
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(PlanError::InvalidPolicy("statement has no actions".to_string()));
        }
        if self.resources.is_empty() {
            return Err(PlanError::InvalidPolicy("statement has no resources".to_string()));
        }

        for resource in &self.resources {
            if ResourcePattern::classify(resource)? == ResourcePattern::Any {
                // Deny on everything never widens access
                if self.effect == Effect::Deny {
                    continue;
                }
                if let Some(action) = self.actions.iter().find(|a| !a.allows_unrestricted()) {
                    return Err(PlanError::UnrestrictedResource {
                        action: action.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Check if this statement applies to the given action, resource and caller
    ///
    /// `caller` is `None` when evaluating an identity's own policy. Unresolved
    /// resource templates never match.
    pub fn applies_to(&self, action: &Action, resource: &str, caller: Option<&Principal>) -> bool {
        if !self.actions.contains(action) {
            return false;
        }

        let principal_matches = match (&self.principal, caller) {
            (None, None) => true,
            (Some(Principal::Anyone), _) => true,
            (Some(Principal::Service(s)), Some(Principal::Service(c))) => s == c,
            _ => false,
        };
        if !principal_matches {
            return false;
        }

        self.resources.iter().any(|pattern| match pattern.as_literal() {
            Some(pattern) => PatternMatcher::matches(&pattern, resource),
            None => false,
        })
    }

    fn is_read_only(&self) -> bool {
        self.actions.iter().all(Action::is_read_only)
    }
}

/// Declares which external service may assume an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStatement {
    service: String,
}

impl TrustStatement {
    /// Trust exactly one service principal
    pub fn service(service: impl Into<String>) -> Result<Self> {
        let service = service.into();
        if service.is_empty() || !service.ends_with(".amazonaws.com") {
            return Err(PlanError::InvalidPolicy(format!(
                "'{}' is not a service principal",
                service
            )));
        }
        Ok(TrustStatement { service })
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }
}

/// A statement, tagged by what it grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Only List/Read actions
    Read(PermissionStatement),
    /// At least one action that changes state
    Write(PermissionStatement),
    /// `sts:AssumeRole` for one service principal
    ServiceTrust(TrustStatement),
}

impl Statement {
    /// Validate a permission statement and tag it read or write
    pub fn permission(statement: PermissionStatement) -> Result<Self> {
        statement.validate()?;
        if statement.is_read_only() {
            Ok(Statement::Read(statement))
        } else {
            Ok(Statement::Write(statement))
        }
    }

    pub fn trust(trust: TrustStatement) -> Self {
        Statement::ServiceTrust(trust)
    }

    pub fn as_permission(&self) -> Option<&PermissionStatement> {
        match self {
            Statement::Read(s) | Statement::Write(s) => Some(s),
            Statement::ServiceTrust(_) => None,
        }
    }
}

/// What a document will be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPurpose {
    /// Permission document bound to an identity
    Identity,
    /// Assume-role document of an identity
    Trust,
    /// Policy attached to a resource (bucket policy)
    Resource,
}

/// Complete IAM policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDocument", into = "RawDocument")]
pub struct PolicyDocument {
    version: String,
    statements: Vec<Statement>,
}

impl PolicyDocument {
    /// Create a new empty policy
    pub fn new() -> Self {
        PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statements: Vec::new(),
        }
    }

    /// Assume-role document trusting one service
    pub fn trust(service: &str) -> Result<Self> {
        let mut doc = Self::new();
        doc.add_statement(Statement::trust(TrustStatement::service(service)?));
        Ok(doc)
    }

    /// Add a statement to this policy
    pub fn add_statement(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.add_statement(statement);
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn permission_statements(&self) -> impl Iterator<Item = &PermissionStatement> {
        self.statements.iter().filter_map(Statement::as_permission)
    }

    /// The single trusted service of a trust document
    pub fn trusted_service(&self) -> Option<&str> {
        self.statements.iter().find_map(|s| match s {
            Statement::ServiceTrust(t) => Some(t.service_name()),
            _ => None,
        })
    }

    /// Every action some Allow statement grants
    pub fn granted_actions(&self) -> BTreeSet<Action> {
        self.permission_statements()
            .filter(|s| s.effect == Effect::Allow)
            .flat_map(|s| s.actions.iter().cloned())
            .collect()
    }

    /// Does this document let anyone read objects?
    pub fn grants_public_read(&self) -> bool {
        let Ok(get_object) = Action::parse("s3:GetObject") else {
            return false;
        };
        self.permission_statements().any(|s| {
            s.effect == Effect::Allow
                && s.principal == Some(Principal::Anyone)
                && s.actions.contains(&get_object)
        })
    }

    /// Resources a write statement touches
    pub fn write_resources(&self) -> impl Iterator<Item = &Template> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Write(p) if p.effect == Effect::Allow => Some(&p.resources),
            _ => None,
        })
        .flatten()
    }

    /// All references inside resource addresses
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.permission_statements()
            .flat_map(|s| s.resources.iter())
            .flat_map(Template::references)
    }

    /// Validate policy structure for the given purpose
    pub fn validate(&self, purpose: DocumentPurpose) -> Result<()> {
        if self.statements.is_empty() {
            return Err(PlanError::InvalidPolicy(
                "Policy must have at least one statement".to_string(),
            ));
        }

        let trust_count = self
            .statements
            .iter()
            .filter(|s| matches!(s, Statement::ServiceTrust(_)))
            .count();

        match purpose {
            DocumentPurpose::Trust => {
                if trust_count != 1 || self.statements.len() != 1 {
                    return Err(PlanError::TrustPrincipalCount(trust_count));
                }
            }
            DocumentPurpose::Identity => {
                if trust_count > 0 {
                    return Err(PlanError::InvalidPolicy(
                        "permission document contains a trust statement".to_string(),
                    ));
                }
                if self.permission_statements().any(|s| s.principal.is_some()) {
                    return Err(PlanError::InvalidPolicy(
                        "identity policies cannot name a principal".to_string(),
                    ));
                }
            }
            DocumentPurpose::Resource => {
                if trust_count > 0 {
                    return Err(PlanError::InvalidPolicy(
                        "resource policy contains a trust statement".to_string(),
                    ));
                }
                if self.permission_statements().any(|s| s.principal.is_none()) {
                    return Err(PlanError::InvalidPolicy(
                        "resource policy statements must name a principal".to_string(),
                    ));
                }
            }
        }

        for statement in self.permission_statements() {
            statement.validate()?;
        }
        Ok(())
    }

    /// Substitute references in resource addresses
    pub fn resolve<F>(&self, lookup: F) -> std::result::Result<PolicyDocument, Deferred>
    where
        F: Fn(&Reference) -> Option<String>,
    {
        let mut statements = Vec::with_capacity(self.statements.len());
        for statement in &self.statements {
            let resolved = match statement {
                Statement::Read(p) => Statement::Read(resolve_statement(p, &lookup)?),
                Statement::Write(p) => Statement::Write(resolve_statement(p, &lookup)?),
                Statement::ServiceTrust(t) => Statement::ServiceTrust(t.clone()),
            };
            statements.push(resolved);
        }
        Ok(PolicyDocument {
            version: self.version.clone(),
            statements,
        })
    }

    /// Parse policy from JSON string
    ///
    /// Malformed JSON is `PlanError::Serialization`; a well-formed document with a bad
    /// action, principal or version keeps its own error variant.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawDocument = serde_json::from_str(json)?;
        PolicyDocument::try_from(raw)
    }

    /// Serialize policy to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_statement<F>(
    statement: &PermissionStatement,
    lookup: &F,
) -> std::result::Result<PermissionStatement, Deferred>
where
    F: Fn(&Reference) -> Option<String>,
{
    let mut resolved = statement.clone();
    resolved.resources = statement
        .resources
        .iter()
        .map(|t| t.render(lookup).map(Template::literal))
        .collect::<std::result::Result<_, _>>()?;
    Ok(resolved)
}

// AWS JSON wire format

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }

    fn from_vec(mut items: Vec<T>) -> Self {
        if items.len() == 1 {
            OneOrMany::One(items.remove(0))
        } else {
            OneOrMany::Many(items)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPrincipal {
    Wildcard(String),
    Service {
        #[serde(rename = "Service")]
        service: OneOrMany<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<String>,
    effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    principal: Option<RawPrincipal>,
    action: OneOrMany<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<OneOrMany<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDocument {
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Statement")]
    statement: OneOrMany<RawStatement>,
}

impl TryFrom<RawStatement> for Statement {
    type Error = PlanError;

    fn try_from(raw: RawStatement) -> Result<Self> {
        let actions = raw.action.into_vec();

        if actions.iter().any(|a| a == "sts:AssumeRole") {
            if actions.len() != 1 || raw.effect != Effect::Allow || raw.resource.is_some() {
                return Err(PlanError::InvalidPolicy(
                    "trust statements allow only sts:AssumeRole without resources".to_string(),
                ));
            }
            let services = match raw.principal {
                Some(RawPrincipal::Service { service }) => service.into_vec(),
                _ => return Err(PlanError::TrustPrincipalCount(0)),
            };
            if services.len() != 1 {
                return Err(PlanError::TrustPrincipalCount(services.len()));
            }
            return Ok(Statement::trust(TrustStatement::service(services[0].clone())?));
        }

        let principal = match raw.principal {
            None => None,
            Some(RawPrincipal::Wildcard(w)) if w == "*" => Some(Principal::Anyone),
            Some(RawPrincipal::Wildcard(w)) => {
                return Err(PlanError::InvalidPolicy(format!("unsupported principal '{}'", w)))
            }
            Some(RawPrincipal::Service { service }) => {
                let mut services = service.into_vec();
                if services.len() != 1 {
                    return Err(PlanError::InvalidPolicy(
                        "statements may name one service principal".to_string(),
                    ));
                }
                Some(Principal::Service(services.remove(0)))
            }
        };

        let actions = actions
            .iter()
            .map(|a| Action::parse(a))
            .collect::<Result<Vec<_>>>()?;
        let resources = raw
            .resource
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .iter()
            .map(|r| Template::parse(r))
            .collect::<Result<Vec<_>>>()?;

        let mut statement = PermissionStatement::new(raw.effect, actions, resources);
        statement.sid = raw.sid;
        statement.principal = principal;
        Statement::permission(statement)
    }
}

impl From<&Statement> for RawStatement {
    fn from(statement: &Statement) -> Self {
        match statement {
            Statement::ServiceTrust(t) => RawStatement {
                sid: None,
                effect: Effect::Allow,
                principal: Some(RawPrincipal::Service {
                    service: OneOrMany::One(t.service.clone()),
                }),
                action: OneOrMany::One("sts:AssumeRole".to_string()),
                resource: None,
            },
            Statement::Read(p) | Statement::Write(p) => RawStatement {
                sid: p.sid.clone(),
                effect: p.effect,
                principal: p.principal.as_ref().map(|pr| match pr {
                    Principal::Anyone => RawPrincipal::Wildcard("*".to_string()),
                    Principal::Service(s) => RawPrincipal::Service {
                        service: OneOrMany::One(s.clone()),
                    },
                }),
                action: OneOrMany::from_vec(p.actions.iter().map(ToString::to_string).collect()),
                resource: Some(OneOrMany::from_vec(
                    p.resources.iter().map(ToString::to_string).collect(),
                )),
            },
        }
    }
}

impl TryFrom<RawDocument> for PolicyDocument {
    type Error = PlanError;

    fn try_from(raw: RawDocument) -> Result<Self> {
        if raw.version != POLICY_VERSION && raw.version != LEGACY_POLICY_VERSION {
            return Err(PlanError::InvalidPolicy(format!(
                "unsupported policy version '{}'",
                raw.version
            )));
        }
        let statements = raw
            .statement
            .into_vec()
            .into_iter()
            .map(Statement::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(PolicyDocument {
            version: raw.version,
            statements,
        })
    }
}

impl From<PolicyDocument> for RawDocument {
    fn from(doc: PolicyDocument) -> Self {
        RawDocument {
            version: doc.version,
            statement: OneOrMany::Many(doc.statements.iter().map(RawStatement::from).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(raw: &[&str]) -> Vec<Action> {
        Action::parse_all(raw).unwrap()
    }

    fn resources(raw: &[&str]) -> Vec<Template> {
        raw.iter().map(|r| Template::parse(r).unwrap()).collect()
    }

    #[test]
    fn test_statement_kind() {
        let read = Statement::permission(PermissionStatement::new(
            Effect::Allow,
            actions(&["s3:GetObject", "s3:ListBucket"]),
            resources(&["arn:aws:s3:::site", "arn:aws:s3:::site/*"]),
        ))
        .unwrap();
        assert!(matches!(read, Statement::Read(_)));

        let write = Statement::permission(PermissionStatement::new(
            Effect::Allow,
            actions(&["s3:GetObject", "s3:PutObject"]),
            resources(&["arn:aws:s3:::site/*"]),
        ))
        .unwrap();
        assert!(matches!(write, Statement::Write(_)));
    }

    #[test]
    fn test_unrestricted_resource_rules() {
        // Reporting APIs may use "*"
        assert!(Statement::permission(PermissionStatement::new(
            Effect::Allow,
            actions(&["codebuild:CreateReport", "codebuild:UpdateReport"]),
            resources(&["*"]),
        ))
        .is_ok());

        // Object writes may not
        let err = Statement::permission(PermissionStatement::new(
            Effect::Allow,
            actions(&["s3:PutObject"]),
            resources(&["*"]),
        ))
        .unwrap_err();
        assert!(matches!(err, PlanError::UnrestrictedResource { .. }));

        // Unscoped namespace wildcard
        let err = Statement::permission(PermissionStatement::new(
            Effect::Allow,
            actions(&["s3:GetObject"]),
            resources(&["arn:aws:s3:::*"]),
        ))
        .unwrap_err();
        assert!(matches!(err, PlanError::UnscopedWildcard(_)));
    }

    #[test]
    fn test_empty_statement_parts() {
        assert!(Statement::permission(PermissionStatement::new(
            Effect::Allow,
            Vec::new(),
            resources(&["arn:aws:s3:::site"]),
        ))
        .is_err());
        assert!(Statement::permission(PermissionStatement::new(
            Effect::Allow,
            actions(&["s3:GetObject"]),
            Vec::new(),
        ))
        .is_err());
    }

    #[test]
    fn test_trust_json() {
        let doc = PolicyDocument::trust("codebuild.amazonaws.com").unwrap();
        doc.validate(DocumentPurpose::Trust).unwrap();

        let json: serde_json::Value = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["Version"], POLICY_VERSION);
        assert_eq!(json["Statement"][0]["Action"], "sts:AssumeRole");
        assert_eq!(
            json["Statement"][0]["Principal"]["Service"],
            "codebuild.amazonaws.com"
        );

        let parsed: PolicyDocument = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.trusted_service(), Some("codebuild.amazonaws.com"));
    }

    #[test]
    fn test_trust_requires_one_service() {
        let json = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Service": ["codebuild.amazonaws.com", "codepipeline.amazonaws.com"]},
                "Action": "sts:AssumeRole"
            }]
        }"#;
        let err = PolicyDocument::from_json(json).unwrap_err();
        assert!(matches!(err, PlanError::TrustPrincipalCount(2)));

        let anyone = r#"{
            "Version": "2012-10-17",
            "Statement": {"Effect": "Allow", "Principal": "*", "Action": "sts:AssumeRole"}
        }"#;
        assert!(matches!(
            PolicyDocument::from_json(anyone).unwrap_err(),
            PlanError::TrustPrincipalCount(0)
        ));
    }

    #[test]
    fn test_parse_aws_json() {
        let json = r#"{
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Sid": "PublicRead",
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "s3:GetObject",
                    "Resource": "${site.arn}/*"
                }
            ]
        }"#;
        let doc = PolicyDocument::from_json(json).unwrap();
        doc.validate(DocumentPurpose::Resource).unwrap();
        assert!(doc.grants_public_read());
        assert_eq!(doc.references().count(), 1);

        // A resource policy is not a valid identity policy
        assert!(doc.validate(DocumentPurpose::Identity).is_err());
    }

    #[test]
    fn test_rejects_unknown_actions_and_versions() {
        let bad_action = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:Teleport","Resource":"arn:aws:s3:::site"}]}"#;
        assert!(matches!(
            PolicyDocument::from_json(bad_action).unwrap_err(),
            PlanError::UnknownAction(_)
        ));

        let bad_version = r#"{"Version":"2020-01-01","Statement":[]}"#;
        assert!(matches!(
            PolicyDocument::from_json(bad_version).unwrap_err(),
            PlanError::InvalidPolicy(_)
        ));

        // Only broken JSON is a serialization error
        assert!(matches!(
            PolicyDocument::from_json(r#"{"Version":"2012-10-17","Statement":"#).unwrap_err(),
            PlanError::Serialization(_)
        ));
    }

    #[test]
    fn test_policy_json_roundtrip() {
        let mut policy = PolicyDocument::new();
        policy.add_statement(
            Statement::permission(PermissionStatement::new(
                Effect::Allow,
                actions(&["s3:GetObject", "s3:PutObject"]),
                resources(&["${site.arn}/*"]),
            ))
            .unwrap(),
        );

        let json = policy.to_json().unwrap();
        let parsed = PolicyDocument::from_json(&json).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn test_resolve_references() {
        let policy = PolicyDocument::new().with_statement(
            Statement::permission(PermissionStatement::new(
                Effect::Allow,
                actions(&["s3:PutObject"]),
                resources(&["${site.arn}/*"]),
            ))
            .unwrap(),
        );

        assert!(policy.resolve(|_| None).is_err());

        let resolved = policy
            .resolve(|_| Some("arn:aws:s3:::my-site".to_string()))
            .unwrap();
        let stmt = resolved.permission_statements().next().unwrap();
        let put = Action::parse("s3:PutObject").unwrap();
        assert!(stmt.applies_to(&put, "arn:aws:s3:::my-site/index.html", None));
        assert!(!stmt.applies_to(&put, "arn:aws:s3:::other/index.html", None));
    }

    #[test]
    fn test_statement_applies_to_principal() {
        let stmt = PermissionStatement::new(
            Effect::Allow,
            actions(&["s3:GetObject"]),
            resources(&["arn:aws:s3:::site/*"]),
        )
        .with_principal(Principal::Anyone);
        let get = Action::parse("s3:GetObject").unwrap();

        assert!(stmt.applies_to(&get, "arn:aws:s3:::site/a.html", None));
        assert!(stmt.applies_to(
            &get,
            "arn:aws:s3:::site/a.html",
            Some(&Principal::Service("codebuild.amazonaws.com".to_string()))
        ));

        let service_only = stmt.clone().with_principal(Principal::Service("codebuild.amazonaws.com".into()));
        assert!(!service_only.applies_to(&get, "arn:aws:s3:::site/a.html", None));
    }
}
