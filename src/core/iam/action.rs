//! Service-namespaced actions and the action catalog
//!
//! Every action string (`service:Verb`) must exist in the catalog for its service.
//! The catalog records the access level of each action and which resource type it
//! is authorized against. The composer uses that to pick the narrowest address.

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service namespaces the plan can grant actions in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Service {
    S3,
    Logs,
    CodeBuild,
    CodePipeline,
    Iam,
    Sts,
}

impl Service {
    pub fn prefix(&self) -> &'static str {
        match self {
            Service::S3 => "s3",
            Service::Logs => "logs",
            Service::CodeBuild => "codebuild",
            Service::CodePipeline => "codepipeline",
            Service::Iam => "iam",
            Service::Sts => "sts",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "s3" => Service::S3,
            "logs" => Service::Logs,
            "codebuild" => Service::CodeBuild,
            "codepipeline" => Service::CodePipeline,
            "iam" => Service::Iam,
            "sts" => Service::Sts,
            _ => return None,
        })
    }

    fn catalog(&self) -> &'static [ActionSpec] {
        match self {
            Service::S3 => S3_ACTIONS,
            Service::Logs => LOGS_ACTIONS,
            Service::CodeBuild => CODEBUILD_ACTIONS,
            Service::CodePipeline => CODEPIPELINE_ACTIONS,
            Service::Iam => IAM_ACTIONS,
            Service::Sts => STS_ACTIONS,
        }
    }
}

/// Access level of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    List,
    Read,
    Write,
    PermissionsManagement,
}

/// Resource type an action is authorized against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLevel {
    /// `arn:...:s3:::bucket`
    Bucket,
    /// `arn:...:s3:::bucket/key`
    Object,
    /// Log group and its streams
    LogGroup,
    /// Build project
    BuildProject,
    /// Pipeline
    Pipeline,
    /// IAM role
    Role,
    /// Action does not support resource-level permissions
    Unscoped,
}

/// Catalog entry for one action
#[derive(Debug)]
pub struct ActionSpec {
    pub verb: &'static str,
    pub access: AccessLevel,
    pub level: ResourceLevel,
    /// Logging or reporting action without access to customer data
    pub telemetry: bool,
}

const fn spec(verb: &'static str, access: AccessLevel, level: ResourceLevel) -> ActionSpec {
    ActionSpec {
        verb,
        access,
        level,
        telemetry: false,
    }
}

const fn telemetry(verb: &'static str, level: ResourceLevel) -> ActionSpec {
    ActionSpec {
        verb,
        access: AccessLevel::Write,
        level,
        telemetry: true,
    }
}

use AccessLevel::*;
use ResourceLevel::*;

static S3_ACTIONS: &[ActionSpec] = &[
    spec("GetObject", Read, Object),
    spec("GetObjectVersion", Read, Object),
    spec("PutObject", Write, Object),
    spec("DeleteObject", Write, Object),
    spec("PutObjectAcl", PermissionsManagement, Object),
    spec("GetObjectAcl", Read, Object),
    spec("ListBucket", List, Bucket),
    spec("ListBucketMultipartUploads", List, Bucket),
    spec("GetBucketVersioning", Read, Bucket),
    spec("GetBucketLocation", Read, Bucket),
    spec("GetBucketPolicy", Read, Bucket),
    spec("PutBucketPolicy", PermissionsManagement, Bucket),
    spec("PutBucketWebsite", Write, Bucket),
    spec("ListAllMyBuckets", List, Unscoped),
];

static LOGS_ACTIONS: &[ActionSpec] = &[
    telemetry("CreateLogGroup", LogGroup),
    telemetry("CreateLogStream", LogGroup),
    telemetry("PutLogEvents", LogGroup),
    spec("DescribeLogGroups", List, Unscoped),
    spec("GetLogEvents", Read, LogGroup),
];

static CODEBUILD_ACTIONS: &[ActionSpec] = &[
    spec("StartBuild", Write, BuildProject),
    spec("StopBuild", Write, BuildProject),
    spec("BatchGetBuilds", Read, BuildProject),
    spec("BatchGetProjects", Read, BuildProject),
    telemetry("CreateReportGroup", Unscoped),
    telemetry("CreateReport", Unscoped),
    telemetry("UpdateReport", Unscoped),
    telemetry("BatchPutTestCases", Unscoped),
    telemetry("BatchPutCodeCoverages", Unscoped),
    spec("ListProjects", List, Unscoped),
];

static CODEPIPELINE_ACTIONS: &[ActionSpec] = &[
    spec("StartPipelineExecution", Write, Pipeline),
    spec("GetPipelineState", Read, Pipeline),
    spec("ListPipelines", List, Unscoped),
];

static IAM_ACTIONS: &[ActionSpec] = &[
    spec("PassRole", Write, Role),
    spec("GetRole", Read, Role),
];

static STS_ACTIONS: &[ActionSpec] = &[spec("AssumeRole", Write, Role)];

/// A validated `service:Verb` action
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Action {
    service: Service,
    verb: &'static str,
}

impl Action {
    /// Parse and validate an action against the catalog
    ///
    /// ```
    /// use siteplan::Action;
    ///
    /// let action = Action::parse("s3:GetObject").unwrap();
    /// assert_eq!(action.to_string(), "s3:GetObject");
    ///
    /// assert!(Action::parse("s3:FlyToMoon").is_err());
    /// assert!(Action::parse("s3:*").is_err());
    /// assert!(Action::parse("GetObject").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let (prefix, verb) = input
            .split_once(':')
            .ok_or_else(|| PlanError::UnknownAction(input.to_string()))?;
        let service =
            Service::from_prefix(prefix).ok_or_else(|| PlanError::UnknownAction(input.to_string()))?;
        let spec = service
            .catalog()
            .iter()
            .find(|s| s.verb == verb)
            .ok_or_else(|| PlanError::UnknownAction(input.to_string()))?;
        Ok(Action {
            service,
            verb: spec.verb,
        })
    }

    /// Parse a list of known-good actions
    pub fn parse_all(inputs: &[&str]) -> Result<Vec<Action>> {
        inputs.iter().map(|a| Action::parse(a)).collect()
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn verb(&self) -> &'static str {
        self.verb
    }

    /// Catalog entry for this action
    pub fn spec(&self) -> &'static ActionSpec {
        self.service
            .catalog()
            .iter()
            .find(|s| s.verb == self.verb)
            .expect("actions are only constructed from catalog entries")
    }

    pub fn access_level(&self) -> AccessLevel {
        self.spec().access
    }

    pub fn resource_level(&self) -> ResourceLevel {
        self.spec().level
    }

    /// List or Read access
    pub fn is_read_only(&self) -> bool {
        matches!(self.access_level(), AccessLevel::List | AccessLevel::Read)
    }

    /// May this action be granted on the unrestricted resource `*`?
    ///
    /// Only non-sensitive telemetry (logging, reporting) and read-only metadata
    /// actions that have no resource-level permissions qualify.
    pub fn allows_unrestricted(&self) -> bool {
        let spec = self.spec();
        spec.telemetry || (self.is_read_only() && spec.level == ResourceLevel::Unscoped)
    }

    /// Can the grant be narrowed to a concrete address?
    pub fn is_scopable(&self) -> bool {
        self.resource_level() != ResourceLevel::Unscoped
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service.prefix(), self.verb)
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Action::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_actions() {
        for raw in ["s3:PutObject", "logs:PutLogEvents", "codebuild:StartBuild", "sts:AssumeRole"] {
            let action = Action::parse(raw).unwrap();
            assert_eq!(action.to_string(), raw);
        }
    }

    #[test]
    fn test_reject_unknown_actions() {
        assert!(Action::parse("ec2:RunInstances").is_err());
        assert!(Action::parse("s3:getobject").is_err());
        assert!(Action::parse("*").is_err());
        assert!(Action::parse("").is_err());
    }

    #[test]
    fn test_resource_levels() {
        assert_eq!(Action::parse("s3:ListBucket").unwrap().resource_level(), Bucket);
        assert_eq!(Action::parse("s3:GetObject").unwrap().resource_level(), Object);
        assert_eq!(
            Action::parse("codebuild:CreateReport").unwrap().resource_level(),
            Unscoped
        );
    }

    #[test]
    fn test_unrestricted_eligibility() {
        assert!(Action::parse("codebuild:CreateReport").unwrap().allows_unrestricted());
        assert!(Action::parse("logs:PutLogEvents").unwrap().allows_unrestricted());
        assert!(Action::parse("s3:ListAllMyBuckets").unwrap().allows_unrestricted());

        assert!(!Action::parse("s3:GetObject").unwrap().allows_unrestricted());
        assert!(!Action::parse("s3:PutObject").unwrap().allows_unrestricted());
        assert!(!Action::parse("codebuild:StartBuild").unwrap().allows_unrestricted());
    }

    #[test]
    fn test_ordering_is_stable() {
        let mut actions = Action::parse_all(&["s3:PutObject", "logs:PutLogEvents", "s3:GetObject"]).unwrap();
        actions.sort();
        let rendered: Vec<_> = actions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["s3:GetObject", "s3:PutObject", "logs:PutLogEvents"]);
    }
}
