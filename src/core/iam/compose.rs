//! Least-privilege policy composition
//!
//! A [`Requirement`] says which actions an identity needs and on which targets.
//! [`PolicyComposer`] binds every action to the narrowest address its resource level
//! allows and merges actions that end up with the same address set.

use super::action::{Action, ResourceLevel};
use super::policy::{Effect, PermissionStatement, PolicyDocument, Statement};
use crate::core::config::PlanConfig;
use crate::core::template::Template;
use crate::error::{PlanError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Something an action can be granted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A bucket, given by its ARN
    Bucket(Template),
    /// Buckets whose names start with a known prefix (e.g. `codepipeline-us-east-1-`)
    BucketPrefix(String),
    /// A log group, given by its ARN
    LogGroup(Template),
    /// A build project ARN
    Project(Template),
    /// A pipeline ARN
    Pipeline(Template),
    /// A role ARN
    Role(Template),
}

/// Actions an identity needs and the targets they apply to
#[derive(Debug, Clone)]
pub struct Requirement {
    actions: BTreeSet<Action>,
    targets: Vec<Target>,
}

impl Requirement {
    /// Parse and collect actions
    pub fn new(actions: &[&str]) -> Result<Self> {
        Ok(Requirement {
            actions: Action::parse_all(actions)?.into_iter().collect(),
            targets: Vec::new(),
        })
    }

    /// Add a target
    pub fn on(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn actions(&self) -> &BTreeSet<Action> {
        &self.actions
    }

    /// Narrowest addresses for one action across this requirement's targets
    fn addresses(&self, config: &PlanConfig, action: &Action) -> BTreeSet<Template> {
        let level = action.resource_level();
        if level == ResourceLevel::Unscoped {
            return BTreeSet::from([Template::literal("*")]);
        }

        let mut out = BTreeSet::new();
        for target in &self.targets {
            match (level, target) {
                (ResourceLevel::Object, Target::Bucket(arn)) => {
                    out.insert(arn.with_suffix("/*"));
                }
                (ResourceLevel::Object, Target::BucketPrefix(prefix)) => {
                    out.insert(Template::literal(format!("{}*/*", config.bucket_arn(prefix))));
                }
                (ResourceLevel::Bucket, Target::Bucket(arn)) => {
                    out.insert(arn.clone());
                }
                (ResourceLevel::Bucket, Target::BucketPrefix(prefix)) => {
                    out.insert(Template::literal(format!("{}*", config.bucket_arn(prefix))));
                }
                (ResourceLevel::LogGroup, Target::LogGroup(arn)) => {
                    out.insert(arn.clone());
                    out.insert(arn.with_suffix(":*"));
                }
                (ResourceLevel::BuildProject, Target::Project(arn))
                | (ResourceLevel::Pipeline, Target::Pipeline(arn))
                | (ResourceLevel::Role, Target::Role(arn)) => {
                    out.insert(arn.clone());
                }
                _ => {}
            }
        }
        out
    }
}

/// Builds minimal permission documents from requirements
pub struct PolicyComposer<'a> {
    config: &'a PlanConfig,
    requirements: Vec<Requirement>,
}

impl<'a> PolicyComposer<'a> {
    pub fn new(config: &'a PlanConfig) -> Self {
        PolicyComposer {
            config,
            requirements: Vec::new(),
        }
    }

    pub fn require(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Union of all required actions
    pub fn required_actions(&self) -> BTreeSet<Action> {
        self.requirements
            .iter()
            .flat_map(|r| r.actions.iter().cloned())
            .collect()
    }

    /// Produce the permission document
    ///
    /// Statements come out grouped by (read-only, address set) in a stable order, so
    /// composing the same requirements twice yields identical JSON.
    pub fn compose(&self) -> Result<PolicyDocument> {
        let mut per_action: BTreeMap<Action, BTreeSet<Template>> = BTreeMap::new();
        for requirement in &self.requirements {
            for action in &requirement.actions {
                per_action
                    .entry(action.clone())
                    .or_default()
                    .extend(requirement.addresses(self.config, action));
            }
        }

        let mut groups: BTreeMap<(bool, BTreeSet<Template>), BTreeSet<Action>> = BTreeMap::new();
        for (action, addresses) in per_action {
            if addresses.is_empty() {
                return Err(PlanError::NoTargetForAction(action.to_string()));
            }
            groups
                .entry((!action.is_read_only(), addresses))
                .or_default()
                .insert(action);
        }

        let mut doc = PolicyDocument::new();
        for ((_, addresses), actions) in groups {
            debug!(
                actions = actions.len(),
                resources = addresses.len(),
                "Composed statement"
            );
            doc.add_statement(Statement::permission(PermissionStatement::new(
                Effect::Allow,
                actions,
                addresses,
            ))?);
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validation::LogicalName;

    fn config() -> PlanConfig {
        PlanConfig::new("us-east-1", "123456789012")
    }

    fn site() -> Template {
        Template::attr(&LogicalName::new("site").unwrap(), "arn")
    }

    #[test]
    fn test_object_and_bucket_levels() {
        let config = config();
        let doc = PolicyComposer::new(&config)
            .require(
                Requirement::new(&["s3:GetObject", "s3:PutObject", "s3:ListBucket"])
                    .unwrap()
                    .on(Target::Bucket(site())),
            )
            .compose()
            .unwrap();

        let json: serde_json::Value = serde_json::to_value(&doc).unwrap();
        let statements = json["Statement"].as_array().unwrap();
        // ListBucket + GetObject are read-only but on different addresses, PutObject writes
        assert_eq!(statements.len(), 3);

        let put = statements
            .iter()
            .find(|s| s["Action"] == "s3:PutObject")
            .unwrap();
        assert_eq!(put["Resource"], "${site.arn}/*");
        let list = statements
            .iter()
            .find(|s| s["Action"] == "s3:ListBucket")
            .unwrap();
        assert_eq!(list["Resource"], "${site.arn}");
    }

    #[test]
    fn test_prefix_target() {
        let config = config();
        let doc = PolicyComposer::new(&config)
            .require(
                Requirement::new(&["s3:GetObject", "s3:GetBucketVersioning"])
                    .unwrap()
                    .on(Target::BucketPrefix(config.artifact_bucket_prefix())),
            )
            .compose()
            .unwrap();

        let resources: BTreeSet<String> = doc
            .permission_statements()
            .flat_map(|s| s.resources.iter().map(ToString::to_string))
            .collect();
        assert!(resources.contains("arn:aws:s3:::codepipeline-us-east-1-*"));
        assert!(resources.contains("arn:aws:s3:::codepipeline-us-east-1-*/*"));
    }

    #[test]
    fn test_log_group_and_reports() {
        let config = config();
        let log_group = Template::literal(config.log_group_arn("/aws/codebuild/docs"));
        let doc = PolicyComposer::new(&config)
            .require(
                Requirement::new(&["logs:CreateLogStream", "logs:PutLogEvents"])
                    .unwrap()
                    .on(Target::LogGroup(log_group)),
            )
            .require(Requirement::new(&["codebuild:CreateReport"]).unwrap())
            .compose()
            .unwrap();

        let mut saw_star = false;
        for statement in doc.permission_statements() {
            let resources: Vec<String> = statement.resources.iter().map(ToString::to_string).collect();
            if resources == ["*"] {
                saw_star = true;
                assert_eq!(statement.actions.len(), 1);
            } else {
                assert!(resources.iter().any(|r| r.ends_with("/aws/codebuild/docs:*")));
            }
        }
        assert!(saw_star);
    }

    #[test]
    fn test_granted_equals_required() {
        let config = config();
        let composer = PolicyComposer::new(&config)
            .require(
                Requirement::new(&["s3:GetObject", "s3:PutObjectAcl", "s3:GetBucketVersioning"])
                    .unwrap()
                    .on(Target::Bucket(site()))
                    .on(Target::BucketPrefix(config.artifact_bucket_prefix())),
            )
            .require(
                Requirement::new(&["codebuild:StartBuild", "codebuild:BatchGetBuilds"])
                    .unwrap()
                    .on(Target::Project(Template::parse("${build_project.arn}").unwrap())),
            );
        let doc = composer.compose().unwrap();
        assert_eq!(doc.granted_actions(), composer.required_actions());
    }

    #[test]
    fn test_missing_target() {
        let config = config();
        let err = PolicyComposer::new(&config)
            .require(Requirement::new(&["codebuild:StartBuild"]).unwrap().on(Target::Bucket(site())))
            .compose()
            .unwrap_err();
        assert!(matches!(err, PlanError::NoTargetForAction(a) if a == "codebuild:StartBuild"));
    }

    #[test]
    fn test_deterministic_output() {
        let config = config();
        let build = || {
            PolicyComposer::new(&config)
                .require(
                    Requirement::new(&["s3:PutObject", "s3:GetObject", "s3:DeleteObject"])
                        .unwrap()
                        .on(Target::Bucket(site())),
                )
                .compose()
                .unwrap()
                .to_json()
                .unwrap()
        };
        assert_eq!(build(), build());
    }
}
