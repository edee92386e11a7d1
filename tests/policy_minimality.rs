//! Least-privilege composition tests
//!
//! Composed documents must grant exactly the required actions, bind each one to the
//! narrowest address its resource level allows, and never emit an unscoped wildcard.

use proptest::prelude::*;
use siteplan::core::iam::ResourceLevel;
use siteplan::{
    Action, PlanConfig, PolicyComposer, PolicyDocument, PublicReadMechanism, Requirement,
    ResourcePattern, SiteConfig, StaticSitePipeline, Target, Template,
};

const CATALOG: &[&str] = &[
    "s3:GetObject",
    "s3:GetObjectVersion",
    "s3:PutObject",
    "s3:DeleteObject",
    "s3:PutObjectAcl",
    "s3:ListBucket",
    "s3:GetBucketVersioning",
    "s3:ListAllMyBuckets",
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
    "logs:DescribeLogGroups",
    "codebuild:StartBuild",
    "codebuild:StopBuild",
    "codebuild:BatchGetBuilds",
    "codebuild:CreateReport",
    "codebuild:BatchPutTestCases",
    "codepipeline:StartPipelineExecution",
    "codepipeline:GetPipelineState",
    "iam:PassRole",
];

fn config() -> PlanConfig {
    PlanConfig::new("eu-west-1", "123456789012")
}

fn blueprint(mechanism: PublicReadMechanism) -> StaticSitePipeline {
    StaticSitePipeline::new(
        config(),
        SiteConfig::new("docs", "docs.example.com").with_public_read(mechanism),
    )
    .unwrap()
}

fn every_target() -> Vec<Target> {
    let config = config();
    vec![
        Target::Bucket(Template::parse("${site.arn}").unwrap()),
        Target::BucketPrefix(config.artifact_bucket_prefix()),
        Target::LogGroup(Template::literal(config.log_group_arn("/aws/codebuild/docs"))),
        Target::Project(Template::parse("${build_project.arn}").unwrap()),
        Target::Pipeline(Template::parse("${pipeline.arn}").unwrap()),
        Target::Role(Template::parse("${build_role.arn}").unwrap()),
    ]
}

/// Every statement resource is either `*` for unscopable actions or a scoped address
fn assert_scoped(document: &PolicyDocument) {
    for statement in document.permission_statements() {
        for resource in &statement.resources {
            let pattern = ResourcePattern::classify(resource).unwrap();
            if pattern == ResourcePattern::Any {
                assert!(
                    statement.actions.iter().all(Action::allows_unrestricted),
                    "scopable action granted on *: {:?}",
                    statement.actions
                );
            }
        }
    }
}

#[test]
fn test_blueprint_policies_are_exact() -> anyhow::Result<()> {
    for mechanism in [PublicReadMechanism::Acl, PublicReadMechanism::BucketPolicy] {
        let blueprint = blueprint(mechanism);

        let build = blueprint.build_policy()?;
        assert_eq!(build.granted_actions(), blueprint.build_required_actions()?);
        assert_scoped(&build);

        let pipeline = blueprint.pipeline_policy()?;
        assert_eq!(pipeline.granted_actions(), blueprint.pipeline_required_actions()?);
        assert_scoped(&pipeline);
    }
    Ok(())
}

#[test]
fn test_build_role_cannot_reach_other_buckets() -> anyhow::Result<()> {
    let blueprint = blueprint(PublicReadMechanism::BucketPolicy);
    let policy = blueprint
        .build_policy()?
        .resolve(|r| match (r.resource.as_str(), r.attribute.as_str()) {
            ("site", "arn") => Some("arn:aws:s3:::docs.example.com".to_string()),
            _ => None,
        })
        .map_err(|d| anyhow::anyhow!("unresolved {}", d.0))?;

    let mut engine = siteplan::PolicyEngine::new_default();
    let put = Action::parse("s3:PutObject")?;
    assert!(engine.evaluate(&policy, &put, "arn:aws:s3:::docs.example.com/a.html", None));
    assert!(!engine.evaluate(&policy, &put, "arn:aws:s3:::docs.example.com.evil/a.html", None));
    assert!(!engine.evaluate(&policy, &put, "arn:aws:s3:::codepipeline-eu-west-1-x/a", None));

    let logs = Action::parse("logs:PutLogEvents")?;
    assert!(engine.evaluate(
        &policy,
        &logs,
        "arn:aws:logs:eu-west-1:123456789012:log-group:/aws/codebuild/docs:log-stream:abc",
        None
    ));
    assert!(!engine.evaluate(
        &policy,
        &logs,
        "arn:aws:logs:eu-west-1:123456789012:log-group:/aws/lambda/other:log-stream:abc",
        None
    ));
    Ok(())
}

#[test]
fn test_pipeline_artifacts_use_known_prefix() -> anyhow::Result<()> {
    let policy = blueprint(PublicReadMechanism::BucketPolicy).pipeline_policy()?;
    let resources: Vec<String> = policy
        .permission_statements()
        .flat_map(|s| s.resources.iter().map(ToString::to_string))
        .collect();

    assert!(resources.contains(&"arn:aws:s3:::codepipeline-eu-west-1-*/*".to_string()));
    assert!(resources.contains(&"arn:aws:s3:::codepipeline-eu-west-1-*".to_string()));
    assert!(resources.iter().all(|r| r != "*" && r != "arn:aws:s3:::*"));
    Ok(())
}

proptest! {
    #[test]
    fn prop_composition_is_exact(picks in prop::sample::subsequence(CATALOG.to_vec(), 1..CATALOG.len())) {
        let config = config();
        let requirement = every_target()
            .into_iter()
            .fold(Requirement::new(&picks).unwrap(), Requirement::on);
        let composer = PolicyComposer::new(&config).require(requirement);
        let document = composer.compose().unwrap();

        prop_assert_eq!(document.granted_actions(), composer.required_actions());
        assert_scoped(&document);

        // Object-level actions only ever land on object addresses
        for statement in document.permission_statements() {
            if statement.actions.iter().any(|a| a.resource_level() == ResourceLevel::Object) {
                for resource in &statement.resources {
                    prop_assert!(resource.to_string().ends_with("/*"));
                }
            }
        }
    }

    #[test]
    fn prop_composition_is_stable(picks in prop::sample::subsequence(CATALOG.to_vec(), 1..CATALOG.len())) {
        let config = config();
        let compose = |actions: &[&str]| {
            let requirement = every_target()
                .into_iter()
                .fold(Requirement::new(actions).unwrap(), Requirement::on);
            PolicyComposer::new(&config).require(requirement).compose().unwrap().to_json().unwrap()
        };
        let mut reversed = picks.clone();
        reversed.reverse();
        prop_assert_eq!(compose(&picks), compose(&reversed));
    }
}
