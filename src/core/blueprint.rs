//! The static site and its delivery pipeline
//!
//! [`StaticSitePipeline`] turns [`Settings`] into declared resources:
//!
//! ```text
//! site ─┬─ site_public_read              (bucket policy mechanism only)
//!       ├─ build_policy ── build_role
//!       │       └─ build_project
//!       └─ pipeline_policy ── pipeline_role
//!               └─ pipeline ── build_project
//! ```
//!
//! Both permission documents are composed from requirements, so each role gets
//! exactly the actions listed here and nothing more.

use crate::core::config::{PlanConfig, PublicReadMechanism, Settings, SiteConfig};
use crate::core::iam::{
    Action, Effect, PermissionStatement, PolicyComposer, PolicyDocument, Principal, Requirement,
    Statement, Target,
};
use crate::core::outputs::OutputDecl;
use crate::core::plan::Plan;
use crate::core::resource::{
    ActionCategory, ArtifactStore, BucketPolicy, BuildEnvironment, BuildProject, CannedAcl,
    DeliveryPipeline, Identity, PolicyAttachment, Resource, Stage, StageAction, StorageBucket,
    WebsiteConfig,
};
use crate::core::template::Template;
use crate::core::validation::{BucketName, LogicalName};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};

pub const BUILD_SERVICE: &str = "codebuild.amazonaws.com";
pub const PIPELINE_SERVICE: &str = "codepipeline.amazonaws.com";

const SITE_OBJECT_ACTIONS: &[&str] = &[
    "s3:PutObject",
    "s3:GetObject",
    "s3:GetObjectVersion",
    "s3:DeleteObject",
    "s3:ListBucket",
    "s3:ListBucketMultipartUploads",
];

const BUILD_LOG_ACTIONS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

const BUILD_REPORT_ACTIONS: &[&str] = &[
    "codebuild:CreateReportGroup",
    "codebuild:CreateReport",
    "codebuild:UpdateReport",
    "codebuild:BatchPutTestCases",
];

const PIPELINE_ARTIFACT_ACTIONS: &[&str] = &[
    "s3:GetObject",
    "s3:GetObjectVersion",
    "s3:GetBucketVersioning",
    "s3:PutObjectAcl",
    "s3:PutObject",
];

const PIPELINE_BUILD_ACTIONS: &[&str] = &[
    "codebuild:StartBuild",
    "codebuild:StopBuild",
    "codebuild:BatchGetBuilds",
];

/// Logical names used by the blueprint
pub mod names {
    pub const SITE: &str = "site";
    pub const SITE_PUBLIC_READ: &str = "site_public_read";
    pub const BUILD_ROLE: &str = "build_role";
    pub const BUILD_POLICY: &str = "build_policy";
    pub const BUILD_PROJECT: &str = "build_project";
    pub const PIPELINE_ROLE: &str = "pipeline_role";
    pub const PIPELINE_POLICY: &str = "pipeline_policy";
    pub const PIPELINE: &str = "pipeline";
}

fn logical(name: &str) -> Result<LogicalName> {
    LogicalName::new(name)
}

/// Declarations for one website and its pipeline
#[derive(Debug, Clone)]
pub struct StaticSitePipeline {
    config: PlanConfig,
    site: SiteConfig,
}

impl StaticSitePipeline {
    pub fn new(config: PlanConfig, site: SiteConfig) -> Result<Self> {
        config.check()?;
        site.check()?;
        Ok(StaticSitePipeline { config, site })
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        Self::new(settings.provider, settings.site)
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// Name of the log group the build writes to
    pub fn log_group(&self) -> String {
        format!("/aws/codebuild/{}", self.site.project)
    }

    fn build_requirements(&self) -> Result<PolicyComposer<'_>> {
        let site = Template::attr(&logical(names::SITE)?, "arn");
        let log_group = Template::literal(self.config.log_group_arn(&self.log_group()));
        Ok(PolicyComposer::new(&self.config)
            .require(Requirement::new(SITE_OBJECT_ACTIONS)?.on(Target::Bucket(site)))
            .require(Requirement::new(BUILD_LOG_ACTIONS)?.on(Target::LogGroup(log_group)))
            .require(Requirement::new(BUILD_REPORT_ACTIONS)?))
    }

    fn pipeline_requirements(&self) -> Result<PolicyComposer<'_>> {
        let site = Template::attr(&logical(names::SITE)?, "arn");
        let project = Template::attr(&logical(names::BUILD_PROJECT)?, "arn");
        Ok(PolicyComposer::new(&self.config)
            .require(
                Requirement::new(PIPELINE_ARTIFACT_ACTIONS)?
                    .on(Target::BucketPrefix(self.config.artifact_bucket_prefix()))
                    .on(Target::Bucket(site)),
            )
            .require(Requirement::new(PIPELINE_BUILD_ACTIONS)?.on(Target::Project(project))))
    }

    /// Actions the build identity needs
    pub fn build_required_actions(&self) -> Result<BTreeSet<Action>> {
        Ok(self.build_requirements()?.required_actions())
    }

    /// Actions the pipeline identity needs
    pub fn pipeline_required_actions(&self) -> Result<BTreeSet<Action>> {
        Ok(self.pipeline_requirements()?.required_actions())
    }

    /// Composed build identity permissions
    pub fn build_policy(&self) -> Result<PolicyDocument> {
        self.build_requirements()?.compose()
    }

    /// Composed pipeline identity permissions
    pub fn pipeline_policy(&self) -> Result<PolicyDocument> {
        self.pipeline_requirements()?.compose()
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.config.tags.clone();
        tags.entry("project".to_string())
            .or_insert_with(|| self.site.project.clone());
        tags
    }

    fn site_bucket(&self) -> Result<Resource> {
        let mut website = WebsiteConfig::new(&self.site.index_document);
        if let Some(error) = &self.site.error_document {
            website = website.with_error_document(error);
        }
        let acl = match self.site.public_read {
            PublicReadMechanism::Acl => CannedAcl::PublicRead,
            PublicReadMechanism::BucketPolicy => CannedAcl::Private,
        };
        let mut bucket = StorageBucket::new(BucketName::new(&self.site.bucket_name)?)
            .with_website(website)
            .with_acl(acl)
            .with_tags(self.tags());
        bucket.force_destroy = self.site.force_destroy;
        Resource::new(logical(names::SITE)?, bucket)
    }

    fn public_read_policy(&self) -> Result<Resource> {
        let site = logical(names::SITE)?;
        let statement = PermissionStatement::new(
            Effect::Allow,
            [Action::parse("s3:GetObject")?],
            [Template::attr(&site, "arn").with_suffix("/*")],
        )
        .with_sid("PublicReadGetObject")
        .with_principal(Principal::Anyone);
        let policy = PolicyDocument::new().with_statement(Statement::permission(statement)?);
        Resource::new(
            logical(names::SITE_PUBLIC_READ)?,
            BucketPolicy::new(Template::attr(&site, "id"), policy),
        )
    }

    fn role(&self, name: &str, suffix: &str, service: &str, description: &str) -> Result<Resource> {
        let identity = Identity::assumed_by(format!("{}-{}", self.site.project, suffix), service)?
            .with_description(description);
        Resource::new(logical(name)?, identity)
    }

    fn attachment(&self, name: &str, role: &str, policy: PolicyDocument) -> Result<Resource> {
        let role = logical(role)?;
        let policy_name = format!("{}-{}", self.site.project, name.replace('_', "-"));
        Resource::new(
            logical(name)?,
            PolicyAttachment::new(Template::attr(&role, "name"), policy_name, policy),
        )
    }

    fn build_project(&self) -> Result<Resource> {
        let build = &self.site.build;
        let project = BuildProject {
            project_name: self.site.project.clone(),
            service_role: Template::attr(&logical(names::BUILD_ROLE)?, "arn"),
            environment: BuildEnvironment::new(&build.image, &build.compute_type),
            buildspec: build.buildspec.clone(),
            log_group: self.log_group(),
            tags: self.tags(),
        };
        // The build must not start before its role can act
        Ok(Resource::new(logical(names::BUILD_PROJECT)?, project)?
            .depends_on(&logical(names::BUILD_POLICY)?))
    }

    fn pipeline(&self) -> Result<Resource> {
        let build = StageAction {
            name: "Build".to_string(),
            category: ActionCategory::Build,
            provider: "CodeBuild".to_string(),
            configuration: BTreeMap::from([(
                "ProjectName".to_string(),
                Template::attr(&logical(names::BUILD_PROJECT)?, "name"),
            )]),
            input_artifacts: vec!["SourceArtifact".to_string()],
            output_artifacts: vec!["BuildArtifact".to_string()],
        };
        let deploy = StageAction {
            name: "Deploy".to_string(),
            category: ActionCategory::Deploy,
            provider: "S3".to_string(),
            configuration: BTreeMap::from([
                (
                    "BucketName".to_string(),
                    Template::attr(&logical(names::SITE)?, "id"),
                ),
                ("Extract".to_string(), Template::literal("true")),
            ]),
            input_artifacts: vec!["BuildArtifact".to_string()],
            output_artifacts: Vec::new(),
        };

        let pipeline = DeliveryPipeline {
            pipeline_name: self.site.project.clone(),
            role_arn: Template::attr(&logical(names::PIPELINE_ROLE)?, "arn"),
            artifact_store: ArtifactStore {
                bucket_prefix: self.config.artifact_bucket_prefix(),
            },
            source_artifact: "SourceArtifact".to_string(),
            stages: vec![
                Stage {
                    name: "Build".to_string(),
                    actions: vec![build],
                },
                Stage {
                    name: "Deploy".to_string(),
                    actions: vec![deploy],
                },
            ],
            tags: self.tags(),
        };
        Ok(Resource::new(logical(names::PIPELINE)?, pipeline)?
            .depends_on(&logical(names::PIPELINE_POLICY)?))
    }

    /// Every declared resource
    pub fn resources(&self) -> Result<Vec<Resource>> {
        let mut resources = vec![self.site_bucket()?];
        if self.site.public_read == PublicReadMechanism::BucketPolicy {
            resources.push(self.public_read_policy()?);
        }
        resources.extend([
            self.role(
                names::BUILD_ROLE,
                "build",
                BUILD_SERVICE,
                "Builds the site and publishes it to the bucket",
            )?,
            self.attachment(names::BUILD_POLICY, names::BUILD_ROLE, self.build_policy()?)?,
            self.build_project()?,
            self.role(
                names::PIPELINE_ROLE,
                "pipeline",
                PIPELINE_SERVICE,
                "Runs the delivery pipeline",
            )?,
            self.attachment(
                names::PIPELINE_POLICY,
                names::PIPELINE_ROLE,
                self.pipeline_policy()?,
            )?,
            self.pipeline()?,
        ]);
        Ok(resources)
    }

    /// Exported values
    pub fn outputs(&self) -> Result<Vec<OutputDecl>> {
        let output = |name: &str, value: &str, description: &str| -> Result<OutputDecl> {
            Ok(OutputDecl::new(logical(name)?, Template::parse(value)?).with_description(description))
        };
        Ok(vec![
            output(
                "website_endpoint",
                "http://${site.website_endpoint}",
                "URL of the static website",
            )?,
            output("bucket_id", "${site.id}", "Name of the site bucket")?,
            output("build_role_arn", "${build_role.arn}", "Role assumed by the build")?,
            output(
                "pipeline_role_arn",
                "${pipeline_role.arn}",
                "Role assumed by the pipeline",
            )?,
        ])
    }

    /// Build and validate the plan
    pub fn plan(&self) -> Result<Plan> {
        Plan::build(self.config.clone(), self.resources()?, self.outputs()?)
    }
}
