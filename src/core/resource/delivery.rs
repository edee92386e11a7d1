//! Build project and delivery pipeline declarations
//!
//! Both are executed by external services. The declarations only carry what the
//! services need to find their roles, inputs and outputs.

use crate::core::template::Template;
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Container environment of a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub image: String,
    pub compute_type: String,
    #[serde(default = "default_environment_type")]
    pub environment_type: String,
}

fn default_environment_type() -> String {
    "LINUX_CONTAINER".to_string()
}

impl BuildEnvironment {
    pub fn new(image: impl Into<String>, compute_type: impl Into<String>) -> Self {
        BuildEnvironment {
            image: image.into(),
            compute_type: compute_type.into(),
            environment_type: default_environment_type(),
        }
    }
}

/// A build project run by the build service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProject {
    pub project_name: String,
    /// ARN of the identity the build runs as
    pub service_role: Template,
    pub environment: BuildEnvironment,
    pub buildspec: String,
    /// Log group name the build writes to
    pub log_group: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl BuildProject {
    pub(crate) fn validate(&self, name: &LogicalName) -> Result<()> {
        non_empty(name, "project name", &self.project_name)?;
        non_empty(name, "build image", &self.environment.image)?;
        non_empty(name, "buildspec", &self.buildspec)?;
        if !self.log_group.starts_with('/') {
            return Err(invalid(name, format!("log group '{}' must start with '/'", self.log_group)));
        }
        if self.service_role.to_string().is_empty() {
            return Err(invalid(name, "build project needs a service role".to_string()));
        }
        Ok(())
    }
}

/// Pipeline action category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCategory {
    Build,
    Deploy,
}

/// One action inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAction {
    pub name: String,
    pub category: ActionCategory,
    /// Provider within the category, e.g. `CodeBuild` or `S3`
    pub provider: String,
    #[serde(default)]
    pub configuration: BTreeMap<String, Template>,
    #[serde(default)]
    pub input_artifacts: Vec<String>,
    #[serde(default)]
    pub output_artifacts: Vec<String>,
}

/// A named group of actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<StageAction>,
}

/// Where the pipeline service keeps artifacts between stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStore {
    /// Name prefix of the service-provisioned artifact buckets
    pub bucket_prefix: String,
}

/// A delivery pipeline run by the orchestration service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPipeline {
    pub pipeline_name: String,
    /// ARN of the identity the pipeline runs as
    pub role_arn: Template,
    pub artifact_store: ArtifactStore,
    /// Artifact fed in by the external source integration
    pub source_artifact: String,
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl DeliveryPipeline {
    pub(crate) fn validate(&self, name: &LogicalName) -> Result<()> {
        non_empty(name, "pipeline name", &self.pipeline_name)?;
        non_empty(name, "source artifact", &self.source_artifact)?;
        non_empty(name, "artifact bucket prefix", &self.artifact_store.bucket_prefix)?;
        if self.stages.is_empty() {
            return Err(invalid(name, "pipeline has no stages".to_string()));
        }

        let mut stage_names = BTreeSet::new();
        let mut action_names = BTreeSet::new();
        let mut available = BTreeSet::from([self.source_artifact.as_str()]);

        for stage in &self.stages {
            non_empty(name, "stage name", &stage.name)?;
            if !stage_names.insert(stage.name.as_str()) {
                return Err(invalid(name, format!("duplicate stage '{}'", stage.name)));
            }
            if stage.actions.is_empty() {
                return Err(invalid(name, format!("stage '{}' has no actions", stage.name)));
            }

            let mut produced = Vec::new();
            for action in &stage.actions {
                non_empty(name, "action name", &action.name)?;
                non_empty(name, "action provider", &action.provider)?;
                if !action_names.insert(action.name.as_str()) {
                    return Err(invalid(name, format!("duplicate action '{}'", action.name)));
                }
                // Artifacts flow forward only: inputs come from the source or earlier stages
                for input in &action.input_artifacts {
                    if !available.contains(input.as_str()) {
                        return Err(invalid(
                            name,
                            format!("action '{}' consumes unknown artifact '{}'", action.name, input),
                        ));
                    }
                }
                produced.extend(action.output_artifacts.iter().map(String::as_str));
            }
            for artifact in produced {
                if !available.insert(artifact) {
                    return Err(invalid(name, format!("artifact '{}' produced twice", artifact)));
                }
            }
        }
        Ok(())
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }
}

fn non_empty(name: &LogicalName, what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(name, format!("{} cannot be empty", what)));
    }
    Ok(())
}

fn invalid(name: &LogicalName, reason: String) -> PlanError {
    PlanError::InvalidResource {
        name: name.clone(),
        reason,
    }
}
