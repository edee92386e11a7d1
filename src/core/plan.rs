//! Validated plans
//!
//! A [`Plan`] is the product of graph building and cross-resource checks. Anything
//! that would make the declarations unusable fails here, before a provisioner
//! sees a single request.

use crate::core::config::PlanConfig;
use crate::core::graph::lint::{self, Finding, Severity};
use crate::core::graph::ResourceGraph;
use crate::core::outputs::OutputDecl;
use crate::core::resource::{DeclaredResource, Resource};
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use std::collections::BTreeSet;
use tracing::info;

/// Ordered, validated resource declarations plus outputs
#[derive(Debug, Clone)]
pub struct Plan {
    config: PlanConfig,
    graph: ResourceGraph,
    outputs: Vec<OutputDecl>,
    findings: Vec<Finding>,
}

impl Plan {
    /// Validate config, graph, outputs and cross-resource rules
    pub fn build(
        config: PlanConfig,
        resources: impl IntoIterator<Item = Resource>,
        outputs: Vec<OutputDecl>,
    ) -> Result<Self> {
        config.check()?;
        let graph = ResourceGraph::build(resources)?;
        check_outputs(&graph, &outputs)?;
        let findings = lint::check(&graph)?;

        let plan = Plan {
            config,
            graph,
            outputs,
            findings,
        };
        info!(
            resources = plan.graph.len(),
            levels = plan.levels().len(),
            warnings = plan.warnings().count(),
            "Plan built"
        );
        Ok(plan)
    }

    /// Build from persisted declarations
    pub fn from_declared(
        config: PlanConfig,
        declared: Vec<DeclaredResource>,
        outputs: Vec<OutputDecl>,
    ) -> Result<Self> {
        let resources = declared
            .into_iter()
            .map(Resource::from_declared)
            .collect::<Result<Vec<_>>>()?;
        Self::build(config, resources, outputs)
    }

    /// Persisted declarations in creation order
    pub fn to_declared(&self) -> Vec<DeclaredResource> {
        self.graph.resources().map(Resource::to_declared).collect()
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Creation order
    pub fn order(&self) -> &[LogicalName] {
        self.graph.order()
    }

    /// Groups that may be materialized in parallel
    pub fn levels(&self) -> Vec<Vec<LogicalName>> {
        self.graph.levels()
    }

    pub fn outputs(&self) -> &[OutputDecl] {
        &self.outputs
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }
}

fn check_outputs(graph: &ResourceGraph, outputs: &[OutputDecl]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for output in outputs {
        if !seen.insert(&output.name) {
            return Err(PlanError::DuplicateName(output.name.clone()));
        }
        for reference in output.value.references() {
            let target = graph
                .get(&reference.resource)
                .ok_or_else(|| PlanError::UnknownResource {
                    from: output.name.clone(),
                    to: reference.resource.clone(),
                })?;
            if !target.kind().exports(&reference.attribute) {
                return Err(PlanError::UnknownAttribute {
                    from: output.name.clone(),
                    reference: reference.clone(),
                });
            }
        }
    }
    Ok(())
}
