//! Reconciliation against an external provisioner
//!
//! [`Reconciler::apply`] walks a plan in creation order:
//!
//! 1. Resources in state but no longer declared are destroyed, dependents first.
//!    One that a declared resource still lists as a dependency waits until that
//!    resource has been rewritten, and is skipped if it never is.
//! 2. Each declared resource is rendered from state. A reference whose target
//!    has not reported the attribute yet defers the resource to a retry queue.
//! 3. Unchanged fingerprints skip the provisioner entirely. Otherwise the resource
//!    is created, updated, or replaced when its kind changed.
//! 4. A failure marks the resource and every transitive dependent as skipped.
//!    Independent branches continue.
//!
//! Identity lifecycles are advanced as trust and permission bindings materialize.

pub mod state;

pub use state::{Attributes, MaterializedResource, State};

use crate::core::audit::{AuditEntry, AuditLogger, Operation};
use crate::core::plan::Plan;
use crate::core::resource::{
    IdentityLifecycle, IdentityState, RenderedResource, Resource, ResourceBody,
};
use crate::core::template::Reference;
use crate::core::validation::LogicalName;
use crate::error::ProvisionError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

/// The external engine that materializes rendered resources
pub trait Provisioner {
    /// Create a resource and report its attributes
    fn create(&mut self, resource: &RenderedResource) -> Result<Attributes, ProvisionError>;

    /// Bring an existing resource in line with a new rendering
    fn update(
        &mut self,
        resource: &RenderedResource,
        current: &MaterializedResource,
    ) -> Result<Attributes, ProvisionError>;

    /// Remove a materialized resource
    fn destroy(&mut self, resource: &MaterializedResource) -> Result<(), ProvisionError>;
}

/// What happened to one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Destroyed and created again because its kind changed
    Replaced,
    Unchanged,
    Destroyed,
    /// Not attempted because a dependency failed or was skipped
    Skipped { blocked_by: LogicalName },
    Failed(ProvisionError),
    /// A reference never became resolvable
    Unresolved(Reference),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Skipped { .. } | Outcome::Failed(_) | Outcome::Unresolved(_)
        )
    }

    fn is_change(&self) -> bool {
        matches!(
            self,
            Outcome::Created | Outcome::Updated | Outcome::Replaced | Outcome::Destroyed
        )
    }
}

/// Result of one apply or teardown
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    outcomes: Vec<(LogicalName, Outcome)>,
    identities: BTreeMap<LogicalName, IdentityState>,
}

impl ApplyReport {
    fn record(&mut self, name: &LogicalName, outcome: Outcome) {
        self.outcomes.push((name.clone(), outcome));
    }

    /// Outcomes in the order they happened
    pub fn outcomes(&self) -> &[(LogicalName, Outcome)] {
        &self.outcomes
    }

    /// Latest outcome for a resource
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, o)| o)
    }

    /// Final lifecycle state of each declared identity
    pub fn identities(&self) -> &BTreeMap<LogicalName, IdentityState> {
        &self.identities
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| !o.is_failure())
    }

    /// Number of resources created, updated, replaced or destroyed
    pub fn changes(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_change()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &(LogicalName, Outcome)> {
        self.outcomes.iter().filter(|(_, o)| o.is_failure())
    }
}

/// Drives a provisioner to match a plan
pub struct Reconciler<'p, P: Provisioner> {
    provisioner: &'p mut P,
    audit: AuditLogger,
}

impl<'p, P: Provisioner> Reconciler<'p, P> {
    pub fn new(provisioner: &'p mut P) -> Self {
        Reconciler {
            provisioner,
            audit: AuditLogger::default(),
        }
    }

    /// Record into a shared audit trail
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Materialize `plan`, updating `state` as resources succeed
    pub fn apply(&mut self, plan: &Plan, state: &mut State) -> ApplyReport {
        let mut report = ApplyReport::default();
        let graph = plan.graph();
        info!(resources = graph.len(), serial = state.serial(), "Applying plan");

        let orphans: BTreeSet<LogicalName> = state
            .names()
            .filter(|n| !graph.contains(n))
            .cloned()
            .collect();
        let held = self.teardown(state, &orphans, &mut report, false);

        let mut lifecycles: BTreeMap<LogicalName, IdentityLifecycle> = graph
            .resources()
            .filter(|r| matches!(r.body(), ResourceBody::Identity(_)))
            .map(|r| (r.name().clone(), IdentityLifecycle::new(r.name().clone())))
            .collect();

        let mut blocked: BTreeSet<LogicalName> = BTreeSet::new();
        // Deferred resources and everything waiting on them
        let mut pending: BTreeSet<LogicalName> = BTreeSet::new();
        let mut deferred: BTreeMap<LogicalName, Reference> = BTreeMap::new();
        let mut queue: VecDeque<&Resource> = graph.resources().collect();

        // Each pass keeps creation order; stop once a pass settles nothing
        loop {
            let mut progressed = false;
            let mut retry = VecDeque::new();

            while let Some(resource) = queue.pop_front() {
                let name = resource.name();
                let deps = graph.dependencies_of(name);

                if let Some(dep) = deps.iter().find(|d| blocked.contains(*d)) {
                    self.skip(resource, dep, &mut report);
                    blocked.insert(name.clone());
                    pending.remove(name);
                    progressed = true;
                    continue;
                }
                if deps.iter().any(|d| pending.contains(d)) {
                    pending.insert(name.clone());
                    retry.push_back(resource);
                    continue;
                }

                let rendered = match resource.render(|r| state.attribute(r)) {
                    Ok(rendered) => rendered,
                    Err(missing) => {
                        if deferred.insert(name.clone(), missing.0.clone()).is_none() {
                            debug!(resource = %name, reference = %missing.0, "Deferring resource");
                            self.log(Operation::Defer, resource, Some(missing.0.to_string()));
                        }
                        pending.insert(name.clone());
                        retry.push_back(resource);
                        continue;
                    }
                };
                deferred.remove(name);
                pending.remove(name);
                progressed = true;

                let outcome = self.materialize(resource, rendered, deps, state);
                if outcome.is_failure() {
                    blocked.insert(name.clone());
                } else {
                    advance_lifecycles(resource, &mut lifecycles, &self.audit);
                }
                report.record(name, outcome);
            }

            queue = retry;
            if queue.is_empty() || !progressed {
                break;
            }
        }

        // Whatever is left never resolved, or waits on something that never did
        for resource in queue {
            let name = resource.name();
            match deferred.remove(name) {
                Some(reference) => {
                    warn!(resource = %name, %reference, "Reference never resolved");
                    self.log(Operation::Fail, resource, Some(format!("unresolved {}", reference)));
                    report.record(name, Outcome::Unresolved(reference));
                }
                None => {
                    let deps = graph.dependencies_of(name);
                    if let Some(dep) = deps.iter().find(|d| blocked.contains(*d)) {
                        self.skip(resource, dep, &mut report);
                    }
                }
            }
            blocked.insert(name.clone());
        }

        // Orphans whose dependents have now dropped them
        if !held.is_empty() {
            self.teardown(state, &held, &mut report, true);
        }

        report.identities = lifecycles
            .into_iter()
            .map(|(name, lifecycle)| (name, lifecycle.state()))
            .collect();

        if report.changes() > 0 {
            state.bump_serial();
        }
        info!(
            changes = report.changes(),
            failures = report.failures().count(),
            serial = state.serial(),
            "Apply finished"
        );
        report
    }

    /// Destroy everything in `state`, dependents first
    pub fn destroy_all(&mut self, state: &mut State) -> ApplyReport {
        let mut report = ApplyReport::default();
        let all: BTreeSet<LogicalName> = state.names().cloned().collect();
        info!(resources = all.len(), "Destroying all resources");
        self.teardown(state, &all, &mut report, true);
        if report.changes() > 0 {
            state.bump_serial();
        }
        report
    }

    fn materialize(
        &mut self,
        resource: &Resource,
        rendered: RenderedResource,
        dependencies: BTreeSet<LogicalName>,
        state: &mut State,
    ) -> Outcome {
        let name = resource.name();
        let result = match state.get(name) {
            Some(current) if current.kind == rendered.kind => {
                if current.fingerprint == rendered.fingerprint {
                    debug!(resource = %name, "Unchanged");
                    self.log(Operation::Unchanged, resource, None);
                    if current.dependencies != dependencies {
                        let mut refreshed = current.clone();
                        refreshed.dependencies = dependencies;
                        state.insert(refreshed);
                    }
                    return Outcome::Unchanged;
                }
                self.provisioner
                    .update(&rendered, current)
                    .map(|attrs| (attrs, Operation::Update, Outcome::Updated))
            }
            Some(current) => {
                let current = current.clone();
                match self.provisioner.destroy(&current) {
                    Ok(()) => {
                        state.remove(name);
                        self.provisioner
                            .create(&rendered)
                            .map(|attrs| (attrs, Operation::Create, Outcome::Replaced))
                    }
                    Err(e) => Err(e),
                }
            }
            None => self
                .provisioner
                .create(&rendered)
                .map(|attrs| (attrs, Operation::Create, Outcome::Created)),
        };

        match result {
            Ok((attributes, operation, outcome)) => {
                info!(resource = %name, kind = %rendered.kind, ?outcome, "Materialized");
                self.log(operation, resource, None);
                state.insert(MaterializedResource::new(rendered, attributes, dependencies));
                outcome
            }
            Err(error) => {
                warn!(resource = %name, %error, "Provisioner failed");
                self.log(Operation::Fail, resource, Some(error.to_string()));
                Outcome::Failed(error)
            }
        }
    }

    /// Destroy `subset` dependents first, never removing something another resource
    /// in state still depends on
    ///
    /// When `settle` is false a resource that is still depended on is returned
    /// instead of reported, so the caller can retry it after the dependent changed.
    fn teardown(
        &mut self,
        state: &mut State,
        subset: &BTreeSet<LogicalName>,
        report: &mut ApplyReport,
        settle: bool,
    ) -> BTreeSet<LogicalName> {
        let mut held = BTreeSet::new();

        for name in state.destroy_order(subset) {
            let Some(current) = state.get(&name).cloned() else {
                continue;
            };
            if let Some(dependent) = state.dependent_of(&name).cloned() {
                if settle {
                    warn!(resource = %name, %dependent, "Not destroying, dependent still exists");
                    self.audit.log(
                        AuditEntry::new(Operation::Skip, name.clone())
                            .with_kind(current.kind)
                            .with_detail(format!("blocked by {}", dependent)),
                    );
                    report.record(&name, Outcome::Skipped { blocked_by: dependent });
                } else {
                    debug!(resource = %name, %dependent, "Destroy waits for dependent");
                    held.insert(name);
                }
                continue;
            }

            match self.provisioner.destroy(&current) {
                Ok(()) => {
                    info!(resource = %name, kind = %current.kind, "Destroyed");
                    self.audit
                        .log(AuditEntry::new(Operation::Destroy, name.clone()).with_kind(current.kind));
                    state.remove(&name);
                    report.record(&name, Outcome::Destroyed);
                }
                Err(error) => {
                    warn!(resource = %name, %error, "Destroy failed");
                    self.audit.log(
                        AuditEntry::new(Operation::Fail, name.clone())
                            .with_kind(current.kind)
                            .with_detail(error.to_string()),
                    );
                    report.record(&name, Outcome::Failed(error));
                }
            }
        }
        held
    }

    fn skip(&self, resource: &Resource, blocked_by: &LogicalName, report: &mut ApplyReport) {
        warn!(resource = %resource.name(), %blocked_by, "Skipping resource");
        self.log(Operation::Skip, resource, Some(format!("blocked by {}", blocked_by)));
        report.record(
            resource.name(),
            Outcome::Skipped {
                blocked_by: blocked_by.clone(),
            },
        );
    }

    fn log(&self, operation: Operation, resource: &Resource, detail: Option<String>) {
        self.audit
            .log_resource_op(operation, resource.name(), resource.kind(), detail);
    }
}

/// Move identity lifecycles forward after `resource` materialized
fn advance_lifecycles(
    resource: &Resource,
    lifecycles: &mut BTreeMap<LogicalName, IdentityLifecycle>,
    audit: &AuditLogger,
) {
    let (identity, inline) = match resource.body() {
        ResourceBody::Identity(identity) => (resource.name(), identity.inline_policy.is_some()),
        ResourceBody::PolicyAttachment(attachment) => match attachment.target() {
            Some(target) => (target, true),
            None => return,
        },
        _ => return,
    };
    let Some(lifecycle) = lifecycles.get_mut(identity) else {
        return;
    };

    let result = (|| {
        if identity == resource.name() && lifecycle.state() == IdentityState::Declared {
            lifecycle.bind_trust()?;
        }
        if inline && lifecycle.state() == IdentityState::TrustBound {
            lifecycle.bind_permissions(resource.name())?;
            lifecycle.activate()?;
        }
        Ok::<_, crate::error::PlanError>(())
    })();

    match result {
        Ok(()) => audit.log(
            AuditEntry::new(Operation::Bind, identity.clone())
                .with_detail(lifecycle.state().to_string()),
        ),
        Err(error) => warn!(%identity, %error, "Identity lifecycle"),
    }
}
