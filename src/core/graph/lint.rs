//! Cross-resource checks on a built graph
//!
//! Some rules span several resources and cannot be checked on one declaration:
//!
//! - an identity gets its permissions from at most one document (error)
//! - a bucket is made public through its ACL or a bucket policy, not both (error)
//! - attachments and bucket policies point at resources of the right kind (error)
//! - two identities writing to the same bucket (warning)
//! - a resource using an identity without waiting for its permission binding (warning)
//!
//! Public-read grants and unrestricted telemetry grants are reported as `Info` so
//! that they stay visible in review.

use super::ResourceGraph;
use crate::core::iam::{PolicyDocument, ResourcePattern};
use crate::core::resource::{ResourceBody, ResourceKind};
use crate::core::template::Template;
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

/// How serious a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
}

/// What a finding is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FindingKind {
    /// More than one identity may write objects into the bucket
    SharedWriteAccess {
        bucket: LogicalName,
        identities: Vec<LogicalName>,
    },
    /// `resource` uses `identity` but does not depend on the resource that binds
    /// its permissions, so it may run before the identity is active
    IdentityUsedBeforeActive {
        resource: LogicalName,
        identity: LogicalName,
        binding: LogicalName,
    },
    /// Objects in the bucket are world-readable
    PublicRead {
        bucket: LogicalName,
        via: LogicalName,
    },
    /// An identity holds actions on `*`
    UnrestrictedGrant {
        identity: LogicalName,
        actions: Vec<String>,
    },
}

/// A non-fatal observation about the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: FindingKind,
}

impl Finding {
    fn warning(kind: FindingKind) -> Self {
        Finding {
            severity: Severity::Warning,
            kind,
        }
    }

    fn info(kind: FindingKind) -> Self {
        Finding {
            severity: Severity::Info,
            kind,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FindingKind::SharedWriteAccess { bucket, identities } => {
                let names: Vec<&str> = identities.iter().map(LogicalName::as_str).collect();
                write!(f, "bucket '{}' is writable by {}", bucket, names.join(", "))
            }
            FindingKind::IdentityUsedBeforeActive {
                resource,
                identity,
                binding,
            } => write!(
                f,
                "'{}' uses identity '{}' without depending on '{}'",
                resource, identity, binding
            ),
            FindingKind::PublicRead { bucket, via } => {
                write!(f, "bucket '{}' is publicly readable via '{}'", bucket, via)
            }
            FindingKind::UnrestrictedGrant { identity, actions } => write!(
                f,
                "identity '{}' holds {} on '*'",
                identity,
                actions.join(", ")
            ),
        }
    }
}

/// Run every check, failing on the first structural error
pub fn check(graph: &ResourceGraph) -> Result<Vec<Finding>> {
    let bindings = permission_bindings(graph)?;
    let mut findings = Vec::new();

    public_read(graph, &mut findings)?;
    shared_write_access(graph, &bindings, &mut findings);
    identity_use(graph, &bindings, &mut findings);
    unrestricted_grants(&bindings, &mut findings);

    for finding in &findings {
        match finding.severity {
            Severity::Warning => warn!(%finding, "Plan finding"),
            Severity::Info => info!(%finding, "Plan finding"),
        }
    }
    Ok(findings)
}

/// The permission document bound to an identity and where it comes from
struct Binding<'a> {
    source: LogicalName,
    document: &'a PolicyDocument,
}

fn permission_bindings(graph: &ResourceGraph) -> Result<BTreeMap<LogicalName, Binding<'_>>> {
    let mut sources: BTreeMap<LogicalName, Vec<Binding<'_>>> = BTreeMap::new();

    for resource in graph.resources() {
        match resource.body() {
            ResourceBody::Identity(identity) => {
                let entry = sources.entry(resource.name().clone()).or_default();
                if let Some(inline) = &identity.inline_policy {
                    entry.push(Binding {
                        source: resource.name().clone(),
                        document: &inline.document,
                    });
                }
            }
            ResourceBody::PolicyAttachment(attachment) => {
                let target = expect_kind(
                    graph,
                    resource.name(),
                    attachment.target(),
                    ResourceKind::Identity,
                )?;
                sources.entry(target.clone()).or_default().push(Binding {
                    source: resource.name().clone(),
                    document: &attachment.policy,
                });
            }
            _ => {}
        }
    }

    let mut out = BTreeMap::new();
    for (identity, mut bound) in sources {
        if bound.len() > 1 {
            let mut documents: Vec<LogicalName> = bound.iter().map(|b| b.source.clone()).collect();
            documents.sort();
            return Err(PlanError::MultiplePermissionDocuments { identity, documents });
        }
        if let Some(binding) = bound.pop() {
            out.insert(identity, binding);
        }
    }
    Ok(out)
}

fn expect_kind<'g>(
    graph: &'g ResourceGraph,
    from: &LogicalName,
    target: Option<&'g LogicalName>,
    kind: ResourceKind,
) -> Result<&'g LogicalName> {
    let target = target.ok_or_else(|| PlanError::InvalidResource {
        name: from.clone(),
        reason: format!("does not reference a {}", kind),
    })?;
    match graph.get(target) {
        Some(resource) if resource.kind() == kind => Ok(target),
        _ => Err(PlanError::InvalidResource {
            name: from.clone(),
            reason: format!("'{}' is not a {}", target, kind),
        }),
    }
}

fn public_read(graph: &ResourceGraph, findings: &mut Vec<Finding>) -> Result<()> {
    let mut policies: BTreeMap<&LogicalName, &LogicalName> = BTreeMap::new();

    for resource in graph.resources() {
        let ResourceBody::BucketPolicy(policy) = resource.body() else {
            continue;
        };
        let bucket = expect_kind(graph, resource.name(), policy.target(), ResourceKind::Bucket)?;
        if let Some(existing) = policies.insert(bucket, resource.name()) {
            return Err(PlanError::InvalidResource {
                name: resource.name().clone(),
                reason: format!("bucket '{}' already has policy '{}'", bucket, existing),
            });
        }
        if !policy.policy.grants_public_read() {
            continue;
        }

        let acl_public = matches!(
            graph.get(bucket).map(|r| r.body()),
            Some(ResourceBody::Bucket(b)) if b.is_public_read()
        );
        if acl_public {
            return Err(PlanError::ConflictingPublicRead {
                bucket: bucket.clone(),
                policy: resource.name().clone(),
            });
        }
        findings.push(Finding::info(FindingKind::PublicRead {
            bucket: bucket.clone(),
            via: resource.name().clone(),
        }));
    }

    for resource in graph.resources() {
        if let ResourceBody::Bucket(bucket) = resource.body() {
            if bucket.is_public_read() {
                findings.push(Finding::info(FindingKind::PublicRead {
                    bucket: resource.name().clone(),
                    via: resource.name().clone(),
                }));
            }
        }
    }
    Ok(())
}

fn shared_write_access(
    graph: &ResourceGraph,
    bindings: &BTreeMap<LogicalName, Binding<'_>>,
    findings: &mut Vec<Finding>,
) {
    // Physical bucket name -> logical name, for literal ARNs
    let buckets: BTreeMap<&str, &LogicalName> = graph
        .resources()
        .filter_map(|r| match r.body() {
            ResourceBody::Bucket(b) => Some((b.bucket.as_str(), r.name())),
            _ => None,
        })
        .collect();

    let mut writers: BTreeMap<&LogicalName, BTreeSet<LogicalName>> = BTreeMap::new();
    for (identity, binding) in bindings {
        for resource in binding.document.write_resources() {
            if let Some(bucket) = written_bucket(graph, &buckets, resource) {
                writers.entry(bucket).or_default().insert(identity.clone());
            }
        }
    }

    for (bucket, identities) in writers {
        if identities.len() > 1 {
            findings.push(Finding::warning(FindingKind::SharedWriteAccess {
                bucket: bucket.clone(),
                identities: identities.into_iter().collect(),
            }));
        }
    }
}

fn written_bucket<'g>(
    graph: &'g ResourceGraph,
    buckets: &BTreeMap<&str, &'g LogicalName>,
    address: &Template,
) -> Option<&'g LogicalName> {
    if let Some(reference) = address.references().next() {
        let resource = graph.get(&reference.resource)?;
        return (resource.kind() == ResourceKind::Bucket).then(|| resource.name());
    }
    let text = address.as_literal()?;
    let (_, rest) = text.split_once(":s3:::")?;
    let name = rest.split('/').next()?;
    buckets.get(name).copied()
}

fn identity_use(
    graph: &ResourceGraph,
    bindings: &BTreeMap<LogicalName, Binding<'_>>,
    findings: &mut Vec<Finding>,
) {
    for resource in graph.resources() {
        let used: BTreeSet<&LogicalName> = resource
            .references()
            .iter()
            .map(|r| &r.resource)
            .filter(|n| graph.get(n).map(|r| r.kind()) == Some(ResourceKind::Identity))
            .collect();

        for identity in used {
            let Some(binding) = bindings.get(identity) else {
                continue;
            };
            // Inline documents are bound when the identity is created
            if &binding.source == identity || &binding.source == resource.name() {
                continue;
            }
            if !graph
                .transitive_dependencies(resource.name())
                .contains(&binding.source)
            {
                findings.push(Finding::warning(FindingKind::IdentityUsedBeforeActive {
                    resource: resource.name().clone(),
                    identity: identity.clone(),
                    binding: binding.source.clone(),
                }));
            }
        }
    }
}

fn unrestricted_grants(bindings: &BTreeMap<LogicalName, Binding<'_>>, findings: &mut Vec<Finding>) {
    for (identity, binding) in bindings {
        let actions: BTreeSet<String> = binding
            .document
            .permission_statements()
            .filter(|s| {
                s.resources
                    .iter()
                    .any(|r| ResourcePattern::classify(r).ok() == Some(ResourcePattern::Any))
            })
            .flat_map(|s| s.actions.iter().map(ToString::to_string))
            .collect();
        if !actions.is_empty() {
            findings.push(Finding::info(FindingKind::UnrestrictedGrant {
                identity: identity.clone(),
                actions: actions.into_iter().collect(),
            }));
        }
    }
}
