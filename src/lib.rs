//! # siteplan - static website and delivery pipeline plans
//!
//! `siteplan` declares a static website bucket, a two-stage delivery pipeline and
//! the roles that run it, then orders and validates the declarations:
//!
//! - **Typed resources** whose fields reference each other's computed attributes
//! - **Dependency graph** with deterministic creation order and cycle detection
//! - **Least-privilege policies** composed from per-role requirements
//! - **Reconciliation** against any [`Provisioner`], with persisted [`State`]
//!
//! ## Quick Start
//!
//! ```rust
//! use siteplan::{MemoryCloud, PlanConfig, Reconciler, SiteConfig, State, StaticSitePipeline};
//!
//! # fn main() -> siteplan::Result<()> {
//! let config = PlanConfig::new("us-east-1", "123456789012");
//! let site = SiteConfig::new("docs", "docs.example.com");
//!
//! let blueprint = StaticSitePipeline::new(config.clone(), site)?;
//! let plan = blueprint.plan()?;
//!
//! let mut cloud = MemoryCloud::new(config);
//! let mut state = State::new();
//! let report = Reconciler::new(&mut cloud).apply(&plan, &mut state);
//! assert!(report.is_success());
//!
//! let outputs = siteplan::Exports::resolve(plan.outputs(), |r| state.attribute(r))?;
//! assert_eq!(
//!     outputs.get("website_endpoint"),
//!     Some("http://docs.example.com.s3-website-us-east-1.amazonaws.com")
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Loading settings
//!
//! ```rust,no_run
//! use siteplan::{Settings, StaticSitePipeline};
//!
//! # fn main() -> siteplan::Result<()> {
//! let settings = Settings::load("site.toml")?;
//! let plan = StaticSitePipeline::from_settings(settings)?.plan()?;
//! for level in plan.levels() {
//!     println!("{:?}", level);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    audit::{AuditEntry, AuditLogger, Operation},
    blueprint::StaticSitePipeline,
    config::{BuildSettings, PlanConfig, PublicReadMechanism, Settings, SiteConfig},
    graph::{
        lint::{Finding, FindingKind, Severity},
        ResourceGraph,
    },
    iam::{
        Action, DocumentPurpose, Effect, PatternMatcher, PermissionStatement, PolicyComposer,
        PolicyDocument, PolicyEngine, Principal, Requirement, ResourcePattern, Statement, Target,
        TrustStatement,
    },
    outputs::{Exports, OutputDecl},
    plan::Plan,
    reconcile::{ApplyReport, MaterializedResource, Outcome, Provisioner, Reconciler, State},
    resource::{
        DeclaredResource, IdentityLifecycle, IdentityState, RenderedResource, Resource,
        ResourceBody, ResourceKind,
    },
    sim::{MemoryCloud, WebsiteResponse},
    template::{Reference, Template},
    validation::{BucketName, LogicalName},
};
pub use crate::error::{PlanError, ProvisionError, Result};
