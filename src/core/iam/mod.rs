//! Identity and access policies
//!
//! - [`action`]: the per-service action catalog
//! - [`pattern`]: resource address globbing and scope checks
//! - [`policy`]: typed permission and trust documents in AWS JSON
//! - [`compose`]: least-privilege document composition
//! - [`engine`]: request evaluation with an LRU decision cache

pub mod action;
pub mod compose;
pub mod engine;
pub mod pattern;
pub mod policy;

pub use action::{AccessLevel, Action, ResourceLevel, Service};
pub use compose::{PolicyComposer, Requirement, Target};
pub use engine::PolicyEngine;
pub use pattern::{PatternMatcher, ResourcePattern};
pub use policy::{
    DocumentPurpose, Effect, PermissionStatement, PolicyDocument, Principal, Statement,
    TrustStatement, POLICY_VERSION,
};
