//! Declarations, validation, planning and reconciliation

pub mod audit;
pub mod blueprint;
pub mod config;
pub mod graph;
pub mod iam;
pub mod outputs;
pub mod plan;
pub mod reconcile;
pub mod resource;
pub mod sim;
pub mod template;
pub mod validation;
