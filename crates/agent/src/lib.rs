//! Autoscaling buffer agent
//!
//! Keeps the buffer priority class and deployment converged on a fixed
//! interval and serves health and metrics endpoints.

pub mod api;
pub mod config;
pub mod runner;

pub use runner::{LoopConfig, ReconcileLoop, ReconcileLoopBuilder};
