//! HTTP middleware shared by the workspace services.

pub mod metrics;
pub mod signature;
pub mod tracing;
