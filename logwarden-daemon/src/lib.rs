//! Logwarden daemon library.
//!
//! Exposed as a library so integration tests can drive the full
//! orchestrated pipeline without spawning a process.

pub mod cli;
pub mod collaborators;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;

pub use health::{DaemonHealth, MetricsSnapshot, ModuleHealth};
pub use orchestrator::Orchestrator;
