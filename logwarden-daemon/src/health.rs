//! Aggregated health check and metrics snapshot reporting.
//!
//! The daemon polls each module's `health_check()` and produces a
//! unified [`DaemonHealth`] report. The overall daemon status is the
//! worst status among all registered modules.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use logwarden_broadcast::HubStatsHandle;
use logwarden_core::pipeline::HealthStatus;
use logwarden_ingest::IngestStatsHandle;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all modules).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-module health reports.
    pub modules: Vec<ModuleHealth>,
}

/// Health status for a single module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// Module name (e.g., "ingest", "broadcast", "notify").
    pub name: String,
    /// Current health status of the module.
    pub status: HealthStatus,
}

/// Metrics snapshot consumed by external metrics exporters and the
/// health event stream.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Current ingestion queue depth.
    pub queue_size: usize,
    /// Age in milliseconds of the oldest queued entry.
    pub oldest_age_ms: u64,
    /// Successfully processed entries.
    pub processed_count: u64,
    /// Failed entries (parse or analysis).
    pub failed_count: u64,
    /// Average processing time per entry in milliseconds.
    pub avg_processing_time_ms: u64,
    /// Currently connected broadcast clients.
    pub active_connections: usize,
}

impl MetricsSnapshot {
    /// Build a snapshot from the module stat handles.
    ///
    /// Either handle may be absent when the corresponding module is
    /// disabled in configuration.
    pub fn collect(
        ingest: Option<&IngestStatsHandle>,
        hub: Option<&HubStatsHandle>,
    ) -> Self {
        let ingest_snapshot = ingest.map(|handle| handle.snapshot());
        Self {
            queue_size: ingest_snapshot.as_ref().map_or(0, |s| s.queue_size),
            oldest_age_ms: ingest_snapshot.as_ref().map_or(0, |s| s.oldest_age_ms),
            processed_count: ingest_snapshot.as_ref().map_or(0, |s| s.processed_count),
            failed_count: ingest_snapshot.as_ref().map_or(0, |s| s.failed_count),
            avg_processing_time_ms: ingest_snapshot
                .as_ref()
                .map_or(0, |s| s.avg_processing_time_ms),
            active_connections: hub.map_or(0, |handle| handle.active_connections()),
        }
    }
}

/// Aggregate multiple module health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for module in modules {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", module.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", module.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}
