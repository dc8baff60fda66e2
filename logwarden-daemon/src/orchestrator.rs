//! Module orchestration -- assembly, channel wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `logwarden-daemon`.
//! It loads configuration, creates inter-module channels, builds enabled
//! modules, manages startup/shutdown ordering, watches the config file
//! for hot reload, and runs the main event loop.
//!
//! # Startup Order (producers before consumers)
//!
//! 1. Ingest pipeline (produces HubEvents and ResultEvents)
//! 2. Broadcast hub (consumes HubEvents)
//! 3. Notification dispatcher (consumes ResultEvents)
//!
//! # Shutdown Order (same as startup - producers first)
//!
//! Stopping the ingest pipeline first lets the hub and the dispatcher
//! drain their channels before they stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::Watcher as _;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use logwarden_broadcast::{BroadcastHubBuilder, HubConfig, HubConnector, HubStatsHandle};
use logwarden_core::config::LogwardenConfig;
use logwarden_core::event::{HubEvent, ResultEvent};
use logwarden_core::metrics as m;
use logwarden_core::plugin::PluginRegistry;
use logwarden_ingest::{IngestConfig, IngestPipelineBuilder, IngestStatsHandle};
use logwarden_notify::{DispatcherConfig, DispatcherHandle, NotificationDispatcherBuilder};

use crate::collaborators::{FilePersistence, KeywordAnalyzer, LogChannel, PlainParser};
use crate::health::{DaemonHealth, MetricsSnapshot, ModuleHealth, aggregate_status};
use crate::metrics_server;

/// Channel capacity for processing results (ingest -> dispatcher).
const RESULT_CHANNEL_CAPACITY: usize = 256;
/// Interval between health report broadcasts.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
/// Debounce window applied to config file change notifications.
const CONFIG_RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: LogwardenConfig,
    config_path: Option<PathBuf>,
    /// Registry of all modules (ordered for start/stop).
    plugins: PluginRegistry,
    ingest_stats: Option<IngestStatsHandle>,
    hub_stats: Option<HubStatsHandle>,
    hub_connector: Option<HubConnector>,
    dispatcher_handle: Option<DispatcherHandle>,
    hub_event_tx: Option<mpsc::Sender<HubEvent>>,
    /// Config snapshot publisher for hot reload.
    config_tx: watch::Sender<Arc<LogwardenConfig>>,
    /// Shutdown broadcast sender (signals all auxiliary tasks).
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
    aux_tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogwardenConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config, Some(config_path.to_path_buf())).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// When `config_path` is `None`, config-file hot reload is disabled.
    pub async fn build_from_config(
        config: LogwardenConfig,
        config_path: Option<PathBuf>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before module initialization
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        tracing::debug!("creating inter-module channels");
        let (config_tx, config_rx) = watch::channel(Arc::new(config.clone()));
        let (result_tx, result_rx) = mpsc::channel::<ResultEvent>(RESULT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(16);

        let mut plugins = PluginRegistry::new();

        // Broadcast hub (built first so the ingest pipeline can be
        // handed its event sender; registered after ingest so producers
        // start first)
        let mut hub = None;
        let mut hub_event_tx = None;
        let mut hub_stats = None;
        let mut hub_connector = None;
        if config.broadcast.enabled {
            tracing::info!("initializing broadcast hub");
            let (built_hub, event_tx) = BroadcastHubBuilder::new()
                .config(HubConfig::from_core(&config))
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build broadcast hub: {}", e))?;
            hub_stats = Some(built_hub.stats_handle());
            hub_connector = Some(built_hub.connector());
            hub_event_tx = Some(event_tx);
            hub = Some(built_hub);
        }

        // Default collaborators (see collaborators.rs)
        let persistence = Arc::new(
            FilePersistence::open(&config.general.data_dir)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open data dir: {}", e))?,
        );

        // Ingest pipeline
        tracing::info!("initializing ingest pipeline");
        let mut ingest_builder = IngestPipelineBuilder::new()
            .config(IngestConfig::from_core(&config))
            .parser(Arc::new(PlainParser::new()))
            .analyzer(Arc::new(KeywordAnalyzer))
            .persistence(persistence)
            .result_sender(result_tx)
            .config_updates(config_rx);
        if let Some(event_tx) = &hub_event_tx {
            ingest_builder = ingest_builder.hub_sender(event_tx.clone());
        }
        let (ingest, _) = ingest_builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build ingest pipeline: {}", e))?;
        let ingest_stats = Some(ingest.stats_handle());
        plugins
            .register(Box::new(ingest))
            .map_err(|e| anyhow::anyhow!("failed to register ingest pipeline: {}", e))?;

        if let Some(hub) = hub {
            plugins
                .register(Box::new(hub))
                .map_err(|e| anyhow::anyhow!("failed to register broadcast hub: {}", e))?;
        }

        // Notification dispatcher
        let mut dispatcher_handle = None;
        if config.notification.enabled {
            tracing::info!("initializing notification dispatcher");
            let dispatcher = NotificationDispatcherBuilder::new()
                .config(DispatcherConfig::from_core(&config))
                .channel(Arc::new(LogChannel::new("log")))
                .result_receiver(result_rx)
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build dispatcher: {}", e))?;
            dispatcher_handle = Some(dispatcher.handle());
            plugins
                .register(Box::new(dispatcher))
                .map_err(|e| anyhow::anyhow!("failed to register dispatcher: {}", e))?;
        } else {
            // Without a dispatcher someone must consume results to keep
            // the producers from erroring on a closed channel.
            tracing::debug!("notification disabled, spawning result drain task");
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(drain_results(result_rx, shutdown_rx));
        }

        tracing::info!(total_plugins = plugins.count(), "orchestrator initialized");
        if config.metrics.enabled {
            record_daemon_metrics(plugins.count());
        }

        Ok(Self {
            config,
            config_path,
            plugins,
            ingest_stats,
            hub_stats,
            hub_connector,
            dispatcher_handle,
            hub_event_tx,
            config_tx,
            shutdown_tx,
            start_time: Instant::now(),
            aux_tasks: Vec::new(),
        })
    }

    /// Start all modules and auxiliary tasks.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting all modules");
        if let Err(e) = self.plugins.start_all().await {
            // Rollback: stop any modules that were successfully started
            tracing::warn!("startup failed, rolling back already-started modules");
            if let Err(stop_err) = self.plugins.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            return Err(e.into());
        }

        // Config file hot reload
        if let Some(config_path) = &self.config_path {
            self.aux_tasks.push(spawn_config_watch(
                config_path.clone(),
                self.config_tx.clone(),
                self.dispatcher_handle.clone(),
                self.shutdown_tx.subscribe(),
            ));
        }

        // Periodic health reporting
        self.aux_tasks.push(spawn_health_reporter(
            self.start_time,
            self.ingest_stats.clone(),
            self.hub_stats.clone(),
            self.hub_event_tx.clone(),
            self.shutdown_tx.subscribe(),
        ));

        Ok(())
    }

    /// Stop auxiliary tasks and all modules (producers first).
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("broadcasting shutdown signal");
        let _ = self.shutdown_tx.send(());

        for mut task in self.aux_tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                tracing::warn!("auxiliary task did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!("stopping all modules");
        self.plugins.stop_all().await.map_err(|e| e.into())
    }

    /// Start all modules and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        if !self.config.general.pid_file.is_empty() {
            write_pid_file(Path::new(&self.config.general.pid_file))?;
        }

        if let Err(e) = self.start().await {
            self.cleanup_pid_file();
            return Err(e);
        }

        tracing::info!("entering main event loop");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        let result = self.stop().await;
        self.cleanup_pid_file();
        result
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let statuses = self.plugins.health_check_all().await;
        let modules: Vec<ModuleHealth> = statuses
            .into_iter()
            .map(|(name, _state, status)| ModuleHealth { name, status })
            .collect();

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs: self.start_time.elapsed().as_secs(),
            modules,
        }
    }

    /// Get the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::collect(self.ingest_stats.as_ref(), self.hub_stats.as_ref())
    }

    /// Get the hub connector for the external transport layer.
    pub fn hub_connector(&self) -> Option<HubConnector> {
        self.hub_connector.clone()
    }

    /// Get the dispatcher handle (rule reload, delivery history).
    pub fn dispatcher_handle(&self) -> Option<DispatcherHandle> {
        self.dispatcher_handle.clone()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogwardenConfig {
        &self.config
    }

    fn cleanup_pid_file(&self) {
        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Watch the config file and publish validated snapshots on change.
///
/// An invalid or unreadable new config is logged and ignored; the
/// previously valid configuration stays active.
fn spawn_config_watch(
    config_path: PathBuf,
    config_tx: watch::Sender<Arc<LogwardenConfig>>,
    dispatcher_handle: Option<DispatcherHandle>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (fs_tx, mut fs_rx) = mpsc::channel::<()>(8);
        let watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                if result.is_ok() {
                    let _ = fs_tx.try_send(());
                }
            },
        );
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::warn!(error = %e, "config watch unavailable, hot reload disabled");
                return;
            }
        };
        let watch_target = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_path.clone());
        if let Err(e) = watcher.watch(&watch_target, notify::RecursiveMode::NonRecursive) {
            tracing::warn!(error = %e, "config watch unavailable, hot reload disabled");
            return;
        }
        tracing::info!(path = %config_path.display(), "config hot reload active");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                changed = fs_rx.recv() => {
                    if changed.is_none() {
                        break;
                    }
                    // Editors produce bursts of events; debounce and drain
                    tokio::time::sleep(CONFIG_RELOAD_DEBOUNCE).await;
                    while fs_rx.try_recv().is_ok() {}

                    match LogwardenConfig::load(&config_path).await {
                        Ok(new_config) => {
                            tracing::info!("configuration reloaded");
                            let _ = config_tx.send(Arc::new(new_config));
                            if let Some(handle) = &dispatcher_handle {
                                let rules = handle.reload_rules().await;
                                tracing::info!(rules, "notification rules reloaded");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "invalid configuration change ignored, previous config stays active"
                            );
                        }
                    }
                }
            }
        }
        tracing::debug!("config watch task finished");
    })
}

/// Periodically update the uptime gauge and broadcast a health_check
/// event with the current metrics snapshot.
fn spawn_health_reporter(
    start_time: Instant,
    ingest_stats: Option<IngestStatsHandle>,
    hub_stats: Option<HubStatsHandle>,
    hub_event_tx: Option<mpsc::Sender<HubEvent>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);

                    let snapshot =
                        MetricsSnapshot::collect(ingest_stats.as_ref(), hub_stats.as_ref());
                    if let Some(hub_event_tx) = &hub_event_tx {
                        let report = serde_json::json!({
                            "uptime_secs": uptime_secs,
                            "metrics": snapshot,
                        });
                        if hub_event_tx.try_send(HubEvent::health_check(report)).is_err() {
                            tracing::debug!("health event dropped, hub channel full");
                        }
                    }
                }
            }
        }
        tracing::debug!("health reporter finished");
    })
}

/// Drain processing results when the notification dispatcher is disabled.
///
/// This keeps the ingest pipeline from logging send failures on a
/// closed channel. Results are still persisted by the pipeline itself.
async fn drain_results(
    mut result_rx: mpsc::Receiver<ResultEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = result_rx.recv() => {
                match result {
                    Some(event) => {
                        tracing::debug!(
                            event_id = %event.id,
                            status = %event.result.status,
                            "result received but notification dispatcher disabled"
                        );
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    tracing::debug!("result drain task finished");
}

/// Record daemon-level metrics (build info, modules registered).
fn record_daemon_metrics(plugin_count: usize) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_PLUGINS_REGISTERED).set(plugin_count as f64);
}

/// Write the current process PID to a file.
///
/// Uses `create_new(true)` to atomically create the file, preventing
/// two daemon instances from racing for the same PID file.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = std::fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    writeln!(file, "{pid}")?;
    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
