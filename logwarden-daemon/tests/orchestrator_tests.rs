//! Orchestrator assembly and lifecycle tests.

use logwarden_core::config::{LogwardenConfig, SourceConfig};
use logwarden_daemon::Orchestrator;

fn test_config(root: &std::path::Path) -> LogwardenConfig {
    let log_path = root.join("auth.log");
    std::fs::write(&log_path, "").unwrap();
    let rules_dir = root.join("rules");
    std::fs::create_dir_all(&rules_dir).unwrap();

    let mut config = LogwardenConfig::default();
    config.general.data_dir = root.join("data").display().to_string();
    config.general.pid_file = String::new();
    config.notification.rules_dir = rules_dir.display().to_string();
    config.sources = vec![SourceConfig {
        name: "auth_logs".to_owned(),
        path: log_path.display().to_string(),
        priority: 8,
        ..Default::default()
    }];
    config
}

#[tokio::test]
async fn builds_with_all_modules_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::build_from_config(test_config(dir.path()), None)
        .await
        .unwrap();

    // ingest + broadcast + notify
    let health = orchestrator.health().await;
    assert_eq!(health.modules.len(), 3);
    // Nothing started yet
    assert!(health.status.is_unhealthy());
}

#[tokio::test]
async fn builds_with_optional_modules_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.broadcast.enabled = false;
    config.notification.enabled = false;

    let mut orchestrator = Orchestrator::build_from_config(config, None).await.unwrap();
    let health = orchestrator.health().await;
    assert_eq!(health.modules.len(), 1);
    assert!(orchestrator.hub_connector().is_none());
    assert!(orchestrator.dispatcher_handle().is_none());

    orchestrator.start().await.unwrap();
    assert!(orchestrator.health().await.status.is_healthy());
    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn lifecycle_start_stop_reports_health() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::build_from_config(test_config(dir.path()), None)
        .await
        .unwrap();

    orchestrator.start().await.unwrap();
    let health = orchestrator.health().await;
    assert!(health.status.is_healthy(), "unexpected health: {:?}", health);

    let snapshot = orchestrator.metrics_snapshot();
    assert_eq!(snapshot.queue_size, 0);
    assert_eq!(snapshot.active_connections, 0);

    orchestrator.stop().await.unwrap();
    assert!(orchestrator.health().await.status.is_unhealthy());
}

#[tokio::test]
async fn invalid_config_rejected_at_build() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.processor.workers = 0;

    assert!(Orchestrator::build_from_config(config, None).await.is_err());
}
