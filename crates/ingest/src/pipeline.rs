//! 수집 파이프라인 오케스트레이션 — 워처/큐/프로세서의 전체 흐름
//!
//! [`IngestPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! `logwarden-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! FileWatcher -> IngestQueue -> worker pool -> {hub_tx, result_tx}
//!       |                                          (완료 순서로 발행)
//!  SourceTracker
//! ```
//!
//! # 종료 정책
//! 정지 시 큐에 남은 엔트리는 설정에 따라 데드레터 파일(JSON lines)로
//! 보존되거나(`drain`) 카운트만 남기고 폐기됩니다(`discard`).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use logwarden_core::config::{LogwardenConfig, ShutdownPolicy};
use logwarden_core::error::{LogwardenError, PipelineError};
use logwarden_core::event::{HubEvent, ResultEvent};
use logwarden_core::metrics as m;
use logwarden_core::pipeline::{Analyzer, HealthStatus, Parser, Persistence, Pipeline};
use logwarden_core::plugin::{Plugin, PluginInfo, PluginState, PluginType};
use logwarden_core::types::{LogEntry, LogSource};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::processor::{PipelineProcessor, ProcessorStats};
use crate::queue::{IngestQueue, QueueItem};
use crate::tracker::SourceTracker;
use crate::watcher::{FileWatcher, SourceRegistry};

/// 태스크 종료 대기 상한
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Health Aggregator에 노출되는 수집 파이프라인 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct IngestSnapshot {
    /// 현재 큐 깊이
    pub queue_size: usize,
    /// 가장 오래된 큐 엔트리 대기 시간 (밀리초)
    pub oldest_age_ms: u64,
    /// 성공 처리 수
    pub processed_count: u64,
    /// 실패 수
    pub failed_count: u64,
    /// 평균 처리 시간 (밀리초)
    pub avg_processing_time_ms: u64,
}

/// 수집 파이프라인 통계 핸들
///
/// 파이프라인이 플러그인 레지스트리에 박싱된 뒤에도 데몬의 Health
/// Aggregator가 스냅샷을 읽을 수 있게 하는 공유 뷰입니다. 읽기
/// 전용이며 파이프라인 상태를 변경하지 않습니다.
#[derive(Clone)]
pub struct IngestStatsHandle {
    queue: Arc<IngestQueue>,
    stats: Arc<ProcessorStats>,
    registry: SourceRegistry,
}

impl IngestStatsHandle {
    /// 메트릭 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> IngestSnapshot {
        let queue_stats = self.queue.stats();
        IngestSnapshot {
            queue_size: queue_stats.size,
            oldest_age_ms: queue_stats
                .oldest_age
                .map_or(0, |age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
            processed_count: self.stats.processed(),
            failed_count: self.stats.failed(),
            avg_processing_time_ms: self.stats.avg_processing_ms(),
        }
    }

    /// 현재 소스 목록 스냅샷을 반환합니다.
    pub fn sources(&self) -> Vec<LogSource> {
        self.registry
            .lock()
            .map(|registry| registry.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Initialized,
    Running,
    Stopped,
}

/// 수집 파이프라인
pub struct IngestPipeline {
    info: PluginInfo,
    config: Arc<IngestConfig>,
    state: RunState,
    queue: Arc<IngestQueue>,
    tracker: Arc<SourceTracker>,
    watcher: FileWatcher,
    processor: PipelineProcessor,
    stats: Arc<ProcessorStats>,
    /// 설정 핫 리로드 스트림 (없으면 시작 시점 설정 고정)
    config_rx: Option<watch::Receiver<Arc<LogwardenConfig>>>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IngestPipeline {
    /// 소스 상태 레지스트리를 반환합니다.
    pub fn registry(&self) -> SourceRegistry {
        self.watcher.registry()
    }

    /// 현재 소스 목록 스냅샷을 반환합니다 (상태 표시용).
    pub fn sources(&self) -> Vec<LogSource> {
        self.watcher
            .registry()
            .lock()
            .map(|registry| registry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 오프셋 추적기를 반환합니다.
    pub fn tracker(&self) -> Arc<SourceTracker> {
        self.tracker.clone()
    }

    /// 메트릭 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> IngestSnapshot {
        self.stats_handle().snapshot()
    }

    /// 레지스트리에 박싱된 뒤에도 사용할 수 있는 통계 핸들을 반환합니다.
    pub fn stats_handle(&self) -> IngestStatsHandle {
        IngestStatsHandle {
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            registry: self.watcher.registry(),
        }
    }

    /// 큐 사용률을 반환합니다.
    pub fn queue_utilization(&self) -> f64 {
        self.queue.utilization()
    }
}

impl Pipeline for IngestPipeline {
    async fn start(&mut self) -> Result<(), LogwardenError> {
        if self.state == RunState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!(
            sources = self.config.sources.len(),
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "starting ingest pipeline"
        );

        match self.config_rx.take() {
            // 핫 리로드 모드: 수퍼바이저가 워처 세대를 관리
            Some(config_rx) => {
                self.tasks.push(tokio::spawn(run_source_supervisor(
                    self.config.clone(),
                    self.watcher.registry(),
                    config_rx,
                    self.tracker.clone(),
                    self.queue.clone(),
                    self.hub_tx.clone(),
                    self.shutdown_tx.subscribe(),
                )));
            }
            None => self.tasks.extend(self.watcher.spawn_all()),
        }
        self.tasks.extend(self.processor.spawn_workers());

        self.state = RunState::Running;
        tracing::info!("ingest pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogwardenError> {
        if self.state != RunState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping ingest pipeline");

        // 1. 모든 워처/워커에 정지 신호
        let _ = self.shutdown_tx.send(());

        // 2. 태스크 종료 대기 (상한 초과 시 강제 중단)
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("task did not stop in time, aborting");
                task.abort();
            }
        }

        // 3. 큐 잔여 엔트리를 설정된 정책대로 처리
        let remaining = self.queue.drain_all();
        if !remaining.is_empty() {
            match self.config.shutdown_policy {
                ShutdownPolicy::Drain => {
                    let count = remaining.len();
                    write_dead_letter(&self.config.dead_letter_path, &remaining)
                        .await
                        .map_err(|e| {
                            LogwardenError::Pipeline(PipelineError::ShutdownFailed(e.to_string()))
                        })?;
                    metrics::counter!(m::QUEUE_DEAD_LETTERED_TOTAL).increment(count as u64);
                    tracing::info!(
                        count,
                        path = %self.config.dead_letter_path.display(),
                        "pending entries preserved to dead letter file"
                    );
                }
                ShutdownPolicy::Discard => {
                    tracing::warn!(
                        count = remaining.len(),
                        "pending entries discarded at shutdown per configuration"
                    );
                }
            }
        }

        self.state = RunState::Stopped;
        tracing::info!("ingest pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            RunState::Running => {
                let utilization = self.queue.utilization();
                if utilization > 0.9 {
                    return HealthStatus::Degraded(format!(
                        "queue utilization high: {:.1}%",
                        utilization * 100.0
                    ));
                }
                if self.tracker.is_degraded() {
                    return HealthStatus::Degraded(
                        "offset persistence unavailable, durability degraded".to_owned(),
                    );
                }
                HealthStatus::Healthy
            }
            RunState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            RunState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

impl Plugin for IngestPipeline {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn state(&self) -> PluginState {
        match self.state {
            RunState::Initialized => PluginState::Created,
            RunState::Running => PluginState::Running,
            RunState::Stopped => PluginState::Stopped,
        }
    }
}

/// 소스 설정 핫 리로드 수퍼바이저
///
/// 설정 스냅샷이 갱신될 때마다 현 세대의 워처 태스크를 정지하고
/// 새 소스 목록으로 다음 세대를 스폰합니다. 추적기/큐/레지스트리는
/// 세대 간에 공유되므로 오프셋과 백프레셔는 그대로 이어집니다.
/// 갱신된 설정이 문제를 일으키면(부스트 패턴 컴파일 실패 등) 기존
/// 세대를 유지합니다.
async fn run_source_supervisor(
    initial_config: Arc<IngestConfig>,
    registry: crate::watcher::SourceRegistry,
    mut config_rx: watch::Receiver<Arc<LogwardenConfig>>,
    tracker: Arc<SourceTracker>,
    queue: Arc<IngestQueue>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let build_generation = |config: Arc<IngestConfig>,
                            gen_tx: broadcast::Sender<()>|
     -> Option<FileWatcher> {
        match FileWatcher::new(
            config,
            tracker.clone(),
            queue.clone(),
            hub_tx.clone(),
            registry.clone(),
            gen_tx,
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!(error = %e, "failed to build watcher generation, keeping previous sources");
                None
            }
        }
    };

    let mut gen_tx = broadcast::channel::<()>(8).0;
    let mut tasks = build_generation(initial_config, gen_tx.clone())
        .map(|watcher| watcher.spawn_all())
        .unwrap_or_default();
    let mut updates_open = true;

    loop {
        if updates_open {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        // 설정 송신측이 사라짐 — 현 세대 유지
                        updates_open = false;
                        continue;
                    }
                    let new_core = config_rx.borrow_and_update().clone();
                    let new_config = Arc::new(IngestConfig::from_core(&new_core));
                    tracing::info!(
                        sources = new_config.sources.len(),
                        "source configuration changed, restarting watcher tasks"
                    );

                    // 새 세대가 유효할 때만 기존 세대를 내림
                    let next_gen_tx = broadcast::channel::<()>(8).0;
                    let Some(next_watcher) = build_generation(new_config, next_gen_tx.clone())
                    else {
                        continue;
                    };

                    let _ = gen_tx.send(());
                    for mut task in tasks.drain(..) {
                        if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await.is_err() {
                            task.abort();
                        }
                    }
                    gen_tx = next_gen_tx;
                    tasks = next_watcher.spawn_all();
                }
            }
        } else if shutdown_rx.recv().await.is_ok() {
            break;
        } else {
            break;
        }
    }

    let _ = gen_tx.send(());
    for mut task in tasks.drain(..) {
        if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await.is_err() {
            task.abort();
        }
    }
    tracing::debug!("source supervisor finished");
}

/// 데드레터 파일 레코드 (JSON lines)
#[derive(Serialize)]
struct DeadLetterRecord<'a> {
    sequence: u64,
    entry: &'a LogEntry,
}

/// 큐 잔여 엔트리를 데드레터 파일에 추가합니다.
async fn write_dead_letter(path: &Path, items: &[QueueItem]) -> Result<(), IngestError> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut lines = String::new();
    for item in items {
        let record = DeadLetterRecord {
            sequence: item.sequence,
            entry: &item.entry,
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                lines.push_str(&json);
                lines.push('\n');
            }
            Err(e) => {
                return Err(IngestError::DeadLetter {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| IngestError::DeadLetter {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    file.write_all(lines.as_bytes())
        .await
        .map_err(|e| IngestError::DeadLetter {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    file.flush().await.map_err(|e| IngestError::DeadLetter {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// 수집 파이프라인 빌더
///
/// 외부 협력자(파서/분석기/영속화)와 발행 채널을 연결하고 필요한
/// 내부 채널을 생성합니다.
pub struct IngestPipelineBuilder {
    config: IngestConfig,
    parser: Option<Arc<dyn Parser>>,
    analyzer: Option<Arc<dyn Analyzer>>,
    persistence: Option<Arc<dyn Persistence>>,
    result_tx: Option<mpsc::Sender<ResultEvent>>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    config_rx: Option<watch::Receiver<Arc<LogwardenConfig>>>,
    result_channel_capacity: usize,
}

impl IngestPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
            parser: None,
            analyzer: None,
            persistence: None,
            result_tx: None,
            hub_tx: None,
            config_rx: None,
            result_channel_capacity: 256,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// 외부 파서 협력자를 지정합니다.
    pub fn parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// 외부 분석기 협력자를 지정합니다.
    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// 영속화 협력자를 지정합니다.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// 외부 결과 이벤트 채널을 지정합니다 (알림 디스패처로 연결).
    ///
    /// 지정하지 않으면 빌더가 새 채널을 생성합니다.
    pub fn result_sender(mut self, tx: mpsc::Sender<ResultEvent>) -> Self {
        self.result_tx = Some(tx);
        self
    }

    /// 브로드캐스트 허브 이벤트 채널을 지정합니다.
    pub fn hub_sender(mut self, tx: mpsc::Sender<HubEvent>) -> Self {
        self.hub_tx = Some(tx);
        self
    }

    /// 설정 핫 리로드 스트림을 연결합니다.
    ///
    /// 연결하면 소스 목록 변경이 재시작 없이 적용됩니다.
    pub fn config_updates(mut self, rx: watch::Receiver<Arc<LogwardenConfig>>) -> Self {
        self.config_rx = Some(rx);
        self
    }

    /// 결과 채널 용량을 설정합니다 (외부 채널 미사용 시).
    pub fn result_channel_capacity(mut self, capacity: usize) -> Self {
        self.result_channel_capacity = capacity;
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Returns
    /// - `IngestPipeline`: 파이프라인 인스턴스
    /// - `Option<mpsc::Receiver<ResultEvent>>`: 결과 수신 채널
    ///   (외부 result_sender를 설정한 경우 None)
    pub fn build(
        self,
    ) -> Result<(IngestPipeline, Option<mpsc::Receiver<ResultEvent>>), IngestError> {
        self.config.validate()?;

        let parser = self.parser.ok_or_else(|| IngestError::Config {
            field: "parser".to_owned(),
            reason: "a Parser collaborator is required".to_owned(),
        })?;
        let analyzer = self.analyzer.ok_or_else(|| IngestError::Config {
            field: "analyzer".to_owned(),
            reason: "an Analyzer collaborator is required".to_owned(),
        })?;
        let persistence = self.persistence.ok_or_else(|| IngestError::Config {
            field: "persistence".to_owned(),
            reason: "a Persistence collaborator is required".to_owned(),
        })?;

        let (result_tx, result_rx) = match self.result_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.result_channel_capacity);
                (tx, Some(rx))
            }
        };

        let config = Arc::new(self.config);
        let queue = Arc::new(IngestQueue::new(
            config.queue_capacity,
            config.aging_threshold,
        ));
        let tracker = Arc::new(SourceTracker::new(
            persistence.clone(),
            config.offset_retry.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(8);
        let registry: crate::watcher::SourceRegistry =
            Arc::new(std::sync::Mutex::new(std::collections::HashMap::new()));

        let watcher = FileWatcher::new(
            config.clone(),
            tracker.clone(),
            queue.clone(),
            self.hub_tx.clone(),
            registry,
            shutdown_tx.clone(),
        )?;

        let processor = PipelineProcessor::new(
            &config,
            queue.clone(),
            parser,
            analyzer,
            persistence,
            result_tx,
            self.hub_tx.clone(),
            shutdown_tx.clone(),
        );
        let stats = processor.stats();

        let pipeline = IngestPipeline {
            info: PluginInfo {
                name: "ingest".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                description: "file watching, priority queue, processing pipeline".to_owned(),
                plugin_type: PluginType::Ingest,
            },
            config,
            state: RunState::Initialized,
            queue,
            tracker,
            watcher,
            processor,
            stats,
            config_rx: self.config_rx,
            hub_tx: self.hub_tx,
            tasks: Vec::new(),
            shutdown_tx,
        };

        Ok((pipeline, result_rx))
    }
}

impl Default for IngestPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tokio::time::Instant;

    use logwarden_core::error::{AnalysisError, ParseError, StorageError};
    use logwarden_core::pipeline::BoxFuture;
    use logwarden_core::types::{Analysis, Priority, ProcessingResult, Severity, StructuredEvent};

    struct NoopParser;

    impl Parser for NoopParser {
        fn name(&self) -> &str {
            "noop"
        }

        fn parse(&self, content: &str, source_hint: &str) -> Result<StructuredEvent, ParseError> {
            Ok(StructuredEvent {
                message: content.to_owned(),
                source_name: source_hint.to_owned(),
                timestamp: None,
                fields: Vec::new(),
            })
        }
    }

    struct NoopAnalyzer;

    impl Analyzer for NoopAnalyzer {
        fn analyze<'a>(
            &'a self,
            _event: &'a StructuredEvent,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<Analysis, AnalysisError>> {
            Box::pin(async {
                Ok(Analysis {
                    severity: Severity::clamped(1),
                    category: "system".to_owned(),
                    explanation: String::new(),
                    recommendations: vec![],
                })
            })
        }
    }

    struct NoopPersistence;

    impl Persistence for NoopPersistence {
        fn save_result<'a>(
            &'a self,
            _result: &'a ProcessingResult,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async { Ok(()) })
        }

        fn save_raw_on_failure<'a>(
            &'a self,
            _content: &'a str,
            _source_name: &'a str,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async { Ok(()) })
        }

        fn save_offset<'a>(
            &'a self,
            _source_name: &'a str,
            _offset: u64,
            _file_size: u64,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async { Ok(()) })
        }

        fn load_offset<'a>(
            &'a self,
            _source_name: &'a str,
        ) -> BoxFuture<'a, Result<Option<u64>, StorageError>> {
            Box::pin(async { Ok(None) })
        }
    }

    fn builder() -> IngestPipelineBuilder {
        IngestPipelineBuilder::new()
            .parser(Arc::new(NoopParser))
            .analyzer(Arc::new(NoopAnalyzer))
            .persistence(Arc::new(NoopPersistence))
    }

    #[test]
    fn builder_creates_pipeline() {
        let (pipeline, result_rx) = builder().build().unwrap();
        assert_eq!(Plugin::state(&pipeline), PluginState::Created);
        assert!(result_rx.is_some());
    }

    #[test]
    fn builder_with_external_result_sender() {
        let (result_tx, _result_rx) = mpsc::channel(8);
        let (_pipeline, rx) = builder().result_sender(result_tx).build().unwrap();
        assert!(rx.is_none());
    }

    #[test]
    fn builder_requires_collaborators() {
        let result = IngestPipelineBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = IngestConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(builder().config(config).build().is_err());
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let (mut pipeline, _rx) = builder().build().unwrap();
        assert!(Pipeline::health_check(&pipeline).await.is_unhealthy());

        Pipeline::start(&mut pipeline).await.unwrap();
        assert_eq!(Plugin::state(&pipeline), PluginState::Running);
        assert!(Pipeline::health_check(&pipeline).await.is_healthy());

        Pipeline::stop(&mut pipeline).await.unwrap();
        assert_eq!(Plugin::state(&pipeline), PluginState::Stopped);
    }

    #[tokio::test]
    async fn double_start_fails() {
        let (mut pipeline, _rx) = builder().build().unwrap();
        Pipeline::start(&mut pipeline).await.unwrap();
        assert!(Pipeline::start(&mut pipeline).await.is_err());
        Pipeline::stop(&mut pipeline).await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_fails() {
        let (mut pipeline, _rx) = builder().build().unwrap();
        assert!(Pipeline::stop(&mut pipeline).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_starts_empty() {
        let (pipeline, _rx) = builder().build().unwrap();
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.queue_size, 0);
        assert_eq!(snapshot.processed_count, 0);
        assert_eq!(snapshot.avg_processing_time_ms, 0);
    }

    #[tokio::test]
    async fn dead_letter_file_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dead-letter.jsonl");

        let items = vec![QueueItem {
            entry: LogEntry {
                content: "pending line".to_owned(),
                source_name: "s".to_owned(),
                source_path: PathBuf::from("/tmp/s.log"),
                captured_at: SystemTime::now(),
                priority: Priority::clamped(4),
                file_offset: 10,
            },
            enqueued_at: Instant::now(),
            sequence: 42,
        }];

        write_dead_letter(&path, &items).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(line["sequence"], 42);
        assert_eq!(line["entry"]["content"], "pending line");

        // 두 번째 쓰기는 append
        write_dead_letter(&path, &items).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
