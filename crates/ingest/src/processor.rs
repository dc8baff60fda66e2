//! 파이프라인 프로세서 — 워커 풀과 외부 파서/분석기 호출
//!
//! 고정 크기 워커 풀이 큐에서 배치를 드레인하고, 엔트리마다 외부
//! 파서 → 외부 분석기를 호출하여 [`ProcessingResult`]를 만듭니다.
//!
//! # 부분 실패
//! - 파싱 실패: `parse_failed` 결과를 만들고 원본을 영속화 협력자에
//!   보존합니다 (조용한 드롭 없음).
//! - 분석 실패/타임아웃: 재시도 정책만큼 재시도한 뒤 `analysis_failed`
//!   결과로 기록합니다.
//!
//! # 소비자에 대한 순서 보장
//! 워커가 병렬로 돌기 때문에 결과는 적재 순서가 아니라 완료 순서로
//! 발행됩니다. 엄격한 순서가 필요한 소비자는 `entry_ref.sequence`를
//! 정렬 키로 사용해야 합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use logwarden_core::event::{HubEvent, ResultEvent};
use logwarden_core::metrics as m;
use logwarden_core::pipeline::{Analyzer, Parser, Persistence};
use logwarden_core::retry::{RetryPolicy, retry_with_policy};
use logwarden_core::types::{EntryRef, ProcessingResult};

use crate::config::IngestConfig;
use crate::queue::{IngestQueue, QueueItem};

/// 프로세서 카운터 (Health Aggregator에 노출)
#[derive(Debug, Default)]
pub struct ProcessorStats {
    processed: AtomicU64,
    failed: AtomicU64,
    total_processing_ms: AtomicU64,
    analysis_retries: AtomicU64,
}

impl ProcessorStats {
    /// 성공 처리된 엔트리 수
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// 실패(파싱/분석)한 엔트리 수
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// 평균 처리 시간 (밀리초)
    pub fn avg_processing_ms(&self) -> u64 {
        let count = self.processed() + self.failed();
        if count == 0 {
            return 0;
        }
        self.total_processing_ms.load(Ordering::Relaxed) / count
    }

    /// 분석 재시도 횟수
    pub fn analysis_retries(&self) -> u64 {
        self.analysis_retries.load(Ordering::Relaxed)
    }

    fn record(&self, result: &ProcessingResult) {
        if result.is_success() {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_ms
            .fetch_add(result.processing_time_ms, Ordering::Relaxed);
    }
}

/// 파이프라인 프로세서
pub struct PipelineProcessor {
    queue: Arc<IngestQueue>,
    parser: Arc<dyn Parser>,
    analyzer: Arc<dyn Analyzer>,
    persistence: Arc<dyn Persistence>,
    result_tx: mpsc::Sender<ResultEvent>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    stats: Arc<ProcessorStats>,
    workers: usize,
    batch_size: usize,
    batch_wait: Duration,
    analyzer_timeout: Duration,
    retry: RetryPolicy,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineProcessor {
    /// 새 프로세서를 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &IngestConfig,
        queue: Arc<IngestQueue>,
        parser: Arc<dyn Parser>,
        analyzer: Arc<dyn Analyzer>,
        persistence: Arc<dyn Persistence>,
        result_tx: mpsc::Sender<ResultEvent>,
        hub_tx: Option<mpsc::Sender<HubEvent>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            queue,
            parser,
            analyzer,
            persistence,
            result_tx,
            hub_tx,
            stats: Arc::new(ProcessorStats::default()),
            workers: config.workers,
            batch_size: config.batch_size,
            batch_wait: config.batch_wait,
            analyzer_timeout: config.analyzer_timeout,
            retry: config.analysis_retry.clone(),
            shutdown_tx,
        }
    }

    /// 프로세서 카운터 핸들을 반환합니다.
    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }

    /// 워커 풀을 스폰합니다.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker_id| {
                let ctx = WorkerCtx {
                    queue: self.queue.clone(),
                    parser: self.parser.clone(),
                    analyzer: self.analyzer.clone(),
                    persistence: self.persistence.clone(),
                    result_tx: self.result_tx.clone(),
                    hub_tx: self.hub_tx.clone(),
                    stats: self.stats.clone(),
                    batch_size: self.batch_size,
                    batch_wait: self.batch_wait,
                    analyzer_timeout: self.analyzer_timeout,
                    retry: self.retry.clone(),
                };
                let shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(ctx.run(worker_id, shutdown_rx))
            })
            .collect()
    }
}

/// 워커 하나의 실행 컨텍스트
struct WorkerCtx {
    queue: Arc<IngestQueue>,
    parser: Arc<dyn Parser>,
    analyzer: Arc<dyn Analyzer>,
    persistence: Arc<dyn Persistence>,
    result_tx: mpsc::Sender<ResultEvent>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    stats: Arc<ProcessorStats>,
    batch_size: usize,
    batch_wait: Duration,
    analyzer_timeout: Duration,
    retry: RetryPolicy,
}

impl WorkerCtx {
    async fn run(self, worker_id: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::debug!(worker_id, "processor worker started");
        loop {
            let batch = tokio::select! {
                _ = shutdown_rx.recv() => break,
                batch = self.queue.dequeue_batch(self.batch_size, self.batch_wait) => batch,
            };
            for item in batch {
                self.process_item(item).await;
            }
        }
        tracing::debug!(worker_id, "processor worker stopped");
    }

    /// 엔트리 하나를 처리하고 결과를 발행합니다.
    ///
    /// 어떤 실패도 워커 루프를 중단시키지 않습니다.
    async fn process_item(&self, item: QueueItem) {
        let started = Instant::now();
        let entry = item.entry;
        let entry_ref = EntryRef {
            sequence: item.sequence,
            source_name: entry.source_name.clone(),
        };

        let result = match self.parser.parse(&entry.content, &entry.source_name) {
            Err(e) => {
                // 원본 보존 — 파싱 실패는 수동 검토 대상이지 드롭 대상이 아님
                if let Err(storage_err) = self
                    .persistence
                    .save_raw_on_failure(&entry.content, &entry.source_name)
                    .await
                {
                    tracing::warn!(
                        source = %entry.source_name,
                        error = %storage_err,
                        "failed to preserve unparseable raw content"
                    );
                }
                ProcessingResult::parse_failed(
                    entry_ref,
                    &entry.content,
                    e.to_string(),
                    elapsed_ms(started),
                )
            }
            Ok(structured) => {
                let attempts = AtomicU64::new(0);
                let analysis = retry_with_policy(&self.retry, "analyze", || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    self.analyzer.analyze(&structured, self.analyzer_timeout)
                })
                .await;

                let retries = attempts.load(Ordering::Relaxed).saturating_sub(1);
                if retries > 0 {
                    self.stats
                        .analysis_retries
                        .fetch_add(retries, Ordering::Relaxed);
                    metrics::counter!(m::PROCESSOR_ANALYSIS_RETRIES_TOTAL).increment(retries);
                }

                match analysis {
                    Ok(analysis) => ProcessingResult::success(
                        entry_ref,
                        analysis,
                        &entry.content,
                        elapsed_ms(started),
                    ),
                    Err(e) => ProcessingResult::analysis_failed(
                        entry_ref,
                        &entry.content,
                        e.to_string(),
                        elapsed_ms(started),
                    ),
                }
            }
        };

        self.stats.record(&result);
        metrics::counter!(m::PROCESSOR_RESULTS_TOTAL, m::LABEL_STATUS => result.status.to_string())
            .increment(1);
        metrics::histogram!(m::PROCESSOR_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        // 결과 영속화 실패는 치명적이지 않음 — 로깅 후 계속
        if let Err(e) = self.persistence.save_result(&result).await {
            tracing::warn!(entry = %result.entry_ref, error = %e, "failed to persist result");
        }

        self.publish(result).await;
    }

    /// 결과를 브로드캐스트 허브와 알림 디스패처에 발행합니다.
    async fn publish(&self, result: ProcessingResult) {
        let trace_id = uuid::Uuid::new_v4().to_string();

        if let Some(hub_tx) = &self.hub_tx {
            // 모든 결과는 processing_update로, 성공은 security_event로도
            let update = HubEvent::processing_update(&result, trace_id.clone());
            if hub_tx.send(update).await.is_err() {
                tracing::debug!("hub channel closed, dropping processing update");
            }
            if result.is_success() {
                let event = HubEvent::security_event(&result, trace_id.clone());
                if hub_tx.send(event).await.is_err() {
                    tracing::debug!("hub channel closed, dropping security event");
                }
            }
        }

        let result_event = ResultEvent::with_trace(result, trace_id);
        if self.result_tx.send(result_event).await.is_err() {
            tracing::debug!("result channel closed, dropping result event");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::SystemTime;

    use logwarden_core::error::{AnalysisError, ParseError, StorageError};
    use logwarden_core::pipeline::BoxFuture;
    use logwarden_core::types::{Analysis, LogEntry, Priority, ResultStatus, Severity, StructuredEvent};

    struct StubParser {
        fail_on: Option<String>,
    }

    impl Parser for StubParser {
        fn name(&self) -> &str {
            "stub"
        }

        fn parse(&self, content: &str, source_hint: &str) -> Result<StructuredEvent, ParseError> {
            if let Some(marker) = &self.fail_on
                && content.contains(marker.as_str())
            {
                return Err(ParseError::Failed {
                    reason: "stub rejects marker".to_owned(),
                });
            }
            Ok(StructuredEvent {
                message: content.to_owned(),
                source_name: source_hint.to_owned(),
                timestamp: None,
                fields: Vec::new(),
            })
        }
    }

    struct StubAnalyzer {
        /// 성공 전까지 실패할 횟수
        fail_first: AtomicU32,
        severity: u8,
    }

    impl Analyzer for StubAnalyzer {
        fn analyze<'a>(
            &'a self,
            event: &'a StructuredEvent,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<Analysis, AnalysisError>> {
            Box::pin(async move {
                if self.fail_first.load(Ordering::SeqCst) > 0 {
                    self.fail_first.fetch_sub(1, Ordering::SeqCst);
                    return Err(AnalysisError::Unavailable("stub outage".to_owned()));
                }
                Ok(Analysis {
                    severity: Severity::clamped(self.severity),
                    category: if event.message.contains("Failed password") {
                        "authentication".to_owned()
                    } else {
                        "system".to_owned()
                    },
                    explanation: "stub analysis".to_owned(),
                    recommendations: vec![],
                })
            })
        }
    }

    #[derive(Default)]
    struct RecordingPersistence {
        saved_results: Mutex<Vec<ProcessingResult>>,
        saved_raw: Mutex<Vec<String>>,
    }

    impl Persistence for RecordingPersistence {
        fn save_result<'a>(
            &'a self,
            result: &'a ProcessingResult,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                self.saved_results.lock().unwrap().push(result.clone());
                Ok(())
            })
        }

        fn save_raw_on_failure<'a>(
            &'a self,
            content: &'a str,
            _source_name: &'a str,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                self.saved_raw.lock().unwrap().push(content.to_owned());
                Ok(())
            })
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

    fn make_entry(content: &str) -> LogEntry {
        LogEntry {
            content: content.to_owned(),
            source_name: "auth_logs".to_owned(),
            source_path: PathBuf::from("/var/log/auth.log"),
            captured_at: SystemTime::now(),
            priority: Priority::clamped(8),
            file_offset: 0,
        }
    }

    struct TestRig {
        processor: PipelineProcessor,
        queue: Arc<IngestQueue>,
        result_rx: mpsc::Receiver<ResultEvent>,
        hub_rx: mpsc::Receiver<HubEvent>,
        persistence: Arc<RecordingPersistence>,
        shutdown_tx: broadcast::Sender<()>,
    }

    fn build_rig(parser: StubParser, analyzer: StubAnalyzer) -> TestRig {
        let queue = Arc::new(IngestQueue::new(100, 8));
        let (result_tx, result_rx) = mpsc::channel(64);
        let (hub_tx, hub_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(4);
        let persistence = Arc::new(RecordingPersistence::default());
        let config = IngestConfig {
            workers: 1,
            batch_wait: Duration::from_millis(20),
            analysis_retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 1,
            },
            ..Default::default()
        };
        let processor = PipelineProcessor::new(
            &config,
            queue.clone(),
            Arc::new(parser),
            Arc::new(analyzer),
            persistence.clone(),
            result_tx,
            Some(hub_tx),
            shutdown_tx.clone(),
        );
        TestRig {
            processor,
            queue,
            result_rx,
            hub_rx,
            persistence,
            shutdown_tx,
        }
    }

    async fn recv_result(rx: &mut mpsc::Receiver<ResultEvent>) -> ResultEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for result")
            .expect("result channel closed")
    }

    #[tokio::test]
    async fn success_path_produces_security_event() {
        let mut rig = build_rig(
            StubParser { fail_on: None },
            StubAnalyzer {
                fail_first: AtomicU32::new(0),
                severity: 8,
            },
        );
        let tasks = rig.processor.spawn_workers();

        rig.queue
            .enqueue(make_entry(
                "Failed password for invalid user admin from 10.0.0.5 port 22",
            ))
            .await;

        let result = recv_result(&mut rig.result_rx).await;
        assert_eq!(result.result.status, ResultStatus::Success);
        assert_eq!(result.result.category, "authentication");
        assert!(result.result.severity.unwrap().get() >= 7);

        // 허브에는 processing_update + security_event 두 건
        let first = rig.hub_rx.recv().await.unwrap();
        let second = rig.hub_rx.recv().await.unwrap();
        let types: Vec<_> = [first.event_type, second.event_type].into();
        assert!(types.contains(&logwarden_core::event::EventType::ProcessingUpdate));
        assert!(types.contains(&logwarden_core::event::EventType::SecurityEvent));

        // 영속화도 한 번
        assert_eq!(rig.persistence.saved_results.lock().unwrap().len(), 1);

        let _ = rig.shutdown_tx.send(());
        for task in tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }

    #[tokio::test]
    async fn parse_failure_preserves_raw_content() {
        let mut rig = build_rig(
            StubParser {
                fail_on: Some("garbage".to_owned()),
            },
            StubAnalyzer {
                fail_first: AtomicU32::new(0),
                severity: 5,
            },
        );
        let tasks = rig.processor.spawn_workers();

        rig.queue.enqueue(make_entry("garbage ###")).await;

        let result = recv_result(&mut rig.result_rx).await;
        assert_eq!(result.result.status, ResultStatus::ParseFailed);
        assert!(result.result.severity.is_none());

        // 원본이 보존되어야 함
        let raw = rig.persistence.saved_raw.lock().unwrap();
        assert_eq!(raw.as_slice(), ["garbage ###"]);

        let _ = rig.shutdown_tx.send(());
        for task in tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }

    #[tokio::test]
    async fn transient_analysis_failure_is_retried() {
        let mut rig = build_rig(
            StubParser { fail_on: None },
            StubAnalyzer {
                fail_first: AtomicU32::new(2), // 두 번 실패 후 성공
                severity: 6,
            },
        );
        let tasks = rig.processor.spawn_workers();

        rig.queue.enqueue(make_entry("some event")).await;

        let result = recv_result(&mut rig.result_rx).await;
        assert_eq!(result.result.status, ResultStatus::Success);
        assert_eq!(rig.processor.stats().analysis_retries(), 2);

        let _ = rig.shutdown_tx.send(());
        for task in tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }

    #[tokio::test]
    async fn exhausted_analysis_retries_record_failure() {
        let mut rig = build_rig(
            StubParser { fail_on: None },
            StubAnalyzer {
                fail_first: AtomicU32::new(100), // 항상 실패
                severity: 6,
            },
        );
        let tasks = rig.processor.spawn_workers();

        rig.queue.enqueue(make_entry("some event")).await;

        let result = recv_result(&mut rig.result_rx).await;
        assert_eq!(result.result.status, ResultStatus::AnalysisFailed);
        assert_eq!(rig.processor.stats().failed(), 1);
        assert_eq!(rig.processor.stats().processed(), 0);

        // 실패 결과도 허브의 processing_update로는 발행됨
        let update = rig.hub_rx.recv().await.unwrap();
        assert_eq!(
            update.event_type,
            logwarden_core::event::EventType::ProcessingUpdate
        );

        let _ = rig.shutdown_tx.send(());
        for task in tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }

    #[tokio::test]
    async fn stats_average_reflects_counts() {
        let stats = ProcessorStats::default();
        assert_eq!(stats.avg_processing_ms(), 0);

        let result = ProcessingResult::parse_failed(
            EntryRef {
                sequence: 0,
                source_name: "s".to_owned(),
            },
            "m",
            "r",
            10,
        );
        stats.record(&result);
        assert_eq!(stats.avg_processing_ms(), 10);
        assert_eq!(stats.failed(), 1);
    }
}
