//! 파일 워처 — 소스 감시 태스크와 수집 루프
//!
//! 활성화된 소스마다 하나의 tokio 태스크가 실행됩니다. 각 태스크는
//! 폴링 주기(설정 하한으로 보정)로 깨어나며, OS 파일 변경 알림
//! (`notify` 크레이트)이 도착하면 즉시 깨어납니다. 알림 워처 생성에
//! 실패하면 폴링만으로 동작합니다.
//!
//! # 백프레셔와 재생 안전성
//! 큐 적재는 블로킹 호출이며, 오프셋 커밋은 적재 성공 후에만
//! 수행됩니다. 크래시 시 마지막 커밋 지점부터 다시 읽으므로 유실이
//! 없습니다 (중복은 허용, at-least-once).
//!
//! # 에러 격리
//! 소스 하나의 권한/부재 에러는 그 소스의 상태(`Error`)와 지수
//! 백오프 재시도로만 표면화됩니다. 다른 소스는 영향을 받지 않고,
//! 워처 태스크는 단일 소스 실패로 종료되지 않습니다.

pub mod dir;
pub mod file;

pub use file::{FileTail, TailLine, TailOutcome};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use notify::Watcher as _;
use regex::Regex;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;

use logwarden_core::event::{HubEvent, StatusEvent};
use logwarden_core::metrics as m;
use logwarden_core::types::{LogEntry, LogSource, Priority, SourceStatus};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::queue::IngestQueue;
use crate::tracker::SourceTracker;

/// 소스 런타임 상태 레지스트리 (상태 표시용 읽기 뷰)
pub type SourceRegistry = Arc<Mutex<HashMap<String, LogSource>>>;

/// 백오프 지수 상한 (2^6 = 64배)
const BACKOFF_MAX_EXP: u32 = 6;
/// 백오프 지연 상한
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// 파일 워처 — 소스별 감시 태스크를 소유합니다.
///
/// 설정 핫 리로드 시 파이프라인이 새 세대의 워처를 만들어 교체할 수
/// 있도록 값싸게 복제됩니다. 레지스트리와 추적기는 세대 간에
/// 공유됩니다.
#[derive(Clone)]
pub struct FileWatcher {
    config: Arc<IngestConfig>,
    tracker: Arc<SourceTracker>,
    queue: Arc<IngestQueue>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    registry: SourceRegistry,
    boost: Arc<Vec<(Regex, Priority)>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl FileWatcher {
    /// 새 파일 워처를 생성합니다.
    ///
    /// 우선순위 부스트 패턴은 이 시점에 한 번만 컴파일됩니다.
    pub fn new(
        config: Arc<IngestConfig>,
        tracker: Arc<SourceTracker>,
        queue: Arc<IngestQueue>,
        hub_tx: Option<mpsc::Sender<HubEvent>>,
        registry: SourceRegistry,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self, IngestError> {
        let mut boost = Vec::with_capacity(config.boost.len());
        for rule in &config.boost {
            let regex = Regex::new(&rule.pattern).map_err(|e| IngestError::BoostPattern {
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            })?;
            boost.push((regex, Priority::clamped(rule.priority)));
        }

        Ok(Self {
            config,
            tracker,
            queue,
            hub_tx,
            registry,
            boost: Arc::new(boost),
            shutdown_tx,
        })
    }

    /// 소스 상태 레지스트리를 반환합니다.
    pub fn registry(&self) -> SourceRegistry {
        self.registry.clone()
    }

    /// 모든 소스의 감시 태스크를 스폰합니다.
    ///
    /// 레지스트리는 이 설정 세대의 소스 목록으로 대체됩니다.
    /// 비활성 소스는 태스크 없이 `Paused` 상태로 레지스트리에만
    /// 등록됩니다 (상태 표시 유지).
    pub fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
        let mut tasks = Vec::new();
        for source_config in &self.config.sources {
            let mut source = source_config.to_log_source();
            if !source.enabled {
                source.status = SourceStatus::Paused;
                self.insert_registry(source);
                continue;
            }
            source.status = SourceStatus::Inactive;
            let is_directory = source.is_directory;
            self.insert_registry(source.clone());

            let ctx = SourceTask {
                source,
                config: self.config.clone(),
                tracker: self.tracker.clone(),
                queue: self.queue.clone(),
                hub_tx: self.hub_tx.clone(),
                registry: self.registry.clone(),
                boost: self.boost.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
            };
            let task = if is_directory {
                tokio::spawn(ctx.run_directory_source())
            } else {
                tokio::spawn(ctx.run_file_source())
            };
            tasks.push(task);
        }
        tasks
    }

    fn insert_registry(&self, source: LogSource) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.insert(source.name.clone(), source);
        }
    }
}

/// 소스 하나의 감시 태스크 컨텍스트
struct SourceTask {
    source: LogSource,
    config: Arc<IngestConfig>,
    tracker: Arc<SourceTracker>,
    queue: Arc<IngestQueue>,
    hub_tx: Option<mpsc::Sender<HubEvent>>,
    registry: SourceRegistry,
    boost: Arc<Vec<(Regex, Priority)>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SourceTask {
    /// 파일 소스 감시 루프
    async fn run_file_source(mut self) {
        let name = self.source.name.clone();
        let interval = self
            .config
            .effective_poll_interval(self.source.poll_interval_ms);
        let start_offset = self.tracker.hydrate(&name).await;
        let mut tail = FileTail::new(
            &self.source.path,
            start_offset,
            self.config.chunk_size,
            self.config.max_line_bytes,
        );
        let kick = Arc::new(Notify::new());
        let _kicker = FsKicker::install(&self.source.path, kick.clone());
        let mut errors: u32 = 0;

        tracing::info!(source = %name, path = %self.source.path.display(), "file source watch started");

        loop {
            let delay = backoff_delay(interval, errors);
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = kick.notified() => {}
            }

            match tail.read_new().await {
                Ok(outcome) => {
                    if errors > 0 {
                        errors = 0;
                        self.set_status(&name, SourceStatus::Active, None, "source recovered")
                            .await;
                    }
                    let path = tail.path().to_path_buf();
                    let file_size = outcome.file_size;
                    self.ingest_outcome(&name, &path, outcome).await;
                    self.touch_registry(&name, tail.offset(), file_size);
                }
                Err(e) => {
                    errors = errors.saturating_add(1);
                    metrics::counter!(m::WATCHER_SOURCE_ERRORS_TOTAL, m::LABEL_SOURCE => name.clone())
                        .increment(1);
                    self.set_status(&name, SourceStatus::Error, Some(e.to_string()), "read failed")
                        .await;
                }
            }
        }

        tracing::info!(source = %name, "file source watch stopped");
    }

    /// 디렉토리 소스 감시 루프
    ///
    /// 패턴에 매칭되는 각 파일은 독립적인 가상 소스로 추적됩니다.
    /// 파일 하나의 에러는 그 파일에만 영향을 주고, 오프셋 커밋은
    /// 이 태스크 안에서 순차적으로 수행되어 소스별 단일 작성자
    /// 규칙이 유지됩니다.
    async fn run_directory_source(mut self) {
        let name = self.source.name.clone();
        let interval = self
            .config
            .effective_poll_interval(self.source.poll_interval_ms);
        let pattern_str = self.source.file_pattern.clone().unwrap_or_else(|| "*".to_owned());
        let pattern = match dir::compile_pattern(&pattern_str) {
            Ok(p) => p,
            Err(e) => {
                // 패턴 에러는 재시도해도 소용없음 — 에러 상태로 종료
                self.set_status(&name, SourceStatus::Error, Some(e.to_string()), "invalid pattern")
                    .await;
                return;
            }
        };
        let kick = Arc::new(Notify::new());
        let _kicker = FsKicker::install(&self.source.path, kick.clone());
        let mut tails: HashMap<PathBuf, FileTail> = HashMap::new();
        let mut errors: u32 = 0;

        tracing::info!(
            source = %name,
            path = %self.source.path.display(),
            pattern = %pattern_str,
            "directory source watch started"
        );

        loop {
            let delay = backoff_delay(interval, errors);
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = kick.notified() => {}
            }

            let files = match dir::expand_directory(&self.source.path, &pattern).await {
                Ok(files) => {
                    if errors > 0 {
                        errors = 0;
                        self.set_status(&name, SourceStatus::Active, None, "source recovered")
                            .await;
                    }
                    files
                }
                Err(e) => {
                    errors = errors.saturating_add(1);
                    metrics::counter!(m::WATCHER_SOURCE_ERRORS_TOTAL, m::LABEL_SOURCE => name.clone())
                        .increment(1);
                    self.set_status(&name, SourceStatus::Error, Some(e.to_string()), "scan failed")
                        .await;
                    continue;
                }
            };

            // 새 파일은 추적 시작, 사라진 파일은 정리
            for path in &files {
                if !tails.contains_key(path) {
                    let vname = dir::virtual_source_name(&name, path);
                    let offset = self.tracker.hydrate(&vname).await;
                    tracing::debug!(source = %vname, offset, "tracking new file in directory source");
                    tails.insert(
                        path.clone(),
                        FileTail::new(path, offset, self.config.chunk_size, self.config.max_line_bytes),
                    );
                }
            }
            tails.retain(|path, _| files.contains(path));

            let paths: Vec<PathBuf> = tails.keys().cloned().collect();
            for path in paths {
                let vname = dir::virtual_source_name(&name, &path);
                let outcome = match tails.get_mut(&path) {
                    Some(tail) => tail.read_new().await,
                    None => continue,
                };
                match outcome {
                    Ok(outcome) => {
                        self.ingest_outcome(&vname, &path, outcome).await;
                    }
                    Err(e) => {
                        // 파일 단위 에러는 해당 파일만 건너뜀
                        metrics::counter!(m::WATCHER_SOURCE_ERRORS_TOTAL, m::LABEL_SOURCE => vname.clone())
                            .increment(1);
                        tracing::warn!(source = %vname, error = %e, "file read failed, will retry");
                    }
                }
            }
            self.touch_registry(&name, 0, 0);
        }

        tracing::info!(source = %name, "directory source watch stopped");
    }

    /// 읽기 결과를 큐에 적재하고 오프셋을 커밋합니다.
    ///
    /// 오프셋은 모든 라인이 적재된 뒤에만 전진합니다. 적재가
    /// 백프레셔로 블록되면 커밋도 함께 지연되어 재생 안전성이
    /// 유지됩니다.
    async fn ingest_outcome(&self, source_name: &str, path: &Path, outcome: TailOutcome) {
        if outcome.rotated {
            metrics::counter!(m::WATCHER_ROTATIONS_TOTAL).increment(1);
            self.tracker.reset(source_name).await;
            self.emit_status(StatusEvent::new(
                source_name,
                SourceStatus::Active,
                "rotation detected, re-reading from start",
            ));
        }
        if outcome.bytes_read > 0 {
            metrics::counter!(m::WATCHER_BYTES_READ_TOTAL).increment(outcome.bytes_read);
        }
        if outcome.lines.is_empty() {
            return;
        }

        let mut enqueued: u64 = 0;
        let last_offset = outcome.lines.last().map_or(0, |line| line.end_offset);
        for line in outcome.lines {
            if line.content.trim().is_empty() {
                continue;
            }
            let priority = self.boosted_priority(&line.content);
            let entry = LogEntry {
                content: line.content,
                source_name: source_name.to_owned(),
                source_path: path.to_path_buf(),
                captured_at: SystemTime::now(),
                priority,
                file_offset: line.start_offset,
            };
            // 백프레셔 지점: 큐가 가득 차면 여기서 대기
            self.queue.enqueue(entry).await;
            enqueued += 1;
        }

        if enqueued > 0 {
            metrics::counter!(m::WATCHER_ENTRIES_COLLECTED_TOTAL).increment(enqueued);
        }
        self.tracker
            .commit(source_name, last_offset, outcome.file_size)
            .await;
    }

    /// 콘텐츠 패턴에 따라 우선순위를 부스트합니다.
    fn boosted_priority(&self, content: &str) -> Priority {
        apply_boost(self.source.priority, content, &self.boost)
    }

    /// 레지스트리의 소스 상태를 갱신하고, 상태가 바뀌면 시스템 상태
    /// 이벤트를 발행합니다.
    async fn set_status(
        &self,
        name: &str,
        status: SourceStatus,
        error_message: Option<String>,
        reason: &str,
    ) {
        let changed = {
            let mut registry = match self.registry.lock() {
                Ok(registry) => registry,
                Err(poisoned) => poisoned.into_inner(),
            };
            match registry.get_mut(name) {
                Some(source) if source.status != status => {
                    source.status = status.clone();
                    source.error_message = error_message.clone();
                    true
                }
                Some(source) => {
                    source.error_message = error_message.clone();
                    false
                }
                None => false,
            }
        };

        if changed {
            match &status {
                SourceStatus::Error => {
                    tracing::warn!(source = name, error = ?error_message, "source entered error state");
                }
                _ => {
                    tracing::info!(source = name, status = %status, reason, "source status changed");
                }
            }
            let message = error_message.unwrap_or_else(|| reason.to_owned());
            self.emit_status(StatusEvent::new(name, status, message));
        }
    }

    /// 읽기 성공 후 레지스트리의 런타임 필드를 갱신합니다.
    fn touch_registry(&self, name: &str, offset: u64, file_size: u64) {
        let mut registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(source) = registry.get_mut(name) {
            source.status = SourceStatus::Active;
            source.error_message = None;
            source.last_monitored_at = Some(SystemTime::now());
            if !source.is_directory {
                source.last_offset = offset;
                source.last_size = file_size;
            }
        }
    }

    fn emit_status(&self, status: StatusEvent) {
        if let Some(hub_tx) = &self.hub_tx {
            // 허브가 느려도 수집을 막지 않음 — 가득 차면 드롭
            if let Err(e) = hub_tx.try_send(HubEvent::system_status(&status)) {
                tracing::debug!(error = %e, "status event dropped, hub channel full");
            }
        }
    }
}

/// 콘텐츠가 부스트 패턴에 매칭되면 우선순위를 끌어올립니다.
///
/// 소스 기본 우선순위보다 낮아지지는 않습니다.
fn apply_boost(base: Priority, content: &str, boost: &[(Regex, Priority)]) -> Priority {
    let mut priority = base;
    for (regex, min_priority) in boost {
        if regex.is_match(content) {
            priority = priority.boosted(*min_priority);
        }
    }
    priority
}

/// 에러 횟수에 따른 폴링 지연을 계산합니다.
///
/// 에러가 없으면 기본 주기, 에러가 누적되면 지수적으로 늘어나되
/// 상한에서 멈춥니다.
fn backoff_delay(interval: Duration, errors: u32) -> Duration {
    if errors == 0 {
        return interval;
    }
    let factor = 1u32 << errors.min(BACKOFF_MAX_EXP);
    (interval * factor).min(BACKOFF_CAP.max(interval))
}

/// OS 파일 변경 알림 → 폴링 즉시 깨우기
///
/// 알림 워처 생성에 실패하면 `None`을 반환하고 폴링만으로 동작합니다.
struct FsKicker {
    _watcher: notify::RecommendedWatcher,
}

impl FsKicker {
    fn install(path: &Path, kick: Arc<Notify>) -> Option<Self> {
        // 파일 소스는 부모 디렉토리를 감시해야 로테이션(재생성)도 잡힘
        let watch_target = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent()?.to_path_buf()
        };

        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(_) => kick.notify_one(),
                Err(e) => tracing::debug!(error = %e, "fs notification error"),
            },
        )
        .ok()?;

        if let Err(e) = watcher.watch(&watch_target, notify::RecursiveMode::NonRecursive) {
            tracing::debug!(
                path = %watch_target.display(),
                error = %e,
                "fs watch unavailable, falling back to polling only"
            );
            return None;
        }
        Some(Self { _watcher: watcher })
    }
}
