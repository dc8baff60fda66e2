//! 소스 오프셋 추적 — 커밋/복원과 내구성 저하 모드
//!
//! [`SourceTracker`]는 소스별 읽기 오프셋을 인메모리로 유지하고
//! 영속화 협력자를 통해 저장합니다. 재시작 시 이미 읽은 바이트를
//! 다시 읽거나 새 바이트를 건너뛰지 않고 이어서 읽을 수 있습니다.
//!
//! # 실패 시맨틱
//! 영속화 실패는 재시도 정책으로 재시도되며, 그래도 실패하면
//! 인메모리 오프셋만으로 동작을 계속합니다 (내구성 저하 경고 로그).
//! 수집은 어떤 경우에도 멈추지 않습니다.
//!
//! # 동시성
//! 오프셋 커밋은 소스당 단일 작성자(해당 소스의 워처 태스크)가
//! 수행합니다. 디렉토리 소스의 가상 소스들도 하나의 디렉토리 태스크
//! 안에서 순차적으로 커밋하므로 lost-update 경쟁이 없습니다.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use logwarden_core::pipeline::Persistence;
use logwarden_core::retry::{retry_with_policy, RetryPolicy};

/// 소스별 추적 상태
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackedOffset {
    /// 커밋된 읽기 오프셋 (바이트)
    pub offset: u64,
    /// 마지막으로 관측된 파일 크기
    pub file_size: u64,
    /// 마지막 커밋 시각
    pub committed_at: Option<SystemTime>,
}

/// 소스 오프셋 추적기
pub struct SourceTracker {
    persistence: Arc<dyn Persistence>,
    retry: RetryPolicy,
    states: Mutex<HashMap<String, TrackedOffset>>,
    degraded: AtomicBool,
}

impl SourceTracker {
    /// 새 추적기를 생성합니다.
    pub fn new(persistence: Arc<dyn Persistence>, retry: RetryPolicy) -> Self {
        Self {
            persistence,
            retry,
            states: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// 소스의 시작 오프셋을 복원합니다.
    ///
    /// 인메모리에 있으면 그 값을, 없으면 영속화 협력자에서 로드합니다.
    /// 로드 실패 시 0에서 시작합니다 (중복 수집이 유실보다 낫습니다).
    pub async fn hydrate(&self, source_name: &str) -> u64 {
        if let Some(state) = self.get(source_name) {
            return state.offset;
        }

        match self.persistence.load_offset(source_name).await {
            Ok(Some(offset)) => {
                self.set(source_name, offset, offset);
                tracing::debug!(source = source_name, offset, "offset restored");
                offset
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(
                    source = source_name,
                    error = %e,
                    "failed to load persisted offset, starting from 0"
                );
                0
            }
        }
    }

    /// 현재 추적 상태를 반환합니다.
    pub fn get(&self, source_name: &str) -> Option<TrackedOffset> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(source_name).copied())
    }

    /// 오프셋을 커밋합니다.
    ///
    /// 인메모리 상태를 먼저 갱신한 뒤 영속화합니다. 영속화가 재시도
    /// 끝에 실패해도 커밋 자체는 성공으로 간주됩니다 (내구성 저하).
    pub async fn commit(&self, source_name: &str, offset: u64, file_size: u64) {
        self.set(source_name, offset, file_size);

        let result = retry_with_policy(&self.retry, "save_offset", || {
            self.persistence.save_offset(source_name, offset, file_size)
        })
        .await;

        match result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(source = source_name, "offset durability restored");
                }
            }
            Err(e) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        source = source_name,
                        error = %e,
                        "offset persistence unavailable, continuing with in-memory offsets"
                    );
                }
            }
        }
    }

    /// 로테이션 시 오프셋을 0으로 리셋합니다.
    pub async fn reset(&self, source_name: &str) {
        tracing::info!(source = source_name, "resetting offset after rotation");
        self.commit(source_name, 0, 0).await;
    }

    /// 내구성 저하 모드 여부를 반환합니다.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// 전체 추적 상태의 스냅샷을 반환합니다 (상태 표시용).
    pub fn snapshot(&self) -> Vec<(String, TrackedOffset)> {
        self.states
            .lock()
            .map(|states| {
                states
                    .iter()
                    .map(|(name, state)| (name.clone(), *state))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set(&self, source_name: &str, offset: u64, file_size: u64) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(
                source_name.to_owned(),
                TrackedOffset {
                    offset,
                    file_size,
                    committed_at: Some(SystemTime::now()),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    use logwarden_core::error::StorageError;
    use logwarden_core::pipeline::BoxFuture;
    use logwarden_core::types::ProcessingResult;

    /// 실패를 주입할 수 있는 테스트용 영속화 협력자
    struct MemoryPersistence {
        offsets: Mutex<HashMap<String, u64>>,
        fail_saves: AtomicBool,
        save_calls: AtomicU64,
    }

    impl MemoryPersistence {
        fn new() -> Self {
            Self {
                offsets: Mutex::new(HashMap::new()),
                fail_saves: AtomicBool::new(false),
                save_calls: AtomicU64::new(0),
            }
        }
    }

    impl Persistence for MemoryPersistence {
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
            source_name: &'a str,
            offset: u64,
            _file_size: u64,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                self.save_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_saves.load(Ordering::SeqCst) {
                    return Err(StorageError::Unavailable("injected".to_owned()));
                }
                self.offsets
                    .lock()
                    .unwrap()
                    .insert(source_name.to_owned(), offset);
                Ok(())
            })
        }

        fn load_offset<'a>(
            &'a self,
            source_name: &'a str,
        ) -> BoxFuture<'a, Result<Option<u64>, StorageError>> {
            Box::pin(async move { Ok(self.offsets.lock().unwrap().get(source_name).copied()) })
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn commit_then_hydrate_roundtrip() {
        let persistence = Arc::new(MemoryPersistence::new());
        let tracker = SourceTracker::new(persistence.clone(), fast_retry());

        tracker.commit("auth_logs", 128, 256).await;
        assert_eq!(tracker.get("auth_logs").unwrap().offset, 128);

        // 새 추적기 = 프로세스 재시작 시뮬레이션
        let restarted = SourceTracker::new(persistence, fast_retry());
        assert_eq!(restarted.hydrate("auth_logs").await, 128);
    }

    #[tokio::test]
    async fn hydrate_unknown_source_starts_at_zero() {
        let tracker = SourceTracker::new(Arc::new(MemoryPersistence::new()), fast_retry());
        assert_eq!(tracker.hydrate("never_seen").await, 0);
    }

    #[tokio::test]
    async fn persistence_failure_degrades_but_keeps_offsets() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.fail_saves.store(true, Ordering::SeqCst);
        let tracker = SourceTracker::new(persistence.clone(), fast_retry());

        tracker.commit("s", 64, 64).await;

        // 영속화는 실패했지만 인메모리 오프셋은 유지되어 수집이 계속됨
        assert!(tracker.is_degraded());
        assert_eq!(tracker.get("s").unwrap().offset, 64);
        // 재시도 정책만큼 호출됨
        assert_eq!(persistence.save_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn degraded_mode_recovers_on_success() {
        let persistence = Arc::new(MemoryPersistence::new());
        let tracker = SourceTracker::new(persistence.clone(), fast_retry());

        persistence.fail_saves.store(true, Ordering::SeqCst);
        tracker.commit("s", 10, 10).await;
        assert!(tracker.is_degraded());

        persistence.fail_saves.store(false, Ordering::SeqCst);
        tracker.commit("s", 20, 20).await;
        assert!(!tracker.is_degraded());
    }

    #[tokio::test]
    async fn reset_commits_zero() {
        let persistence = Arc::new(MemoryPersistence::new());
        let tracker = SourceTracker::new(persistence, fast_retry());

        tracker.commit("s", 500, 500).await;
        tracker.reset("s").await;
        assert_eq!(tracker.get("s").unwrap().offset, 0);
    }

    #[tokio::test]
    async fn snapshot_lists_all_sources() {
        let tracker = SourceTracker::new(Arc::new(MemoryPersistence::new()), fast_retry());
        tracker.commit("a", 1, 1).await;
        tracker.commit("b", 2, 2).await;

        let mut names: Vec<String> = tracker.snapshot().into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, ["a", "b"]);
    }
}
