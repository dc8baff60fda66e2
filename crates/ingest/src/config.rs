//! 수집 파이프라인 설정
//!
//! [`IngestConfig`]는 core의 [`LogwardenConfig`](logwarden_core::config::LogwardenConfig)
//! 에서 워처/큐/프로세서 섹션을 모아 수집 파이프라인 전용 설정으로
//! 구성합니다.

use std::path::PathBuf;
use std::time::Duration;

use logwarden_core::config::{
    BoostPattern, LogwardenConfig, ShutdownPolicy, SourceConfig,
};
use logwarden_core::retry::RetryPolicy;

use crate::error::IngestError;

/// 수집 파이프라인 설정
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 감시 대상 소스 목록
    pub sources: Vec<SourceConfig>,
    /// 읽기 청크 크기 (바이트)
    pub chunk_size: usize,
    /// 폴링 주기 하한 (밀리초)
    pub poll_floor_ms: u64,
    /// 한 라인의 최대 길이 (바이트)
    pub max_line_bytes: usize,
    /// 우선순위 부스트 패턴
    pub boost: Vec<BoostPattern>,
    /// 큐 최대 용량
    pub queue_capacity: usize,
    /// 배치 드레인 최대 크기
    pub batch_size: usize,
    /// 배치 드레인 최대 대기 시간
    pub batch_wait: Duration,
    /// 우선순위 에이징 임계값
    pub aging_threshold: u32,
    /// 종료 시 잔여 엔트리 처리 정책
    pub shutdown_policy: ShutdownPolicy,
    /// 데드레터 파일 절대 경로 (data_dir 하위)
    pub dead_letter_path: PathBuf,
    /// 프로세서 워커 수
    pub workers: usize,
    /// 분석기 호출 타임아웃
    pub analyzer_timeout: Duration,
    /// 분석 실패 재시도 정책
    pub analysis_retry: RetryPolicy,
    /// 오프셋 영속화 재시도 정책
    pub offset_retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from_core(&LogwardenConfig::default())
    }
}

impl IngestConfig {
    /// core 통합 설정에서 수집 파이프라인 설정을 구성합니다.
    pub fn from_core(core: &LogwardenConfig) -> Self {
        Self {
            sources: core.sources.clone(),
            chunk_size: core.watcher.chunk_size,
            poll_floor_ms: core.watcher.poll_floor_ms,
            max_line_bytes: core.watcher.max_line_bytes,
            boost: core.watcher.boost.clone(),
            queue_capacity: core.queue.capacity,
            batch_size: core.queue.batch_size,
            batch_wait: Duration::from_millis(core.queue.batch_wait_ms),
            aging_threshold: core.queue.aging_threshold,
            shutdown_policy: core.queue.shutdown_policy,
            dead_letter_path: PathBuf::from(&core.general.data_dir)
                .join(&core.queue.dead_letter_file),
            workers: core.processor.workers,
            analyzer_timeout: Duration::from_millis(core.processor.analyzer_timeout_ms),
            analysis_retry: core.processor.retry.clone(),
            offset_retry: core.processor.retry.clone(),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// core 설정의 `validate()`와 겹치는 항목은 빌더가 직접 구성한
    /// 설정을 위해 한 번 더 확인합니다.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.queue_capacity == 0 {
            return Err(IngestError::Config {
                field: "queue_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.batch_size == 0 {
            return Err(IngestError::Config {
                field: "batch_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.workers == 0 {
            return Err(IngestError::Config {
                field: "workers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.chunk_size == 0 {
            return Err(IngestError::Config {
                field: "chunk_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.aging_threshold == 0 {
            return Err(IngestError::Config {
                field: "aging_threshold".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }

    /// 소스 폴링 주기를 하한에 맞춰 보정합니다.
    pub fn effective_poll_interval(&self, poll_interval_ms: u64) -> Duration {
        Duration::from_millis(poll_interval_ms.max(self.poll_floor_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        IngestConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_resolves_dead_letter_path() {
        let mut core = LogwardenConfig::default();
        core.general.data_dir = "/tmp/logwarden".to_owned();
        core.queue.dead_letter_file = "dl.jsonl".to_owned();
        let config = IngestConfig::from_core(&core);
        assert_eq!(config.dead_letter_path, PathBuf::from("/tmp/logwarden/dl.jsonl"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = IngestConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn poll_interval_clamped_to_floor() {
        let config = IngestConfig::default();
        // 하한(250ms)보다 작은 값은 하한으로 보정
        assert_eq!(
            config.effective_poll_interval(10),
            Duration::from_millis(250)
        );
        assert_eq!(
            config.effective_poll_interval(1000),
            Duration::from_millis(1000)
        );
    }
}
