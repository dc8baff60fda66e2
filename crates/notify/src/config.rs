//! 알림 디스패처 설정

use std::path::PathBuf;

use logwarden_core::config::LogwardenConfig;
use logwarden_core::retry::RetryPolicy;

use crate::error::NotifyError;

/// 알림 디스패처 설정
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 알림 룰 YAML 디렉토리
    pub rules_dir: PathBuf,
    /// 인메모리 전달 이력 최대 보관 개수
    pub history_limit: usize,
    /// 전달 실패 재시도 정책
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_core(&LogwardenConfig::default())
    }
}

impl DispatcherConfig {
    /// core 통합 설정에서 디스패처 설정을 구성합니다.
    pub fn from_core(core: &LogwardenConfig) -> Self {
        Self {
            enabled: core.notification.enabled,
            rules_dir: PathBuf::from(&core.notification.rules_dir),
            history_limit: core.notification.history_limit,
            retry: core.notification.retry.clone(),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.enabled && self.rules_dir.as_os_str().is_empty() {
            return Err(NotifyError::Config {
                field: "rules_dir".to_owned(),
                reason: "must not be empty when enabled".to_owned(),
            });
        }
        if self.history_limit == 0 {
            return Err(NotifyError::Config {
                field: "history_limit".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        self.retry
            .validate()
            .map_err(|reason| NotifyError::Config {
                field: "retry".to_owned(),
                reason,
            })?;
        Ok(())
    }
}
