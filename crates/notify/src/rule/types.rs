//! 알림 룰 데이터 타입
//!
//! YAML 룰 파일에서 역직렬화되는 구조체를 정의합니다.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use logwarden_core::types::Severity;

use crate::error::NotifyError;

/// 알림 룰 -- 하나의 YAML 룰 파일에 대응합니다.
///
/// # YAML 스키마
/// ```yaml
/// name: critical_auth
/// enabled: true
/// min_severity: 7
/// max_severity: 10
/// categories:
///   - authentication
/// channels:
///   - security_email
///   - oncall_webhook
/// throttle_minutes: 15
/// ```
///
/// 불변식: `min_severity <= max_severity`.
/// 룰은 외부 설정 경로로만 변경되며, 평가 시점의 디스패처에게는
/// 읽기 전용입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    /// 룰 고유 이름
    pub name: String,
    /// 활성화 여부
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 최소 심각도 (0~10)
    pub min_severity: Severity,
    /// 최대 심각도 (0~10)
    pub max_severity: Severity,
    /// 매칭 분류 목록 (비어있으면 전체 허용)
    #[serde(default)]
    pub categories: Vec<String>,
    /// 전달 채널 식별자 목록
    pub channels: Vec<String>,
    /// 스로틀 윈도우 (분, 0이면 스로틀 없음)
    #[serde(default)]
    pub throttle_minutes: u64,
}

fn default_enabled() -> bool {
    true
}

impl NotificationRule {
    /// 룰의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.name.is_empty() {
            return Err(NotifyError::RuleValidation {
                rule_name: "(empty)".to_owned(),
                reason: "rule name must not be empty".to_owned(),
            });
        }
        if self.min_severity > self.max_severity {
            return Err(NotifyError::RuleValidation {
                rule_name: self.name.clone(),
                reason: format!(
                    "min_severity {} exceeds max_severity {}",
                    self.min_severity, self.max_severity
                ),
            });
        }
        if self.channels.is_empty() {
            return Err(NotifyError::RuleValidation {
                rule_name: self.name.clone(),
                reason: "at least one channel is required".to_owned(),
            });
        }
        if self.channels.iter().any(|c| c.is_empty()) {
            return Err(NotifyError::RuleValidation {
                rule_name: self.name.clone(),
                reason: "channel identifiers must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    /// 처리 결과가 이 룰에 매칭되는지 평가합니다.
    ///
    /// 분류 비교는 대소문자를 구분하지 않습니다.
    pub fn matches(&self, severity: Severity, category: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if severity < self.min_severity || severity > self.max_severity {
            return false;
        }
        if self.categories.is_empty() {
            return true;
        }
        self.categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }

    /// 스로틀 윈도우를 반환합니다.
    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_minutes * 60)
    }
}
