//! 알림 감사 레코드 — (이벤트, 룰, 채널) 조합당 하나
//!
//! 모든 전달 시도(성공, 실패, 억제)는 정확히 하나의 레코드를
//! 남깁니다. 추가 전용이며, 실패한 알림은 이 이력으로 표면화됩니다.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// 전달 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// 전달 성공
    Sent,
    /// 재시도 소진 후 실패
    Failed,
    /// 시도 대기 중
    Pending,
    /// 스로틀 윈도우로 억제됨
    Throttled,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Pending => write!(f, "pending"),
            Self::Throttled => write!(f, "throttled"),
        }
    }
}

/// 전달 시도 감사 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// 대상 이벤트 ID
    pub event_id: String,
    /// 매칭된 룰 이름
    pub rule_name: String,
    /// 전달 채널
    pub channel: String,
    /// 전달 상태
    pub status: DeliveryStatus,
    /// 전달 성공 시각
    pub sent_at: Option<SystemTime>,
    /// 실패 사유
    pub error_message: Option<String>,
    /// 레코드 생성 시각
    pub created_at: SystemTime,
}

impl NotificationRecord {
    /// 성공 레코드를 생성합니다.
    pub fn sent(event_id: &str, rule_name: &str, channel: &str) -> Self {
        Self {
            event_id: event_id.to_owned(),
            rule_name: rule_name.to_owned(),
            channel: channel.to_owned(),
            status: DeliveryStatus::Sent,
            sent_at: Some(SystemTime::now()),
            error_message: None,
            created_at: SystemTime::now(),
        }
    }

    /// 실패 레코드를 생성합니다.
    pub fn failed(event_id: &str, rule_name: &str, channel: &str, error: impl Into<String>) -> Self {
        Self {
            event_id: event_id.to_owned(),
            rule_name: rule_name.to_owned(),
            channel: channel.to_owned(),
            status: DeliveryStatus::Failed,
            sent_at: None,
            error_message: Some(error.into()),
            created_at: SystemTime::now(),
        }
    }

    /// 억제 레코드를 생성합니다.
    pub fn throttled(event_id: &str, rule_name: &str, channel: &str) -> Self {
        Self {
            event_id: event_id.to_owned(),
            rule_name: rule_name.to_owned(),
            channel: channel.to_owned(),
            status: DeliveryStatus::Throttled,
            sent_at: None,
            error_message: None,
            created_at: SystemTime::now(),
        }
    }
}

impl fmt::Display for NotificationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] event={} rule={} channel={}",
            self.status, self.event_id, self.rule_name, self.channel,
        )
    }
}
