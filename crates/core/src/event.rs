//! 이벤트 시스템 — 모듈 간 통신의 기본 단위
//!
//! 모든 모듈 간 통신은 이벤트 기반 메시지 패싱으로 수행됩니다.
//! [`EventMetadata`]는 모든 이벤트에 공통으로 포함되는 메타데이터이며,
//! [`Event`] trait은 모든 이벤트 타입이 구현해야 하는 인터페이스입니다.
//!
//! 프로세서는 [`ResultEvent`]를 알림 디스패처로, [`HubEvent`]를
//! 브로드캐스트 허브로 보냅니다. 워처의 소스 상태 변화는
//! [`StatusEvent`]로 허브에 전달됩니다.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::{Priority, ProcessingResult, SourceStatus};

// --- 모듈명 상수 ---

/// 수집 파이프라인 모듈명
pub const MODULE_INGEST: &str = "ingest";
/// 브로드캐스트 허브 모듈명
pub const MODULE_BROADCAST: &str = "broadcast";
/// 알림 디스패처 모듈명
pub const MODULE_NOTIFY: &str = "notify";
/// 데몬 모듈명
pub const MODULE_DAEMON: &str = "daemon";

/// 구독 가능한 브로드캐스트 이벤트 타입
///
/// 허브의 디스패치는 이 고정 enum 위에서 동작합니다.
/// 새 이벤트 타입을 추가해도 디스패치 로직은 바뀌지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// 분석 성공한 보안 이벤트
    SecurityEvent,
    /// 소스 상태 변화, 로테이션 감사 등 시스템 상태
    SystemStatus,
    /// 처리 결과 스트림 (실패 포함)
    ProcessingUpdate,
    /// 주기적 헬스 리포트
    HealthCheck,
}

impl EventType {
    /// 와이어 포맷 문자열을 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecurityEvent => "security_event",
            Self::SystemStatus => "system_status",
            Self::ProcessingUpdate => "processing_update",
            Self::HealthCheck => "health_check",
        }
    }

    /// 모든 이벤트 타입을 반환합니다.
    pub fn all() -> [EventType; 4] {
        [
            Self::SecurityEvent,
            Self::SystemStatus,
            Self::ProcessingUpdate,
            Self::HealthCheck,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 이벤트 메타데이터 — 모든 이벤트에 공통으로 포함되는 추적 정보
///
/// 발생 시각, 생성 모듈, 추적 ID를 담아 하나의 로그 라인이 캡처부터
/// 브로드캐스트/알림까지 흘러가는 과정을 추적할 수 있게 합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명
    pub source_module: String,
    /// 추적 ID — 같은 흐름의 이벤트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or_else(|_| "unknown".to_owned(), |d| d.as_secs().to_string());
        write!(
            f,
            "[{}] source={} trace={}",
            secs, self.source_module, self.trace_id,
        )
    }
}

/// 모든 이벤트가 구현해야 하는 기본 trait
///
/// `Send + Sync + 'static` 바운드로 `tokio::mpsc` 채널을 통한
/// 안전한 전송을 보장합니다.
pub trait Event: Send + Sync + 'static {
    /// 이벤트 고유 ID (UUID v4)
    fn event_id(&self) -> &str;

    /// 이벤트 메타데이터
    fn metadata(&self) -> &EventMetadata;

    /// 이벤트 타입
    fn event_type(&self) -> EventType;
}

/// 처리 결과 이벤트
///
/// 파이프라인 프로세서가 엔트리 하나를 처리할 때마다 생성하여
/// 알림 디스패처로 전송합니다.
#[derive(Debug, Clone)]
pub struct ResultEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 처리 결과
    pub result: ProcessingResult,
}

impl ResultEvent {
    /// 새로운 trace를 시작하는 결과 이벤트를 생성합니다.
    pub fn new(result: ProcessingResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_INGEST),
            result,
        }
    }

    /// 기존 trace에 연결된 결과 이벤트를 생성합니다.
    pub fn with_trace(result: ProcessingResult, trace_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_INGEST, trace_id),
            result,
        }
    }
}

impl Event for ResultEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> EventType {
        if self.result.is_success() {
            EventType::SecurityEvent
        } else {
            EventType::ProcessingUpdate
        }
    }
}

impl fmt::Display for ResultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResultEvent[{}] {}",
            &self.id[..8.min(self.id.len())],
            self.result,
        )
    }
}

/// 소스 상태 변화 이벤트
///
/// 파일 워처가 소스 상태 전이(활성화, 에러, 로테이션 감지 등)를
/// 기록할 때 생성합니다.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 대상 소스 이름
    pub source_name: String,
    /// 전이된 상태
    pub status: SourceStatus,
    /// 상태 설명 (예: "rotation detected, offset reset")
    pub message: String,
}

impl StatusEvent {
    /// 새 상태 이벤트를 생성합니다.
    pub fn new(
        source_name: impl Into<String>,
        status: SourceStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_INGEST),
            source_name: source_name.into(),
            status,
            message: message.into(),
        }
    }
}

impl Event for StatusEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> EventType {
        EventType::SystemStatus
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StatusEvent[{}] source={} status={} {}",
            &self.id[..8.min(self.id.len())],
            self.source_name,
            self.status,
            self.message,
        )
    }
}

/// 브로드캐스트 허브로 전달되는 이벤트
///
/// 구독 필터가 JSON 페이로드를 파싱하지 않고 매칭할 수 있도록
/// 우선순위/분류/소스를 명시적 필드로 들고 다닙니다.
#[derive(Debug, Clone)]
pub struct HubEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 이벤트 타입
    pub event_type: EventType,
    /// 이벤트 우선순위
    pub priority: Priority,
    /// 이벤트 분류 (보안 이벤트에만 존재)
    pub category: Option<String>,
    /// 관련 소스 이름
    pub source_name: Option<String>,
    /// 직렬화된 페이로드
    pub data: serde_json::Value,
}

impl HubEvent {
    /// 분석 성공 결과에서 보안 이벤트를 생성합니다.
    pub fn security_event(result: &ProcessingResult, trace_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_INGEST, trace_id),
            event_type: EventType::SecurityEvent,
            priority: result
                .severity
                .map_or(Priority::MIN, |s| s.as_priority()),
            category: (!result.category.is_empty()).then(|| result.category.clone()),
            source_name: Some(result.entry_ref.source_name.clone()),
            data: serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        }
    }

    /// 처리 결과(성공/실패 무관)에서 처리 업데이트 이벤트를 생성합니다.
    pub fn processing_update(result: &ProcessingResult, trace_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_INGEST, trace_id),
            event_type: EventType::ProcessingUpdate,
            priority: result
                .severity
                .map_or(Priority::MIN, |s| s.as_priority()),
            category: (!result.category.is_empty()).then(|| result.category.clone()),
            source_name: Some(result.entry_ref.source_name.clone()),
            data: serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        }
    }

    /// 소스 상태 이벤트를 시스템 상태 이벤트로 변환합니다.
    pub fn system_status(status: &StatusEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_INGEST, status.metadata.trace_id.clone()),
            event_type: EventType::SystemStatus,
            priority: Priority::clamped(5),
            category: None,
            source_name: Some(status.source_name.clone()),
            data: serde_json::json!({
                "source": status.source_name,
                "status": status.status,
                "message": status.message,
            }),
        }
    }

    /// 헬스 리포트 이벤트를 생성합니다.
    pub fn health_check(report: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_DAEMON),
            event_type: EventType::HealthCheck,
            priority: Priority::MIN,
            category: None,
            source_name: None,
            data: report,
        }
    }
}

impl Event for HubEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> EventType {
        self.event_type
    }
}

impl fmt::Display for HubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HubEvent[{}] type={} priority={}",
            &self.id[..8.min(self.id.len())],
            self.event_type,
            self.priority,
        )
    }
}
