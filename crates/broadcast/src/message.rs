//! 와이어 메시지 — 클라이언트 요청과 아웃바운드 프레임
//!
//! 허브는 WebSocket류 전송 계층과 이 형태로 대화합니다.
//! 인바운드: `{type: subscribe|unsubscribe|set_filter|clear_filter|ping, data}`
//! 아웃바운드: `{type, data, timestamp, priority}`

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use logwarden_core::event::{EventType, HubEvent};

/// 클라이언트 → 허브 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    /// 이벤트 타입 구독 (멱등)
    Subscribe {
        /// 구독할 이벤트 타입 목록
        event_types: Vec<EventType>,
    },
    /// 이벤트 타입 구독 해제 (멱등)
    Unsubscribe {
        /// 해제할 이벤트 타입 목록
        event_types: Vec<EventType>,
    },
    /// 필터 설정 (기존 필터 대체, 멱등)
    SetFilter(FilterSpec),
    /// 필터 제거
    ClearFilter,
    /// 생존성 핑
    Ping,
}

impl ClientRequest {
    /// 디스패치 테이블 키를 반환합니다.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Subscribe { .. } => RequestKind::Subscribe,
            Self::Unsubscribe { .. } => RequestKind::Unsubscribe,
            Self::SetFilter(_) => RequestKind::SetFilter,
            Self::ClearFilter => RequestKind::ClearFilter,
            Self::Ping => RequestKind::Ping,
        }
    }
}

/// 요청 종류 — 핸들러 디스패치 테이블의 키
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// 구독
    Subscribe,
    /// 구독 해제
    Unsubscribe,
    /// 필터 설정
    SetFilter,
    /// 필터 제거
    ClearFilter,
    /// 핑
    Ping,
}

/// 와이어 필터 명세 (검증 전)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// 최소 우선순위 (0~10)
    pub min_priority: Option<u8>,
    /// 최대 우선순위 (0~10)
    pub max_priority: Option<u8>,
    /// 허용 분류 목록 (None이면 전체)
    pub categories: Option<Vec<String>>,
    /// 허용 소스 목록 (None이면 전체)
    pub sources: Option<Vec<String>>,
}

/// 아웃바운드 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// 보안 이벤트
    SecurityEvent,
    /// 시스템 상태
    SystemStatus,
    /// 처리 업데이트
    ProcessingUpdate,
    /// 헬스 리포트
    HealthCheck,
    /// 핑 응답
    Pong,
    /// 구독 상태 확인 응답
    Subscribed,
    /// 서버 종료 통지
    Shutdown,
}

impl From<EventType> for FrameKind {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::SecurityEvent => Self::SecurityEvent,
            EventType::SystemStatus => Self::SystemStatus,
            EventType::ProcessingUpdate => Self::ProcessingUpdate,
            EventType::HealthCheck => Self::HealthCheck,
        }
    }
}

/// 허브 → 클라이언트 프레임
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    /// 프레임 종류
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// 페이로드
    pub data: serde_json::Value,
    /// 생성 시각 (epoch 밀리초)
    pub timestamp: u64,
    /// 우선순위 (0~10)
    pub priority: u8,
}

impl Frame {
    /// 허브 이벤트에서 프레임을 만듭니다.
    pub fn from_event(event: &HubEvent) -> Self {
        Self {
            kind: event.event_type.into(),
            data: event.data.clone(),
            timestamp: epoch_millis(),
            priority: event.priority.get(),
        }
    }

    /// 핑 응답 프레임
    pub fn pong() -> Self {
        Self {
            kind: FrameKind::Pong,
            data: serde_json::Value::Null,
            timestamp: epoch_millis(),
            priority: 0,
        }
    }

    /// 구독 상태 확인 프레임
    pub fn subscribed(summary: serde_json::Value) -> Self {
        Self {
            kind: FrameKind::Subscribed,
            data: summary,
            timestamp: epoch_millis(),
            priority: 0,
        }
    }

    /// 서버 측 정상 종료 통지 프레임
    pub fn shutdown() -> Self {
        Self {
            kind: FrameKind::Shutdown,
            data: serde_json::json!({ "reason": "server shutting down" }),
            timestamp: epoch_millis(),
            priority: 0,
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_wire_format() {
        let json = r#"{"type":"subscribe","data":{"event_types":["security_event","system_status"]}}"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            ClientRequest::Subscribe {
                event_types: vec![EventType::SecurityEvent, EventType::SystemStatus],
            }
        );
        assert_eq!(request.kind(), RequestKind::Subscribe);
    }

    #[test]
    fn ping_request_wire_format() {
        let request: ClientRequest = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(request, ClientRequest::Ping);
    }

    #[test]
    fn set_filter_request_wire_format() {
        let json = r#"{"type":"set_filter","data":{"min_priority":5,"categories":["authentication"]}}"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        match request {
            ClientRequest::SetFilter(spec) => {
                assert_eq!(spec.min_priority, Some(5));
                assert_eq!(spec.categories.as_deref(), Some(&["authentication".to_owned()][..]));
                assert!(spec.sources.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn frame_serializes_with_type_field() {
        let frame = Frame::pong();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["priority"], 0);
        assert!(json["timestamp"].is_u64());
    }

    #[test]
    fn frame_kind_maps_all_event_types() {
        assert_eq!(
            FrameKind::from(EventType::SecurityEvent),
            FrameKind::SecurityEvent
        );
        assert_eq!(
            FrameKind::from(EventType::HealthCheck),
            FrameKind::HealthCheck
        );
    }
}
