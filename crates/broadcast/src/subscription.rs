//! 구독과 필터 — 클라이언트별 유효 이벤트 집합
//!
//! 클라이언트의 유효 이벤트 집합은 구독한 이벤트 타입 집합과 필터의
//! 교집합입니다. `subscribe`/`unsubscribe`/`set_filter`는 모두 멱등
//! 연산입니다. 같은 구독 메시지를 두 번 보내도 상태는 한 번 보낸
//! 것과 동일합니다.

use std::collections::HashSet;

use logwarden_core::event::{EventType, HubEvent};
use logwarden_core::types::Priority;

use crate::error::BroadcastError;
use crate::message::FilterSpec;

/// 검증된 이벤트 필터
///
/// 분류/소스 필터는 해당 속성을 가진 이벤트에만 적용됩니다.
/// 분류가 없는 이벤트(시스템 상태 등)는 분류 필터를 통과합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    /// 최소 우선순위
    pub min_priority: Option<Priority>,
    /// 최대 우선순위
    pub max_priority: Option<Priority>,
    /// 허용 분류 (소문자 비교)
    pub categories: Option<HashSet<String>>,
    /// 허용 소스
    pub sources: Option<HashSet<String>>,
}

impl EventFilter {
    /// 와이어 명세를 검증하여 필터를 만듭니다.
    pub fn from_spec(spec: FilterSpec) -> Result<Self, BroadcastError> {
        let min_priority = spec
            .min_priority
            .map(|p| {
                Priority::new(p).ok_or_else(|| BroadcastError::InvalidFilter {
                    reason: format!("min_priority out of range: {p}"),
                })
            })
            .transpose()?;
        let max_priority = spec
            .max_priority
            .map(|p| {
                Priority::new(p).ok_or_else(|| BroadcastError::InvalidFilter {
                    reason: format!("max_priority out of range: {p}"),
                })
            })
            .transpose()?;

        if let (Some(min), Some(max)) = (min_priority, max_priority)
            && min > max
        {
            return Err(BroadcastError::InvalidFilter {
                reason: format!(
                    "min_priority {} exceeds max_priority {}",
                    min.get(),
                    max.get()
                ),
            });
        }

        Ok(Self {
            min_priority,
            max_priority,
            categories: spec
                .categories
                .map(|cs| cs.into_iter().map(|c| c.to_lowercase()).collect()),
            sources: spec.sources.map(|ss| ss.into_iter().collect()),
        })
    }

    /// 이벤트가 필터를 통과하는지 평가합니다.
    pub fn matches(&self, event: &HubEvent) -> bool {
        if let Some(min) = self.min_priority
            && event.priority < min
        {
            return false;
        }
        if let Some(max) = self.max_priority
            && event.priority > max
        {
            return false;
        }
        if let Some(categories) = &self.categories
            && let Some(category) = &event.category
            && !categories.contains(&category.to_lowercase())
        {
            return false;
        }
        if let Some(sources) = &self.sources
            && let Some(source) = &event.source_name
            && !sources.contains(source)
        {
            return false;
        }
        true
    }
}

/// 클라이언트 하나의 구독 상태
///
/// 브로드캐스트 허브가 단독으로 소유합니다. 연결 시 생성되고,
/// subscribe/unsubscribe/set_filter 메시지로 변경되며, 연결 종료 시
/// 파괴됩니다.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// 클라이언트 ID
    pub client_id: String,
    event_types: HashSet<EventType>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// 빈 구독을 생성합니다.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            event_types: HashSet::new(),
            filter: None,
        }
    }

    /// 이벤트 타입을 구독합니다 (멱등).
    pub fn subscribe(&mut self, event_types: &[EventType]) {
        self.event_types.extend(event_types.iter().copied());
    }

    /// 이벤트 타입 구독을 해제합니다 (멱등).
    pub fn unsubscribe(&mut self, event_types: &[EventType]) {
        for event_type in event_types {
            self.event_types.remove(event_type);
        }
    }

    /// 필터를 설정합니다 (기존 필터 대체).
    pub fn set_filter(&mut self, filter: EventFilter) {
        self.filter = Some(filter);
    }

    /// 필터를 제거합니다.
    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// 현재 필터를 반환합니다.
    pub fn filter(&self) -> Option<&EventFilter> {
        self.filter.as_ref()
    }

    /// 구독 중인 이벤트 타입을 정렬된 목록으로 반환합니다.
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.event_types.iter().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// 이벤트가 이 구독의 유효 집합에 들어가는지 평가합니다.
    pub fn matches(&self, event: &HubEvent) -> bool {
        if !self.event_types.contains(&event.event_type) {
            return false;
        }
        match &self.filter {
            Some(filter) => filter.matches(event),
            None => true,
        }
    }

    /// 구독 상태 요약을 반환합니다 (확인 응답용).
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "client_id": self.client_id,
            "event_types": self.event_types(),
            "has_filter": self.filter.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_core::event::EventMetadata;

    fn security_event(priority: u8, category: &str, source: &str) -> HubEvent {
        HubEvent {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace("test"),
            event_type: EventType::SecurityEvent,
            priority: Priority::clamped(priority),
            category: Some(category.to_owned()),
            source_name: Some(source.to_owned()),
            data: serde_json::Value::Null,
        }
    }

    fn status_event() -> HubEvent {
        HubEvent {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace("test"),
            event_type: EventType::SystemStatus,
            priority: Priority::clamped(5),
            category: None,
            source_name: Some("auth_logs".to_owned()),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn unsubscribed_type_never_matches() {
        let subscription = Subscription::new("c1");
        assert!(!subscription.matches(&security_event(8, "authentication", "auth_logs")));
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent]);
        let once = subscription.event_types();

        // 같은 구독을 다시 보내도 상태는 동일
        subscription.subscribe(&[EventType::SecurityEvent]);
        assert_eq!(subscription.event_types(), once);
        assert!(subscription.matches(&security_event(8, "authentication", "auth_logs")));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent, EventType::SystemStatus]);
        subscription.unsubscribe(&[EventType::SecurityEvent]);
        subscription.unsubscribe(&[EventType::SecurityEvent]);
        assert_eq!(subscription.event_types(), vec![EventType::SystemStatus]);
    }

    #[test]
    fn priority_filter_bounds() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent]);
        subscription.set_filter(
            EventFilter::from_spec(FilterSpec {
                min_priority: Some(5),
                max_priority: Some(9),
                ..Default::default()
            })
            .unwrap(),
        );

        assert!(!subscription.matches(&security_event(3, "authentication", "s")));
        assert!(subscription.matches(&security_event(5, "authentication", "s")));
        assert!(subscription.matches(&security_event(9, "authentication", "s")));
        assert!(!subscription.matches(&security_event(10, "authentication", "s")));
    }

    #[test]
    fn category_filter_is_case_insensitive() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent]);
        subscription.set_filter(
            EventFilter::from_spec(FilterSpec {
                categories: Some(vec!["Authentication".to_owned()]),
                ..Default::default()
            })
            .unwrap(),
        );

        assert!(subscription.matches(&security_event(8, "authentication", "s")));
        assert!(!subscription.matches(&security_event(8, "network", "s")));
    }

    #[test]
    fn category_filter_passes_events_without_category() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SystemStatus]);
        subscription.set_filter(
            EventFilter::from_spec(FilterSpec {
                categories: Some(vec!["authentication".to_owned()]),
                ..Default::default()
            })
            .unwrap(),
        );

        // 분류가 없는 상태 이벤트는 분류 필터의 영향을 받지 않음
        assert!(subscription.matches(&status_event()));
    }

    #[test]
    fn source_filter_restricts_sources() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent]);
        subscription.set_filter(
            EventFilter::from_spec(FilterSpec {
                sources: Some(vec!["auth_logs".to_owned()]),
                ..Default::default()
            })
            .unwrap(),
        );

        assert!(subscription.matches(&security_event(8, "authentication", "auth_logs")));
        assert!(!subscription.matches(&security_event(8, "authentication", "web_logs")));
    }

    #[test]
    fn clear_filter_restores_full_set() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent]);
        subscription.set_filter(
            EventFilter::from_spec(FilterSpec {
                min_priority: Some(9),
                ..Default::default()
            })
            .unwrap(),
        );
        assert!(!subscription.matches(&security_event(5, "authentication", "s")));

        subscription.clear_filter();
        assert!(subscription.matches(&security_event(5, "authentication", "s")));
    }

    #[test]
    fn filter_spec_rejects_out_of_range_priority() {
        let result = EventFilter::from_spec(FilterSpec {
            min_priority: Some(11),
            ..Default::default()
        });
        assert!(matches!(result, Err(BroadcastError::InvalidFilter { .. })));
    }

    #[test]
    fn filter_spec_rejects_inverted_bounds() {
        let result = EventFilter::from_spec(FilterSpec {
            min_priority: Some(8),
            max_priority: Some(2),
            ..Default::default()
        });
        assert!(matches!(result, Err(BroadcastError::InvalidFilter { .. })));
    }

    #[test]
    fn summary_reports_subscription_state() {
        let mut subscription = Subscription::new("c1");
        subscription.subscribe(&[EventType::SecurityEvent]);
        let summary = subscription.summary();
        assert_eq!(summary["client_id"], "c1");
        assert_eq!(summary["has_filter"], false);
        assert_eq!(summary["event_types"][0], "security_event");
    }
}
