//! 알림 스로틀 — (룰, 채널) 쌍 단위 슬라이딩 윈도우
//!
//! 스로틀 키는 이벤트가 아니라 (룰, 채널) 쌍입니다. 같은 룰과 채널에
//! 해당하는 이벤트 버스트는 윈도우당 한 건의 알림으로 수렴합니다.
//! 윈도우는 마지막 '성공한' 전달 시각 기준입니다. 실패한 시도는
//! 윈도우를 갱신하지 않으므로 다음 이벤트가 다시 전달을 시도합니다.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// (룰, 채널) 쌍 단위 스로틀 추적기
#[derive(Debug, Default)]
pub struct Throttle {
    /// (rule, channel) -> 마지막 성공 전달 시각
    last_delivery: HashMap<(String, String), SystemTime>,
    /// 억제된 알림 수
    suppressed: u64,
}

impl Throttle {
    /// 새 스로틀 추적기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// (룰, 채널) 쌍이 윈도우 내에 있는지 확인합니다.
    ///
    /// `window`가 0이면 스로틀이 없습니다.
    pub fn is_throttled(&self, rule: &str, channel: &str, window: Duration) -> bool {
        if window.is_zero() {
            return false;
        }
        if let Some(last) = self
            .last_delivery
            .get(&(rule.to_owned(), channel.to_owned()))
            && let Ok(elapsed) = last.elapsed()
        {
            return elapsed < window;
        }
        false
    }

    /// 성공한 전달을 기록하여 윈도우를 엽니다.
    pub fn note_delivery(&mut self, rule: &str, channel: &str) {
        self.last_delivery
            .insert((rule.to_owned(), channel.to_owned()), SystemTime::now());
    }

    /// 억제 횟수를 기록합니다.
    pub fn note_suppressed(&mut self) {
        self.suppressed += 1;
    }

    /// 억제된 총 알림 수를 반환합니다.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    /// 만료된 추적 엔트리를 정리합니다.
    ///
    /// 주기적으로 호출하여 메모리 성장을 방지합니다.
    pub fn cleanup_expired(&mut self, max_window: Duration) {
        self.last_delivery.retain(|_, last| {
            last.elapsed()
                .map(|elapsed| elapsed < max_window * 2)
                .unwrap_or(false)
        });
    }
}
