//! 재시도 정책 — 지수 백오프 재시도 헬퍼
//!
//! 로테이션 복구, 분석 실패, 알림 전달 실패는 모두 같은 형태의
//! 재시도 루프를 사용합니다. 정책(최대 시도 횟수, 기본 지연, 배수)을
//! 설정 값으로 주입받는 순수 헬퍼로 분리하여, 호출자마다 재시도
//! 로직이 따로 자라나지 않게 합니다.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 재시도 정책
///
/// `attempt`번째 재시도 전 지연은
/// `base_delay_ms * multiplier^attempt` (상한 `max_delay_ms`)입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (최초 시도 포함)
    pub max_attempts: u32,
    /// 첫 재시도 전 기본 지연 (밀리초)
    pub base_delay_ms: u64,
    /// 지연 배수
    pub multiplier: f64,
    /// 지연 상한 (밀리초)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// 재시도 없이 한 번만 시도하는 정책을 반환합니다.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `attempt`번째 실패 후 대기할 지연을 계산합니다 (0부터 시작).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let delay_ms = (self.base_delay_ms as f64 * factor).round();
        let capped = if delay_ms.is_finite() {
            (delay_ms as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }

    /// 정책 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_owned());
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be at least 1.0".to_owned());
        }
        Ok(())
    }
}

/// 정책에 따라 비동기 작업을 재시도합니다.
///
/// 각 실패는 `tracing::warn!`으로 기록되고, 시도 횟수를 소진하면
/// 마지막 에러를 반환합니다.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        op = op_name,
                        attempts = attempt,
                        error = %e,
                        "retries exhausted"
                    );
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    op = op_name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
