//! 브로드캐스트 허브 설정

use std::time::Duration;

use logwarden_core::config::LogwardenConfig;

use crate::error::BroadcastError;

/// 브로드캐스트 허브 설정
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// 클라이언트별 아웃바운드 버퍼 크기
    pub outbound_buffer: usize,
    /// 핑 점검 주기
    pub ping_interval: Duration,
    /// 연속 핑 미수신 허용 횟수
    pub missed_ping_limit: u32,
    /// 핸드셰이크 인증 토큰 (None이면 인증 없이 허용)
    pub auth_token: Option<String>,
    /// 허브 이벤트 채널 용량 (생산자 → 허브)
    pub event_channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_core(&LogwardenConfig::default())
    }
}

impl HubConfig {
    /// core 통합 설정에서 허브 설정을 구성합니다.
    pub fn from_core(core: &LogwardenConfig) -> Self {
        Self {
            outbound_buffer: core.broadcast.outbound_buffer,
            ping_interval: Duration::from_secs(core.broadcast.ping_interval_secs),
            missed_ping_limit: core.broadcast.missed_ping_limit,
            auth_token: core.broadcast.auth_token.clone(),
            event_channel_capacity: 256,
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.outbound_buffer == 0 {
            return Err(BroadcastError::Config {
                field: "outbound_buffer".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.missed_ping_limit == 0 {
            return Err(BroadcastError::Config {
                field: "missed_ping_limit".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(BroadcastError::Config {
                field: "event_channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}
