//! 브로드캐스트 허브 에러 타입
//!
//! 클라이언트 하나의 에러는 그 연결에만 국한됩니다. 다른 클라이언트의
//! 전달에는 영향을 주지 않습니다.

use logwarden_core::error::{LogwardenError, PipelineError};

/// 브로드캐스트 허브 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// 인증 실패 — `Open` 상태에 도달하기 전에 거부됨
    #[error("unauthorized connection attempt for client '{client_id}'")]
    Unauthorized {
        /// 연결을 시도한 클라이언트 ID
        client_id: String,
    },

    /// 알 수 없는 클라이언트
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// 유효하지 않은 필터
    #[error("invalid filter: {reason}")]
    InvalidFilter {
        /// 거부 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<BroadcastError> for LogwardenError {
    fn from(err: BroadcastError) -> Self {
        LogwardenError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}
