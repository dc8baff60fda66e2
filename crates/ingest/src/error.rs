//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 수집 파이프라인 내부에서 발생하는 모든 에러를
//! 표현합니다. `From<IngestError> for LogwardenError` 변환이 구현되어
//! 있어 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 소스 단위 읽기 에러는 여기로 전파되지 않고 각 소스 태스크 안에서
//! 백오프 재시도로 격리됩니다.

use logwarden_core::error::{LogwardenError, PipelineError, SourceError};

/// 수집 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 소스 에러 (권한, 부재, 읽기 실패)
    #[error("source error: {0}")]
    Source(#[from] SourceError),

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

    /// 데드레터 기록 실패
    #[error("dead letter write failed: {path}: {reason}")]
    DeadLetter {
        /// 데드레터 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 우선순위 부스트 정규식 컴파일 실패
    #[error("invalid boost pattern '{pattern}': {reason}")]
    BoostPattern {
        /// 정규식 패턴
        pattern: String,
        /// 컴파일 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for LogwardenError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Source(e) => LogwardenError::Source(e),
            other => LogwardenError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
