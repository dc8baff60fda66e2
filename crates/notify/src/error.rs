//! 알림 디스패처 에러 타입
//!
//! 채널 하나의 전달 실패는 그 (이벤트, 룰, 채널) 시도에만 영향을
//! 줍니다. 디스패치 루프는 어떤 실패에도 중단되지 않습니다.

use logwarden_core::error::{LogwardenError, PipelineError};

/// 알림 디스패처 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 룰 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 룰 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 룰 유효성 검증 실패
    #[error("rule validation error: rule '{rule_name}': {reason}")]
    RuleValidation {
        /// 문제가 된 룰 이름
        rule_name: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<NotifyError> for LogwardenError {
    fn from(err: NotifyError) -> Self {
        LogwardenError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_validation_display_names_rule() {
        let err = NotifyError::RuleValidation {
            rule_name: "critical_auth".to_owned(),
            reason: "min_severity exceeds max_severity".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("critical_auth"));
        assert!(msg.contains("exceeds"));
    }

    #[test]
    fn converts_to_logwarden_error() {
        let err = NotifyError::Channel("closed".to_owned());
        let top: LogwardenError = err.into();
        assert!(matches!(top, LogwardenError::Pipeline(_)));
    }
}
