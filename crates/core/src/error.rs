//! 에러 타입 — 도메인별 에러 정의
//!
//! 어떤 에러도 수집 루프 전체를 중단시키지 않습니다.
//! 아이템/클라이언트 단위 실패는 각자 격리되어 로깅·카운팅되고,
//! 상태/메트릭으로만 노출됩니다.

/// Logwarden 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogwardenError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기/채널 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 로그 소스 에러 (권한, 부재, 로테이션)
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 분석 에러
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// 영속화 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 알림 전달 에러
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// 플러그인 레지스트리 에러
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
///
/// 설정 적용 시점에 거부되며, 이전의 유효한 설정이 계속 활성 상태로 남습니다.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기/채널 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중인 파이프라인을 다시 시작함
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아닌 파이프라인을 정지함
    #[error("pipeline not running")]
    NotRunning,

    /// 종료 처리 실패
    #[error("pipeline shutdown failed: {0}")]
    ShutdownFailed(String),
}

/// 로그 소스 에러
///
/// 로컬에서 백오프 재시도로 복구되며, 소스 상태로만 표면화됩니다.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// 파일/디렉토리가 존재하지 않음
    #[error("source path not found: {path}")]
    NotFound { path: String },

    /// 접근 권한 없음
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    /// 읽기 실패
    #[error("read failed for {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// 유효하지 않은 glob 패턴
    #[error("invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// 외부 파서가 반환하는 에러
///
/// 파싱 실패는 치명적이지 않습니다. 원본이 보존되고 플래그가 남습니다.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 파싱 실패
    #[error("parse failed: {reason}")]
    Failed { reason: String },

    /// 지원하지 않는 형식
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// 외부 분석기가 반환하는 에러
///
/// 제한 횟수만큼 재시도된 뒤 실패로 기록됩니다. 치명적이지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// 호출자가 지정한 타임아웃 초과
    #[error("analysis timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// 분석 실패
    #[error("analysis failed: {0}")]
    Failed(String),

    /// 분석기 사용 불가 (일시적)
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
}

/// 영속화 협력자 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 스토리지 사용 불가
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// 쓰기 실패
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// 알림 채널 전달 에러
///
/// 채널별로 독립적으로 재시도되며, 한 채널의 실패가 다른 채널을 막지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// 설정된 채널이 등록되어 있지 않음
    #[error("channel not registered: {0}")]
    ChannelUnavailable(String),

    /// 전송 실패
    #[error("send via '{channel}' failed: {reason}")]
    SendFailed { channel: String, reason: String },
}

/// 플러그인 레지스트리 에러
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// 동일 이름의 플러그인이 이미 등록됨
    #[error("plugin already registered: {name}")]
    AlreadyRegistered { name: String },

    /// 플러그인을 찾을 수 없음
    #[error("plugin not found: {name}")]
    NotFound { name: String },

    /// 일부 플러그인 정지 실패 (수집된 에러 목록)
    #[error("plugin stop failed: {0}")]
    StopFailed(String),
}
