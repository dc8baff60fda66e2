//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 모든 모듈이 공유하는 데이터 구조를 정의합니다.
//! 수집(ingest) → 처리(processor) → 배포(broadcast)/알림(notify)으로
//! 흐르는 데이터의 형태가 여기에 모여 있습니다.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// 우선순위 최댓값 (0~10 스케일)
pub const PRIORITY_MAX: u8 = 10;

/// 심각도 최댓값 (0~10 스케일)
pub const SEVERITY_MAX: u8 = 10;

/// 로그 소스/엔트리 우선순위 (0~10)
///
/// 숫자가 클수록 큐에서 먼저 드레인됩니다.
/// `Ord` 구현으로 우선순위 비교가 가능합니다.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// 최저 우선순위 (0)
    pub const MIN: Priority = Priority(0);
    /// 최고 우선순위 (10)
    pub const MAX: Priority = Priority(PRIORITY_MAX);

    /// 범위를 검증하여 우선순위를 생성합니다.
    pub fn new(value: u8) -> Option<Self> {
        (value <= PRIORITY_MAX).then_some(Self(value))
    }

    /// 범위를 벗어나는 값은 10으로 잘라 생성합니다.
    pub fn clamped(value: u8) -> Self {
        Self(value.min(PRIORITY_MAX))
    }

    /// 내부 값을 반환합니다.
    pub fn get(self) -> u8 {
        self.0
    }

    /// 두 우선순위 중 높은 쪽을 반환합니다 (콘텐츠 기반 부스트에 사용).
    pub fn boosted(self, other: Priority) -> Self {
        self.max(other)
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("priority must be 0-{PRIORITY_MAX}, got {value}"))
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 분석 결과 심각도 (0~10)
///
/// 외부 분석기가 산정한 보안 이벤트의 심각도입니다.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    /// 최저 심각도 (0)
    pub const MIN: Severity = Severity(0);
    /// 최고 심각도 (10)
    pub const MAX: Severity = Severity(SEVERITY_MAX);

    /// 범위를 검증하여 심각도를 생성합니다.
    pub fn new(value: u8) -> Option<Self> {
        (value <= SEVERITY_MAX).then_some(Self(value))
    }

    /// 범위를 벗어나는 값은 10으로 잘라 생성합니다.
    pub fn clamped(value: u8) -> Self {
        Self(value.min(SEVERITY_MAX))
    }

    /// 내부 값을 반환합니다.
    pub fn get(self) -> u8 {
        self.0
    }

    /// 브로드캐스트 이벤트 우선순위로 변환합니다 (동일 스케일).
    pub fn as_priority(self) -> Priority {
        Priority(self.0)
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("severity must be 0-{SEVERITY_MAX}, got {value}"))
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.0
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 로그 소스 상태
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// 정상 수집 중
    Active,
    /// 아직 시작하지 않음 (기본값)
    #[default]
    Inactive,
    /// 에러 발생, 백오프 재시도 대기 중
    Error,
    /// 설정으로 비활성화됨 (상태 표시는 유지)
    Paused,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Error => write!(f, "error"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// 감시 대상 로그 소스
///
/// 설정에서 생성되며, 파일 워처가 읽기 성공 시마다 런타임 필드를 갱신합니다.
/// 불변식: 파일 소스에서는 항상 `last_offset <= last_size`.
/// truncation 기반 로테이션 감지 중에만 일시적으로 위반되며,
/// 감지 즉시 `last_offset = 0`으로 리셋됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSource {
    /// 소스 고유 이름
    pub name: String,
    /// 파일 또는 디렉토리 경로
    pub path: PathBuf,
    /// 디렉토리 소스 여부
    pub is_directory: bool,
    /// 디렉토리 소스의 파일명 glob 패턴 (예: "*.log")
    pub file_pattern: Option<String>,
    /// 활성화 여부 — 비활성 소스는 건너뛰되 상태 표시는 유지
    pub enabled: bool,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 기본 우선순위 (엔트리에 상속됨)
    pub priority: Priority,
    /// 마지막으로 커밋된 읽기 오프셋 (바이트)
    pub last_offset: u64,
    /// 마지막으로 관측된 파일 크기 (바이트)
    pub last_size: u64,
    /// 마지막 감시 시각
    pub last_monitored_at: Option<SystemTime>,
    /// 현재 상태
    pub status: SourceStatus,
    /// 에러 상태일 때의 메시지
    pub error_message: Option<String>,
}

impl LogSource {
    /// 파일 소스를 생성합니다.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_directory: false,
            file_pattern: None,
            enabled: true,
            poll_interval_ms: 1000,
            priority,
            last_offset: 0,
            last_size: 0,
            last_monitored_at: None,
            status: SourceStatus::Inactive,
            error_message: None,
        }
    }

    /// 디렉토리 소스를 생성합니다.
    pub fn directory(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        file_pattern: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            is_directory: true,
            file_pattern: Some(file_pattern.into()),
            ..Self::file(name, path, priority)
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) status={} offset={}/{}",
            self.name,
            self.path.display(),
            self.status,
            self.last_offset,
            self.last_size,
        )
    }
}

/// 수집된 로그 엔트리
///
/// 파일 워처가 생성하고, 파이프라인 프로세서가 정확히 한 번 소비합니다.
/// 큐에 들어간 이후에는 불변입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// 원시 텍스트 (한 줄 또는 블록)
    pub content: String,
    /// 소스 이름
    pub source_name: String,
    /// 소스 파일 경로
    pub source_path: PathBuf,
    /// 캡처 시각
    pub captured_at: SystemTime,
    /// 우선순위 (소스에서 상속, 콘텐츠 패턴으로 부스트 가능)
    pub priority: Priority,
    /// 이 엔트리를 읽은 파일 바이트 오프셋 (재생/감사용)
    pub file_offset: u64,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[p{}] {}@{}: {}",
            self.priority,
            self.source_name,
            self.file_offset,
            self.content.chars().take(80).collect::<String>(),
        )
    }
}

/// 처리 결과와 원본 엔트리의 상관관계 키
///
/// 프로세서 워커가 병렬로 돌기 때문에 결과는 완료 순서로 도착합니다.
/// 엄격한 순서가 필요한 소비자는 `sequence`를 정렬 키로 사용해야 합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryRef {
    /// 큐 시퀀스 번호
    pub sequence: u64,
    /// 소스 이름
    pub source_name: String,
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_name, self.sequence)
    }
}

/// 처리 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// 파싱 및 분석 성공
    Success,
    /// 파싱 실패 — 원본은 수동 검토용으로 보존됨
    ParseFailed,
    /// 분석 실패 (타임아웃 포함, 재시도 소진 후)
    AnalysisFailed,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::ParseFailed => write!(f, "parse_failed"),
            Self::AnalysisFailed => write!(f, "analysis_failed"),
        }
    }
}

/// 로그 엔트리 하나에 대한 처리 결과
///
/// 엔트리당 정확히 한 번 생성되며 불변입니다.
/// 브로드캐스트 허브와 알림 디스패처에 발행된 뒤 영속화 협력자에 전달됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// 원본 엔트리 참조
    pub entry_ref: EntryRef,
    /// 처리 상태
    pub status: ResultStatus,
    /// 심각도 (성공 시에만 존재)
    pub severity: Option<Severity>,
    /// 이벤트 분류 (예: "authentication", "network")
    pub category: String,
    /// 요약 메시지
    pub message: String,
    /// 분석기가 제공한 설명
    pub explanation: String,
    /// 권장 대응 조치
    pub recommendations: Vec<String>,
    /// 처리 소요 시간 (밀리초)
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    /// 성공 결과를 생성합니다.
    pub fn success(
        entry_ref: EntryRef,
        analysis: Analysis,
        message: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            entry_ref,
            status: ResultStatus::Success,
            severity: Some(analysis.severity),
            category: analysis.category,
            message: message.into(),
            explanation: analysis.explanation,
            recommendations: analysis.recommendations,
            processing_time_ms,
        }
    }

    /// 파싱 실패 결과를 생성합니다.
    pub fn parse_failed(
        entry_ref: EntryRef,
        message: impl Into<String>,
        reason: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            entry_ref,
            status: ResultStatus::ParseFailed,
            severity: None,
            category: String::new(),
            message: message.into(),
            explanation: reason.into(),
            recommendations: Vec::new(),
            processing_time_ms,
        }
    }

    /// 분석 실패 결과를 생성합니다.
    pub fn analysis_failed(
        entry_ref: EntryRef,
        message: impl Into<String>,
        reason: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            entry_ref,
            status: ResultStatus::AnalysisFailed,
            severity: None,
            category: String::new(),
            message: message.into(),
            explanation: reason.into(),
            recommendations: Vec::new(),
            processing_time_ms,
        }
    }

    /// 성공 여부를 반환합니다.
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

impl fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} category={} severity={}",
            self.status,
            self.entry_ref,
            if self.category.is_empty() {
                "-"
            } else {
                self.category.as_str()
            },
            self.severity.map_or_else(|| "-".to_owned(), |s| s.to_string()),
        )
    }
}

/// 외부 파서가 반환하는 구조화된 이벤트
///
/// 파싱 휴리스틱 자체는 이 크레이트 밖의 협력자 구현에 있습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEvent {
    /// 정규화된 메시지
    pub message: String,
    /// 소스 이름
    pub source_name: String,
    /// 로그 자체 타임스탬프 (파싱된 경우)
    pub timestamp: Option<SystemTime>,
    /// 추출된 추가 필드 (key-value 쌍)
    pub fields: Vec<(String, String)>,
}

/// 외부 분석기가 반환하는 분석 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// 심각도 (0~10)
    pub severity: Severity,
    /// 이벤트 분류
    pub category: String,
    /// 심각도 판단 근거
    pub explanation: String,
    /// 권장 대응 조치
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_range_enforced() {
        assert_eq!(Priority::new(0), Some(Priority::MIN));
        assert_eq!(Priority::new(10), Some(Priority::MAX));
        assert_eq!(Priority::new(11), None);
    }

    #[test]
    fn priority_clamped_caps_at_max() {
        assert_eq!(Priority::clamped(255), Priority::MAX);
        assert_eq!(Priority::clamped(3).get(), 3);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::clamped(5) > Priority::clamped(1));
        assert!(Priority::MIN < Priority::MAX);
    }

    #[test]
    fn priority_boosted_takes_higher() {
        let base = Priority::clamped(3);
        assert_eq!(base.boosted(Priority::clamped(8)).get(), 8);
        assert_eq!(base.boosted(Priority::clamped(1)).get(), 3);
    }

    #[test]
    fn priority_serde_rejects_out_of_range() {
        let ok: Result<Priority, _> = serde_json::from_str("7");
        assert_eq!(ok.unwrap().get(), 7);
        let err: Result<Priority, _> = serde_json::from_str("42");
        assert!(err.is_err());
    }

    #[test]
    fn severity_range_enforced() {
        assert!(Severity::new(10).is_some());
        assert!(Severity::new(11).is_none());
    }

    #[test]
    fn severity_as_priority_same_scale() {
        let sev = Severity::clamped(9);
        assert_eq!(sev.as_priority().get(), 9);
    }

    #[test]
    fn source_status_display() {
        assert_eq!(SourceStatus::Active.to_string(), "active");
        assert_eq!(SourceStatus::Error.to_string(), "error");
        assert_eq!(SourceStatus::Paused.to_string(), "paused");
        assert_eq!(SourceStatus::default(), SourceStatus::Inactive);
    }

    #[test]
    fn log_source_file_constructor() {
        let source = LogSource::file("auth_logs", "/var/log/auth.log", Priority::clamped(8));
        assert_eq!(source.name, "auth_logs");
        assert!(!source.is_directory);
        assert!(source.enabled);
        assert_eq!(source.last_offset, 0);
        assert_eq!(source.status, SourceStatus::Inactive);
    }

    #[test]
    fn log_source_directory_constructor() {
        let source =
            LogSource::directory("app_logs", "/var/log/app", "*.log", Priority::clamped(5));
        assert!(source.is_directory);
        assert_eq!(source.file_pattern.as_deref(), Some("*.log"));
    }

    #[test]
    fn log_source_display_contains_offset() {
        let mut source = LogSource::file("s", "/tmp/s.log", Priority::MIN);
        source.last_offset = 42;
        source.last_size = 100;
        let display = source.to_string();
        assert!(display.contains("42/100"));
    }

    #[test]
    fn entry_ref_display() {
        let entry_ref = EntryRef {
            sequence: 17,
            source_name: "auth_logs".to_owned(),
        };
        assert_eq!(entry_ref.to_string(), "auth_logs#17");
    }

    #[test]
    fn result_status_serde_snake_case() {
        let json = serde_json::to_string(&ResultStatus::ParseFailed).unwrap();
        assert_eq!(json, "\"parse_failed\"");
    }

    #[test]
    fn success_result_carries_analysis() {
        let analysis = Analysis {
            severity: Severity::clamped(8),
            category: "authentication".to_owned(),
            explanation: "failed login burst".to_owned(),
            recommendations: vec!["block source ip".to_owned()],
        };
        let result = ProcessingResult::success(
            EntryRef {
                sequence: 1,
                source_name: "auth_logs".to_owned(),
            },
            analysis,
            "Failed password for root",
            12,
        );
        assert!(result.is_success());
        assert_eq!(result.severity.unwrap().get(), 8);
        assert_eq!(result.category, "authentication");
    }

    #[test]
    fn parse_failed_result_has_no_severity() {
        let result = ProcessingResult::parse_failed(
            EntryRef {
                sequence: 2,
                source_name: "s".to_owned(),
            },
            "garbage line",
            "unknown format",
            3,
        );
        assert_eq!(result.status, ResultStatus::ParseFailed);
        assert!(result.severity.is_none());
        assert!(!result.is_success());
    }

    #[test]
    fn processing_result_serialize_roundtrip() {
        let result = ProcessingResult::analysis_failed(
            EntryRef {
                sequence: 3,
                source_name: "s".to_owned(),
            },
            "msg",
            "analyzer timeout",
            250,
        );
        let json = serde_json::to_string(&result).unwrap();
        let deserialized: ProcessingResult = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.status, ResultStatus::AnalysisFailed);
        assert_eq!(deserialized.entry_ref.sequence, 3);
    }

    #[test]
    fn log_entry_display_truncates_content() {
        let entry = LogEntry {
            content: "x".repeat(200),
            source_name: "s".to_owned(),
            source_path: PathBuf::from("/tmp/s.log"),
            captured_at: SystemTime::now(),
            priority: Priority::clamped(5),
            file_offset: 0,
        };
        assert!(entry.to_string().len() < 200);
    }
}
