//! 설정 관리 — logwarden.toml 파싱 및 런타임 설정
//!
//! [`LogwardenConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGWARDEN_QUEUE_CAPACITY=5000` 형식)
//! 3. 설정 파일 (`logwarden.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! 설정 적용 시점에 `validate()`가 실행되며, 유효하지 않은 설정은
//! 거부되고 이전의 유효한 설정이 계속 활성 상태로 남습니다.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogwardenError};
use crate::retry::RetryPolicy;
use crate::types::{LogSource, Priority, PRIORITY_MAX};

/// Logwarden 통합 설정
///
/// `logwarden.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogwardenConfig {
    /// 일반 설정
    pub general: GeneralConfig,
    /// 감시 대상 로그 소스 목록
    pub sources: Vec<SourceConfig>,
    /// 파일 워처 설정
    pub watcher: WatcherConfig,
    /// 수집 큐 설정
    pub queue: QueueConfig,
    /// 파이프라인 프로세서 설정
    pub processor: ProcessorConfig,
    /// 브로드캐스트 허브 설정
    pub broadcast: BroadcastConfig,
    /// 알림 디스패처 설정
    pub notification: NotificationConfig,
    /// 메트릭 엔드포인트 설정
    pub metrics: MetricsConfig,
}

impl LogwardenConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogwardenError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogwardenError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogwardenError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogwardenError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogwardenError> {
        toml::from_str(toml_str).map_err(|e| {
            LogwardenError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGWARDEN_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGWARDEN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGWARDEN_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "LOGWARDEN_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "LOGWARDEN_GENERAL_PID_FILE");

        // Watcher
        override_u64(
            &mut self.watcher.poll_floor_ms,
            "LOGWARDEN_WATCHER_POLL_FLOOR_MS",
        );
        override_usize(&mut self.watcher.chunk_size, "LOGWARDEN_WATCHER_CHUNK_SIZE");

        // Queue
        override_usize(&mut self.queue.capacity, "LOGWARDEN_QUEUE_CAPACITY");
        override_usize(&mut self.queue.batch_size, "LOGWARDEN_QUEUE_BATCH_SIZE");
        override_u64(&mut self.queue.batch_wait_ms, "LOGWARDEN_QUEUE_BATCH_WAIT_MS");

        // Processor
        override_usize(&mut self.processor.workers, "LOGWARDEN_PROCESSOR_WORKERS");
        override_u64(
            &mut self.processor.analyzer_timeout_ms,
            "LOGWARDEN_PROCESSOR_ANALYZER_TIMEOUT_MS",
        );

        // Broadcast
        override_bool(&mut self.broadcast.enabled, "LOGWARDEN_BROADCAST_ENABLED");
        override_usize(
            &mut self.broadcast.outbound_buffer,
            "LOGWARDEN_BROADCAST_OUTBOUND_BUFFER",
        );
        override_opt_string(
            &mut self.broadcast.auth_token,
            "LOGWARDEN_BROADCAST_AUTH_TOKEN",
        );

        // Notification
        override_bool(
            &mut self.notification.enabled,
            "LOGWARDEN_NOTIFICATION_ENABLED",
        );
        override_string(
            &mut self.notification.rules_dir,
            "LOGWARDEN_NOTIFICATION_RULES_DIR",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGWARDEN_METRICS_ENABLED");
        override_u16(&mut self.metrics.port, "LOGWARDEN_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogwardenError> {
        const MAX_QUEUE_CAPACITY: usize = 10_000_000;
        const MAX_BATCH_SIZE: usize = 100_000;
        const MAX_WORKERS: usize = 256;

        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid("general.log_level", format!(
                "must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid("general.log_format", format!(
                "must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        // 소스 검증: 이름 유일성, 우선순위 범위, 폴링 주기
        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(invalid("sources.name", "source name must not be empty"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(invalid(
                    "sources.name",
                    format!("duplicate source name '{}'", source.name),
                ));
            }
            if source.path.is_empty() {
                return Err(invalid(
                    "sources.path",
                    format!("source '{}' has an empty path", source.name),
                ));
            }
            if source.priority > PRIORITY_MAX {
                return Err(invalid(
                    "sources.priority",
                    format!(
                        "source '{}': priority must be 0-{PRIORITY_MAX}",
                        source.name
                    ),
                ));
            }
            if source.poll_interval_ms == 0 {
                return Err(invalid(
                    "sources.poll_interval_ms",
                    format!("source '{}': must be greater than 0", source.name),
                ));
            }
            if source.directory && source.file_pattern.as_deref().is_none_or(str::is_empty) {
                return Err(invalid(
                    "sources.file_pattern",
                    format!(
                        "directory source '{}' requires a file_pattern",
                        source.name
                    ),
                ));
            }
        }

        // 워처 검증
        if self.watcher.chunk_size == 0 {
            return Err(invalid("watcher.chunk_size", "must be greater than 0"));
        }
        if self.watcher.poll_floor_ms == 0 {
            return Err(invalid("watcher.poll_floor_ms", "must be greater than 0"));
        }
        for boost in &self.watcher.boost {
            if boost.pattern.is_empty() {
                return Err(invalid("watcher.boost.pattern", "must not be empty"));
            }
            if boost.priority > PRIORITY_MAX {
                return Err(invalid(
                    "watcher.boost.priority",
                    format!("must be 0-{PRIORITY_MAX}"),
                ));
            }
        }

        // 큐 검증
        if self.queue.capacity == 0 || self.queue.capacity > MAX_QUEUE_CAPACITY {
            return Err(invalid(
                "queue.capacity",
                format!("must be 1-{MAX_QUEUE_CAPACITY}"),
            ));
        }
        if self.queue.batch_size == 0 || self.queue.batch_size > MAX_BATCH_SIZE {
            return Err(invalid(
                "queue.batch_size",
                format!("must be 1-{MAX_BATCH_SIZE}"),
            ));
        }
        if self.queue.aging_threshold == 0 {
            return Err(invalid("queue.aging_threshold", "must be greater than 0"));
        }
        if self.queue.dead_letter_file.is_empty() {
            return Err(invalid("queue.dead_letter_file", "must not be empty"));
        }

        // 프로세서 검증
        if self.processor.workers == 0 || self.processor.workers > MAX_WORKERS {
            return Err(invalid(
                "processor.workers",
                format!("must be 1-{MAX_WORKERS}"),
            ));
        }
        if self.processor.analyzer_timeout_ms == 0 {
            return Err(invalid(
                "processor.analyzer_timeout_ms",
                "must be greater than 0",
            ));
        }
        self.processor
            .retry
            .validate()
            .map_err(|reason| invalid("processor.retry", reason))?;

        // 브로드캐스트 검증
        if self.broadcast.outbound_buffer == 0 {
            return Err(invalid("broadcast.outbound_buffer", "must be greater than 0"));
        }
        if self.broadcast.ping_interval_secs == 0 {
            return Err(invalid(
                "broadcast.ping_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.broadcast.missed_ping_limit == 0 {
            return Err(invalid(
                "broadcast.missed_ping_limit",
                "must be greater than 0",
            ));
        }

        // 알림 검증
        if self.notification.enabled && self.notification.rules_dir.is_empty() {
            return Err(invalid(
                "notification.rules_dir",
                "must not be empty when notification is enabled",
            ));
        }
        if self.notification.history_limit == 0 {
            return Err(invalid("notification.history_limit", "must be greater than 0"));
        }
        self.notification
            .retry
            .validate()
            .map_err(|reason| invalid("notification.retry", reason))?;

        // 메트릭 검증
        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is currently supported",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> LogwardenError {
    LogwardenError::Config(ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    })
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리 (데드레터 파일, 오프셋 파일 등)
    pub data_dir: String,
    /// PID 파일 경로 (빈 문자열이면 비활성화)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/logwarden".to_owned(),
            pid_file: "/var/run/logwarden.pid".to_owned(),
        }
    }
}

/// 로그 소스 설정 (`[[sources]]` 항목)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 소스 고유 이름
    pub name: String,
    /// 파일 또는 디렉토리 경로
    pub path: String,
    /// 디렉토리 소스 여부
    pub directory: bool,
    /// 디렉토리 소스의 파일명 glob 패턴
    pub file_pattern: Option<String>,
    /// 활성화 여부
    pub enabled: bool,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 기본 우선순위 (0~10)
    pub priority: u8,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            directory: false,
            file_pattern: None,
            enabled: true,
            poll_interval_ms: 1000,
            priority: 0,
        }
    }
}

impl SourceConfig {
    /// 설정에서 도메인 타입 [`LogSource`]를 생성합니다.
    ///
    /// `validate()`를 통과한 설정에서만 호출해야 합니다.
    pub fn to_log_source(&self) -> LogSource {
        let mut source = if self.directory {
            LogSource::directory(
                &self.name,
                &self.path,
                self.file_pattern.clone().unwrap_or_else(|| "*".to_owned()),
                Priority::clamped(self.priority),
            )
        } else {
            LogSource::file(&self.name, &self.path, Priority::clamped(self.priority))
        };
        source.enabled = self.enabled;
        source.poll_interval_ms = self.poll_interval_ms;
        source
    }
}

/// 콘텐츠 기반 우선순위 부스트 패턴
///
/// 엔트리 내용이 정규식에 매칭되면 우선순위를 최소 `priority`로
/// 끌어올립니다 (소스 기본값보다 낮아지지는 않음).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostPattern {
    /// 정규식 패턴
    pub pattern: String,
    /// 부스트할 우선순위 (0~10)
    pub priority: u8,
}

/// 파일 워처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// 읽기 청크 크기 (바이트)
    pub chunk_size: usize,
    /// 폴링 주기 하한 (밀리초) — CPU 사용량 제한
    pub poll_floor_ms: u64,
    /// 한 라인의 최대 길이 (바이트). 초과 시 강제로 분리됩니다.
    pub max_line_bytes: usize,
    /// 콘텐츠 기반 우선순위 부스트 패턴 목록
    pub boost: Vec<BoostPattern>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024, // 8KB
            poll_floor_ms: 250,
            max_line_bytes: 64 * 1024, // 64KB
            boost: Vec::new(),
        }
    }
}

/// 큐 종료 정책
///
/// 종료 시 큐에 남은 엔트리를 어떻게 처리할지는 명시적 설정입니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// 데드레터 파일로 보존 (기본값, 재생 안전)
    #[default]
    Drain,
    /// 카운트만 로깅하고 폐기
    Discard,
}

/// 수집 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 큐 최대 용량 — 가득 차면 생산자(워처)가 블록됩니다
    pub capacity: usize,
    /// 배치 드레인 최대 크기
    pub batch_size: usize,
    /// 배치 드레인 최대 대기 시간 (밀리초)
    pub batch_wait_ms: u64,
    /// 에이징 임계값 — 상위 티어 연속 배치가 이 횟수에 도달하면
    /// 가장 오래 기다린 하위 티어에서 한 배치를 강제 드레인합니다
    pub aging_threshold: u32,
    /// 종료 시 잔여 엔트리 처리 정책
    pub shutdown_policy: ShutdownPolicy,
    /// 데드레터 파일명 (`general.data_dir` 기준 상대 경로)
    pub dead_letter_file: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 100,
            batch_wait_ms: 200,
            aging_threshold: 8,
            shutdown_policy: ShutdownPolicy::Drain,
            dead_letter_file: "dead-letter.jsonl".to_owned(),
        }
    }
}

/// 파이프라인 프로세서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// 워커 수 (고정 크기 풀)
    pub workers: usize,
    /// 분석기 호출 타임아웃 (밀리초)
    pub analyzer_timeout_ms: u64,
    /// 분석 실패 재시도 정책
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            analyzer_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// 브로드캐스트 허브 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 클라이언트별 아웃바운드 버퍼 크기 — 초과 시 가장 오래된
    /// 메시지가 드롭됩니다
    pub outbound_buffer: usize,
    /// 핑 주기 (초)
    pub ping_interval_secs: u64,
    /// 연속 핑 미응답 허용 횟수 — 초과 시 연결을 닫습니다
    pub missed_ping_limit: u32,
    /// 핸드셰이크 인증 토큰 (None이면 인증 없이 허용)
    pub auth_token: Option<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outbound_buffer: 256,
            ping_interval_secs: 30,
            missed_ping_limit: 3,
            auth_token: None,
        }
    }
}

/// 알림 디스패처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 알림 룰 YAML 디렉토리
    pub rules_dir: String,
    /// 인메모리 전달 이력 최대 보관 개수
    pub history_limit: usize,
    /// 전달 실패 재시도 정책
    pub retry: RetryPolicy,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_dir: "/etc/logwarden/rules".to_owned(),
            history_limit: 1_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// 메트릭 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 스크레이프 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9600,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_opt_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = Some(val);
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}
