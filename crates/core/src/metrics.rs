//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logwarden_`
//! - 모듈명: `watcher_`, `queue_`, `processor_`, `hub_`, `notify_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 이름 레이블 키
pub const LABEL_SOURCE: &str = "source";

/// 결과 레이블 키 (success, parse_failed, analysis_failed)
pub const LABEL_STATUS: &str = "status";

/// 알림 채널 레이블 키
pub const LABEL_CHANNEL: &str = "channel";

/// 이벤트 타입 레이블 키
pub const LABEL_EVENT_TYPE: &str = "event_type";

// ─── File Watcher 메트릭 ────────────────────────────────────────────

/// Watcher: 읽어들인 바이트 수 (counter)
pub const WATCHER_BYTES_READ_TOTAL: &str = "logwarden_watcher_bytes_read_total";

/// Watcher: 수집된 엔트리 수 (counter)
pub const WATCHER_ENTRIES_COLLECTED_TOTAL: &str = "logwarden_watcher_entries_collected_total";

/// Watcher: 감지된 로테이션 수 (counter)
pub const WATCHER_ROTATIONS_TOTAL: &str = "logwarden_watcher_rotations_total";

/// Watcher: 소스 에러 수 (counter, label: source)
pub const WATCHER_SOURCE_ERRORS_TOTAL: &str = "logwarden_watcher_source_errors_total";

// ─── Ingestion Queue 메트릭 ────────────────────────────────────────

/// Queue: 현재 큐 깊이 (gauge)
pub const QUEUE_SIZE: &str = "logwarden_queue_size";

/// Queue: 적재된 엔트리 수 (counter)
pub const QUEUE_ENQUEUED_TOTAL: &str = "logwarden_queue_enqueued_total";

/// Queue: 가장 오래된 엔트리 대기 시간 (gauge, 초)
pub const QUEUE_OLDEST_AGE_SECONDS: &str = "logwarden_queue_oldest_age_seconds";

/// Queue: 에이징 규칙으로 강제 드레인된 배치 수 (counter)
pub const QUEUE_AGED_BATCHES_TOTAL: &str = "logwarden_queue_aged_batches_total";

/// Queue: 종료 시 데드레터로 보존된 엔트리 수 (counter)
pub const QUEUE_DEAD_LETTERED_TOTAL: &str = "logwarden_queue_dead_lettered_total";

// ─── Pipeline Processor 메트릭 ──────────────────────────────────────

/// Processor: 처리 결과 수 (counter, label: status)
pub const PROCESSOR_RESULTS_TOTAL: &str = "logwarden_processor_results_total";

/// Processor: 분석 재시도 수 (counter)
pub const PROCESSOR_ANALYSIS_RETRIES_TOTAL: &str = "logwarden_processor_analysis_retries_total";

/// Processor: 엔트리 처리 지연 시간 (histogram, 초)
pub const PROCESSOR_DURATION_SECONDS: &str = "logwarden_processor_duration_seconds";

// ─── Broadcast Hub 메트릭 ───────────────────────────────────────────

/// Hub: 현재 연결 수 (gauge)
pub const HUB_ACTIVE_CONNECTIONS: &str = "logwarden_hub_active_connections";

/// Hub: 팬아웃된 이벤트 수 (counter, label: event_type)
pub const HUB_EVENTS_FANOUT_TOTAL: &str = "logwarden_hub_events_fanout_total";

/// Hub: 버퍼 오버플로우로 드롭된 메시지 수 (counter)
pub const HUB_MESSAGES_DROPPED_TOTAL: &str = "logwarden_hub_messages_dropped_total";

/// Hub: 핑 미응답으로 종료된 클라이언트 수 (counter)
pub const HUB_CLIENTS_TIMED_OUT_TOTAL: &str = "logwarden_hub_clients_timed_out_total";

// ─── Notification Dispatcher 메트릭 ────────────────────────────────

/// Notify: 전달 시도 수 (counter, labels: channel, status)
pub const NOTIFY_DELIVERIES_TOTAL: &str = "logwarden_notify_deliveries_total";

/// Notify: 스로틀로 억제된 알림 수 (counter)
pub const NOTIFY_THROTTLED_TOTAL: &str = "logwarden_notify_throttled_total";

/// Notify: 로드된 룰 수 (gauge)
pub const NOTIFY_RULES_LOADED: &str = "logwarden_notify_rules_loaded";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logwarden_daemon_uptime_seconds";

/// Daemon: 등록된 플러그인 수 (gauge)
pub const DAEMON_PLUGINS_REGISTERED: &str = "logwarden_daemon_plugins_registered";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logwarden_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 엔트리 처리 지연 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위, 로그 단위 분포 (분석기 호출 포함)
pub const PROCESSING_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logwarden-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // File Watcher
    describe_counter!(
        WATCHER_BYTES_READ_TOTAL,
        "Total bytes read from all log sources"
    );
    describe_counter!(
        WATCHER_ENTRIES_COLLECTED_TOTAL,
        "Total number of log entries collected and enqueued"
    );
    describe_counter!(
        WATCHER_ROTATIONS_TOTAL,
        "Total number of file rotations/truncations detected"
    );
    describe_counter!(
        WATCHER_SOURCE_ERRORS_TOTAL,
        "Total number of per-source read errors"
    );

    // Ingestion Queue
    describe_gauge!(QUEUE_SIZE, "Current number of entries in the ingestion queue");
    describe_counter!(QUEUE_ENQUEUED_TOTAL, "Total entries accepted by the queue");
    describe_gauge!(
        QUEUE_OLDEST_AGE_SECONDS,
        "Age in seconds of the oldest queued entry"
    );
    describe_counter!(
        QUEUE_AGED_BATCHES_TOTAL,
        "Batches force-drained from a starved lower priority tier"
    );
    describe_counter!(
        QUEUE_DEAD_LETTERED_TOTAL,
        "Entries persisted to the dead-letter file at shutdown"
    );

    // Pipeline Processor
    describe_counter!(
        PROCESSOR_RESULTS_TOTAL,
        "Processing results produced, labeled by status"
    );
    describe_counter!(
        PROCESSOR_ANALYSIS_RETRIES_TOTAL,
        "Analyzer calls retried after a transient failure"
    );
    describe_histogram!(
        PROCESSOR_DURATION_SECONDS,
        "Time to process a single log entry in seconds"
    );

    // Broadcast Hub
    describe_gauge!(HUB_ACTIVE_CONNECTIONS, "Currently connected clients");
    describe_counter!(
        HUB_EVENTS_FANOUT_TOTAL,
        "Events fanned out to subscribed clients"
    );
    describe_counter!(
        HUB_MESSAGES_DROPPED_TOTAL,
        "Messages dropped due to per-client buffer overflow"
    );
    describe_counter!(
        HUB_CLIENTS_TIMED_OUT_TOTAL,
        "Clients closed after missing liveness pings"
    );

    // Notification Dispatcher
    describe_counter!(
        NOTIFY_DELIVERIES_TOTAL,
        "Notification delivery attempts, labeled by channel and status"
    );
    describe_counter!(
        NOTIFY_THROTTLED_TOTAL,
        "Notifications suppressed by the per rule+channel throttle window"
    );
    describe_gauge!(NOTIFY_RULES_LOADED, "Notification rules currently loaded");

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Logwarden daemon uptime in seconds");
    describe_gauge!(
        DAEMON_PLUGINS_REGISTERED,
        "Number of plugins registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
