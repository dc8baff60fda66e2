//! 알림 디스패처 — 룰 평가와 채널 전달
//!
//! 프로세서의 완료 스트림에서 성공 결과를 받아, 활성 룰을 평가하고
//! 매칭된 룰의 각 채널로 전달합니다.
//!
//! # 전달 계약
//! - 채널별 독립 시도: 한 채널의 실패가 다른 채널을 막지 않습니다.
//! - 바운드 지수 백오프 재시도, 소진 시 `failed`로 기록.
//! - (이벤트, 룰, 채널) 조합당 정확히 하나의 감사 레코드
//!   (성공/실패/억제 모두).
//! - at-least-once: 정확히 한 번 전달은 보장하지 않으며, 수신 측이
//!   `event_id`로 중복을 제거합니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use logwarden_core::error::{LogwardenError, PipelineError};
use logwarden_core::event::ResultEvent;
use logwarden_core::metrics as m;
use logwarden_core::pipeline::{HealthStatus, NotificationChannel, Pipeline};
use logwarden_core::plugin::{Plugin, PluginInfo, PluginState, PluginType};
use logwarden_core::retry::{RetryPolicy, retry_with_policy};
use logwarden_core::types::Severity;

use crate::config::DispatcherConfig;
use crate::error::NotifyError;
use crate::record::NotificationRecord;
use crate::rule::{NotificationRule, load_rules_from_dir};
use crate::throttle::Throttle;

/// 스로틀 추적기 정리 주기
const THROTTLE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// 디스패처 카운터
#[derive(Debug, Default)]
struct DispatchCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    throttled: AtomicU64,
}

/// 디스패처 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Initialized,
    Running,
    Stopped,
}

/// 알림 디스패처
pub struct NotificationDispatcher {
    info: PluginInfo,
    config: DispatcherConfig,
    rules: Arc<RwLock<Vec<NotificationRule>>>,
    channels: Arc<HashMap<String, Arc<dyn NotificationChannel>>>,
    throttle: Arc<Mutex<Throttle>>,
    history: Arc<Mutex<VecDeque<NotificationRecord>>>,
    counters: Arc<DispatchCounters>,
    result_rx: Option<mpsc::Receiver<ResultEvent>>,
    state: RunState,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NotificationDispatcher {
    /// 룰 디렉토리를 다시 로드하여 룰 셋을 원자적으로 교체합니다.
    ///
    /// 핫 리로드 경로입니다. 유효하지 않은 파일은 건너뛰며, 로딩
    /// 자체가 불가능하면 기존 룰 셋이 유지됩니다.
    pub async fn reload_rules(&self) -> usize {
        let outcome = load_rules_from_dir(&self.config.rules_dir).await;
        let count = outcome.rules.len();
        if let Ok(mut rules) = self.rules.write() {
            *rules = outcome.rules;
        }
        metrics::gauge!(m::NOTIFY_RULES_LOADED).set(count as f64);
        count
    }

    /// 로드된 룰 수를 반환합니다.
    pub fn rule_count(&self) -> usize {
        self.rules.read().map(|rules| rules.len()).unwrap_or(0)
    }

    /// 전달 이력 스냅샷을 반환합니다 (최신 순 아님, 생성 순).
    pub fn history(&self) -> Vec<NotificationRecord> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 성공 전달 수를 반환합니다.
    pub fn sent_count(&self) -> u64 {
        self.counters.sent.load(Ordering::Relaxed)
    }

    /// 실패 전달 수를 반환합니다.
    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// 스로틀로 억제된 수를 반환합니다.
    pub fn throttled_count(&self) -> u64 {
        self.counters.throttled.load(Ordering::Relaxed)
    }

    /// 레지스트리에 박싱된 뒤에도 사용할 수 있는 핸들을 반환합니다.
    ///
    /// 데몬의 핫 리로드 경로와 이력 조회가 이 핸들을 사용합니다.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            rules: self.rules.clone(),
            rules_dir: self.config.rules_dir.clone(),
            history: self.history.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// 디스패처 공유 핸들 — 룰 리로드와 이력 조회
#[derive(Clone)]
pub struct DispatcherHandle {
    rules: Arc<RwLock<Vec<NotificationRule>>>,
    rules_dir: std::path::PathBuf,
    history: Arc<Mutex<VecDeque<NotificationRecord>>>,
    counters: Arc<DispatchCounters>,
}

impl DispatcherHandle {
    /// 룰 디렉토리를 다시 로드하여 룰 셋을 원자적으로 교체합니다.
    pub async fn reload_rules(&self) -> usize {
        let outcome = load_rules_from_dir(&self.rules_dir).await;
        let count = outcome.rules.len();
        if let Ok(mut rules) = self.rules.write() {
            *rules = outcome.rules;
        }
        metrics::gauge!(m::NOTIFY_RULES_LOADED).set(count as f64);
        count
    }

    /// 로드된 룰 수를 반환합니다.
    pub fn rule_count(&self) -> usize {
        self.rules.read().map(|rules| rules.len()).unwrap_or(0)
    }

    /// 전달 이력 스냅샷을 반환합니다.
    pub fn history(&self) -> Vec<NotificationRecord> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 성공 전달 수를 반환합니다.
    pub fn sent_count(&self) -> u64 {
        self.counters.sent.load(Ordering::Relaxed)
    }

    /// 실패 전달 수를 반환합니다.
    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

impl Pipeline for NotificationDispatcher {
    async fn start(&mut self) -> Result<(), LogwardenError> {
        if self.state == RunState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let result_rx = self.result_rx.take().ok_or_else(|| {
            LogwardenError::Pipeline(PipelineError::InitFailed(
                "result channel already consumed".to_owned(),
            ))
        })?;

        tracing::info!(rules_dir = %self.config.rules_dir.display(), "starting notification dispatcher");

        let loaded = self.reload_rules().await;
        tracing::info!(rules = loaded, "notification rules active");

        let ctx = DispatchCtx {
            rules: self.rules.clone(),
            channels: self.channels.clone(),
            throttle: self.throttle.clone(),
            history: self.history.clone(),
            counters: self.counters.clone(),
            retry: self.config.retry.clone(),
            history_limit: self.config.history_limit,
        };
        self.tasks.push(tokio::spawn(run_dispatch_loop(
            ctx,
            result_rx,
            self.shutdown_tx.subscribe(),
        )));

        self.state = RunState::Running;
        tracing::info!("notification dispatcher started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogwardenError> {
        if self.state != RunState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping notification dispatcher");
        let _ = self.shutdown_tx.send(());
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                tracing::warn!("dispatch task did not stop in time, aborting");
                task.abort();
            }
        }

        self.state = RunState::Stopped;
        tracing::info!("notification dispatcher stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            RunState::Running => HealthStatus::Healthy,
            RunState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            RunState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

impl Plugin for NotificationDispatcher {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn state(&self) -> PluginState {
        match self.state {
            RunState::Initialized => PluginState::Created,
            RunState::Running => PluginState::Running,
            RunState::Stopped => PluginState::Stopped,
        }
    }
}

/// 디스패치 루프 컨텍스트
struct DispatchCtx {
    rules: Arc<RwLock<Vec<NotificationRule>>>,
    channels: Arc<HashMap<String, Arc<dyn NotificationChannel>>>,
    throttle: Arc<Mutex<Throttle>>,
    history: Arc<Mutex<VecDeque<NotificationRecord>>>,
    counters: Arc<DispatchCounters>,
    retry: RetryPolicy,
    history_limit: usize,
}

impl DispatchCtx {
    /// 결과 이벤트 하나를 평가하고 매칭 룰의 채널로 전달합니다.
    async fn handle(&self, event: &ResultEvent) {
        let result = &event.result;
        if !result.is_success() {
            return;
        }
        let Some(severity) = result.severity else {
            return;
        };

        let matching: Vec<NotificationRule> = self
            .rules
            .read()
            .map(|rules| {
                rules
                    .iter()
                    .filter(|rule| rule.matches(severity, &result.category))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for rule in matching {
            for channel_name in &rule.channels {
                self.deliver(event, &rule, channel_name, severity).await;
            }
        }
    }

    /// (이벤트, 룰, 채널) 조합 하나의 전달을 시도합니다.
    ///
    /// 어떤 경로로 끝나든 정확히 하나의 레코드를 남깁니다.
    async fn deliver(
        &self,
        event: &ResultEvent,
        rule: &NotificationRule,
        channel_name: &str,
        severity: Severity,
    ) {
        let window = rule.throttle_window();
        let throttled = {
            let mut throttle = lock_unpoisoned(&self.throttle);
            if throttle.is_throttled(&rule.name, channel_name, window) {
                throttle.note_suppressed();
                true
            } else {
                false
            }
        };
        if throttled {
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::NOTIFY_THROTTLED_TOTAL).increment(1);
            tracing::debug!(
                rule = %rule.name,
                channel = channel_name,
                "notification suppressed by throttle window"
            );
            self.push_record(NotificationRecord::throttled(
                &event.id,
                &rule.name,
                channel_name,
            ));
            return;
        }

        let Some(channel) = self.channels.get(channel_name) else {
            tracing::error!(
                rule = %rule.name,
                channel = channel_name,
                "rule references unregistered channel"
            );
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                m::NOTIFY_DELIVERIES_TOTAL,
                m::LABEL_CHANNEL => channel_name.to_owned(),
                m::LABEL_STATUS => "failed"
            )
            .increment(1);
            self.push_record(NotificationRecord::failed(
                &event.id,
                &rule.name,
                channel_name,
                format!("channel not registered: {channel_name}"),
            ));
            return;
        };

        let subject = format!(
            "[logwarden] {} (severity {}) rule {}",
            event.result.category, severity, rule.name
        );
        let body = format!(
            "{}\n\n{}\nrecommendations: {}",
            event.result.message,
            event.result.explanation,
            event.result.recommendations.join("; "),
        );

        let outcome = retry_with_policy(&self.retry, "notification_send", || {
            channel.send(&subject, &body)
        })
        .await;

        match outcome {
            Ok(()) => {
                lock_unpoisoned(&self.throttle).note_delivery(&rule.name, channel_name);
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    m::NOTIFY_DELIVERIES_TOTAL,
                    m::LABEL_CHANNEL => channel_name.to_owned(),
                    m::LABEL_STATUS => "sent"
                )
                .increment(1);
                tracing::info!(
                    rule = %rule.name,
                    channel = channel_name,
                    event = %event.id,
                    "notification delivered"
                );
                self.push_record(NotificationRecord::sent(&event.id, &rule.name, channel_name));
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    m::NOTIFY_DELIVERIES_TOTAL,
                    m::LABEL_CHANNEL => channel_name.to_owned(),
                    m::LABEL_STATUS => "failed"
                )
                .increment(1);
                tracing::warn!(
                    rule = %rule.name,
                    channel = channel_name,
                    error = %e,
                    "notification delivery failed after retries"
                );
                self.push_record(NotificationRecord::failed(
                    &event.id,
                    &rule.name,
                    channel_name,
                    e.to_string(),
                ));
            }
        }
    }

    /// 감사 레코드를 이력에 추가합니다 (바운드 유지).
    fn push_record(&self, record: NotificationRecord) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(record);
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
    }

    /// 로드된 룰 중 가장 긴 스로틀 윈도우를 반환합니다.
    fn max_throttle_window(&self) -> Duration {
        self.rules
            .read()
            .map(|rules| {
                rules
                    .iter()
                    .map(NotificationRule::throttle_window)
                    .max()
                    .unwrap_or(Duration::from_secs(3600))
            })
            .unwrap_or(Duration::from_secs(3600))
    }
}

fn lock_unpoisoned(throttle: &Mutex<Throttle>) -> std::sync::MutexGuard<'_, Throttle> {
    match throttle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 디스패치 루프 — 완료 스트림을 소비합니다.
async fn run_dispatch_loop(
    ctx: DispatchCtx,
    mut result_rx: mpsc::Receiver<ResultEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut cleanup = tokio::time::interval(THROTTLE_CLEANUP_INTERVAL);
    cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    cleanup.tick().await; // 첫 틱은 즉시 발화

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = cleanup.tick() => {
                let window = ctx.max_throttle_window();
                lock_unpoisoned(&ctx.throttle).cleanup_expired(window);
            }
            event = result_rx.recv() => {
                match event {
                    Some(event) => ctx.handle(&event).await,
                    None => {
                        tracing::debug!("result channel closed, ending dispatch loop");
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("dispatch loop finished");
}

/// 알림 디스패처 빌더
pub struct NotificationDispatcherBuilder {
    config: DispatcherConfig,
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    result_rx: Option<mpsc::Receiver<ResultEvent>>,
}

impl NotificationDispatcherBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            channels: HashMap::new(),
            result_rx: None,
        }
    }

    /// 디스패처 설정을 지정합니다.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// 알림 채널 협력자를 등록합니다. 식별자는 `channel.name()`입니다.
    pub fn channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.name().to_owned(), channel);
        self
    }

    /// 프로세서의 결과 수신 채널을 연결합니다.
    pub fn result_receiver(mut self, rx: mpsc::Receiver<ResultEvent>) -> Self {
        self.result_rx = Some(rx);
        self
    }

    /// 디스패처를 빌드합니다.
    pub fn build(self) -> Result<NotificationDispatcher, NotifyError> {
        self.config.validate()?;
        let result_rx = self.result_rx.ok_or_else(|| NotifyError::Config {
            field: "result_receiver".to_owned(),
            reason: "a result receiver is required".to_owned(),
        })?;

        Ok(NotificationDispatcher {
            info: PluginInfo {
                name: "notify".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                description: "rule evaluation and notification delivery".to_owned(),
                plugin_type: PluginType::Notify,
            },
            config: self.config,
            rules: Arc::new(RwLock::new(Vec::new())),
            channels: Arc::new(self.channels),
            throttle: Arc::new(Mutex::new(Throttle::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            counters: Arc::new(DispatchCounters::default()),
            result_rx: Some(result_rx),
            state: RunState::Initialized,
            tasks: Vec::new(),
            shutdown_tx: broadcast::channel(8).0,
        })
    }
}

impl Default for NotificationDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use logwarden_core::error::DeliveryError;
    use logwarden_core::pipeline::BoxFuture;
    use logwarden_core::types::{Analysis, EntryRef, ProcessingResult};

    use crate::record::DeliveryStatus;

    struct MockChannel {
        channel_name: String,
        fail_first: AtomicU32,
        always_fail: bool,
        sends: Mutex<Vec<(String, String)>>,
    }

    impl MockChannel {
        fn new(name: &str) -> Self {
            Self {
                channel_name: name.to_owned(),
                fail_first: AtomicU32::new(0),
                always_fail: false,
                sends: Mutex::new(Vec::new()),
            }
        }

        fn always_failing(name: &str) -> Self {
            Self {
                always_fail: true,
                ..Self::new(name)
            }
        }

        fn send_count(&self) -> usize {
            self.sends.lock().unwrap().len()
        }
    }

    impl NotificationChannel for MockChannel {
        fn name(&self) -> &str {
            &self.channel_name
        }

        fn send<'a>(
            &'a self,
            subject: &'a str,
            body: &'a str,
        ) -> BoxFuture<'a, Result<(), DeliveryError>> {
            Box::pin(async move {
                if self.always_fail {
                    return Err(DeliveryError::SendFailed {
                        channel: self.channel_name.clone(),
                        reason: "permanently down".to_owned(),
                    });
                }
                if self.fail_first.load(Ordering::SeqCst) > 0 {
                    self.fail_first.fetch_sub(1, Ordering::SeqCst);
                    return Err(DeliveryError::SendFailed {
                        channel: self.channel_name.clone(),
                        reason: "transient".to_owned(),
                    });
                }
                self.sends
                    .lock()
                    .unwrap()
                    .push((subject.to_owned(), body.to_owned()));
                Ok(())
            })
        }
    }

    fn success_event(severity: u8, category: &str) -> ResultEvent {
        ResultEvent::new(ProcessingResult::success(
            EntryRef {
                sequence: 1,
                source_name: "auth_logs".to_owned(),
            },
            Analysis {
                severity: Severity::clamped(severity),
                category: category.to_owned(),
                explanation: "test".to_owned(),
                recommendations: vec![],
            },
            "Failed password for invalid user admin",
            5,
        ))
    }

    fn write_rule(dir: &std::path::Path, name: &str, channels: &[&str], throttle_minutes: u64) {
        let channels_yaml = channels.join(", ");
        std::fs::write(
            dir.join(format!("{name}.yml")),
            format!(
                "name: {name}\nmin_severity: 7\nmax_severity: 10\ncategories: [authentication]\nchannels: [{channels_yaml}]\nthrottle_minutes: {throttle_minutes}\n"
            ),
        )
        .unwrap();
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        }
    }

    struct TestRig {
        dispatcher: NotificationDispatcher,
        result_tx: mpsc::Sender<ResultEvent>,
        _rules_dir: tempfile::TempDir,
    }

    fn build_rig(rules_dir: tempfile::TempDir, channels: Vec<Arc<MockChannel>>) -> TestRig {
        let (result_tx, result_rx) = mpsc::channel(32);
        let config = DispatcherConfig {
            enabled: true,
            rules_dir: rules_dir.path().to_path_buf(),
            history_limit: 100,
            retry: fast_retry(),
        };
        let mut builder = NotificationDispatcherBuilder::new()
            .config(config)
            .result_receiver(result_rx);
        for channel in channels {
            builder = builder.channel(channel);
        }
        TestRig {
            dispatcher: builder.build().unwrap(),
            result_tx,
            _rules_dir: rules_dir,
        }
    }

    async fn wait_for_records(dispatcher: &NotificationDispatcher, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while dispatcher.history().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn matching_rule_delivers_once_per_channel() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["email", "webhook"], 0);

        let email = Arc::new(MockChannel::new("email"));
        let webhook = Arc::new(MockChannel::new("webhook"));
        let mut rig = build_rig(rules_dir, vec![email.clone(), webhook.clone()]);

        rig.dispatcher.start().await.unwrap();
        assert_eq!(rig.dispatcher.rule_count(), 1);

        rig.result_tx
            .send(success_event(8, "authentication"))
            .await
            .unwrap();
        wait_for_records(&rig.dispatcher, 2).await;

        // (이벤트, 룰, 채널)당 정확히 하나의 레코드
        let history = rig.dispatcher.history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.status == DeliveryStatus::Sent));
        assert_eq!(email.send_count(), 1);
        assert_eq!(webhook.send_count(), 1);

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn non_matching_severity_is_ignored() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["email"], 0);

        let email = Arc::new(MockChannel::new("email"));
        let mut rig = build_rig(rules_dir, vec![email.clone()]);
        rig.dispatcher.start().await.unwrap();

        rig.result_tx
            .send(success_event(3, "authentication"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(email.send_count(), 0);
        assert!(rig.dispatcher.history().is_empty());

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn throttle_collapses_burst_into_one_send() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["email"], 10);

        let email = Arc::new(MockChannel::new("email"));
        let mut rig = build_rig(rules_dir, vec![email.clone()]);
        rig.dispatcher.start().await.unwrap();

        // 같은 룰+채널에 대한 두 개의 연속 이벤트
        rig.result_tx
            .send(success_event(8, "authentication"))
            .await
            .unwrap();
        rig.result_tx
            .send(success_event(9, "authentication"))
            .await
            .unwrap();
        wait_for_records(&rig.dispatcher, 2).await;

        // 전달은 한 번, 억제도 레코드는 남김
        assert_eq!(email.send_count(), 1);
        let history = rig.dispatcher.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, DeliveryStatus::Sent);
        assert_eq!(history[1].status, DeliveryStatus::Throttled);
        assert_eq!(rig.dispatcher.throttled_count(), 1);

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["down", "email"], 0);

        let down = Arc::new(MockChannel::always_failing("down"));
        let email = Arc::new(MockChannel::new("email"));
        let mut rig = build_rig(rules_dir, vec![down, email.clone()]);
        rig.dispatcher.start().await.unwrap();

        rig.result_tx
            .send(success_event(8, "authentication"))
            .await
            .unwrap();
        wait_for_records(&rig.dispatcher, 2).await;

        assert_eq!(email.send_count(), 1);
        let history = rig.dispatcher.history();
        let statuses: Vec<(String, DeliveryStatus)> = history
            .iter()
            .map(|r| (r.channel.clone(), r.status))
            .collect();
        assert!(statuses.contains(&("down".to_owned(), DeliveryStatus::Failed)));
        assert!(statuses.contains(&("email".to_owned(), DeliveryStatus::Sent)));

        // 실패 레코드에는 사유가 남음
        let failed = history
            .iter()
            .find(|r| r.status == DeliveryStatus::Failed)
            .unwrap();
        assert!(failed.error_message.as_deref().unwrap().contains("down"));

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_retried_then_sent() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["email"], 0);

        let email = Arc::new(MockChannel::new("email"));
        email.fail_first.store(2, Ordering::SeqCst);
        let mut rig = build_rig(rules_dir, vec![email.clone()]);
        rig.dispatcher.start().await.unwrap();

        rig.result_tx
            .send(success_event(8, "authentication"))
            .await
            .unwrap();
        wait_for_records(&rig.dispatcher, 1).await;

        assert_eq!(email.send_count(), 1);
        assert_eq!(rig.dispatcher.history()[0].status, DeliveryStatus::Sent);
        assert_eq!(rig.dispatcher.sent_count(), 1);
        assert_eq!(rig.dispatcher.failed_count(), 0);

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_channel_records_failure() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["ghost"], 0);

        let mut rig = build_rig(rules_dir, vec![]);
        rig.dispatcher.start().await.unwrap();

        rig.result_tx
            .send(success_event(8, "authentication"))
            .await
            .unwrap();
        wait_for_records(&rig.dispatcher, 1).await;

        let history = rig.dispatcher.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DeliveryStatus::Failed);
        assert!(
            history[0]
                .error_message
                .as_deref()
                .unwrap()
                .contains("not registered")
        );

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_results_are_not_notified() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "critical_auth", &["email"], 0);

        let email = Arc::new(MockChannel::new("email"));
        let mut rig = build_rig(rules_dir, vec![email.clone()]);
        rig.dispatcher.start().await.unwrap();

        let failed = ResultEvent::new(ProcessingResult::analysis_failed(
            EntryRef {
                sequence: 1,
                source_name: "s".to_owned(),
            },
            "m",
            "timeout",
            5,
        ));
        rig.result_tx.send(failed).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(email.send_count(), 0);
        assert!(rig.dispatcher.history().is_empty());

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reload_rules_swaps_rule_set() {
        let rules_dir = tempfile::tempdir().unwrap();
        write_rule(rules_dir.path(), "first", &["email"], 0);

        let email = Arc::new(MockChannel::new("email"));
        let mut rig = build_rig(rules_dir, vec![email]);
        rig.dispatcher.start().await.unwrap();
        assert_eq!(rig.dispatcher.rule_count(), 1);

        write_rule(rig._rules_dir.path(), "second", &["email"], 0);
        let count = rig.dispatcher.reload_rules().await;
        assert_eq!(count, 2);
        assert_eq!(rig.dispatcher.rule_count(), 2);

        rig.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn builder_requires_result_receiver() {
        assert!(NotificationDispatcherBuilder::new().build().is_err());
    }
}
