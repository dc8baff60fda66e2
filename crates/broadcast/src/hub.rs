//! 브로드캐스트 허브 — 연결 레지스트리와 이벤트 팬아웃
//!
//! [`BroadcastHub`]는 라이브 클라이언트 연결과 구독 상태를 단독으로
//! 소유합니다. 전역 상태가 아니라 허브 인스턴스의 상태이며, 외부에는
//! 허브의 공개 연산으로만 노출됩니다. 내부 락은 레지스트리에만
//! 걸리고, 클라이언트별 전송은 각자의 루프에서 독립적으로 진행되어
//! 무관한 클라이언트의 전송이 직렬화되지 않습니다.
//!
//! # 요청 디스패치
//! 클라이언트 요청은 고정 enum 위의 핸들러 룩업 테이블로 디스패치
//! 됩니다. 새 이벤트 타입을 추가해도 디스패치 로직은 바뀌지 않습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use logwarden_core::error::{LogwardenError, PipelineError};
use logwarden_core::event::HubEvent;
use logwarden_core::metrics as m;
use logwarden_core::pipeline::{HealthStatus, Pipeline};
use logwarden_core::plugin::{Plugin, PluginInfo, PluginState, PluginType};

use crate::client::{ClientConn, ClientHandle, ClientState, run_send_loop};
use crate::config::HubConfig;
use crate::error::BroadcastError;
use crate::message::{ClientRequest, Frame, RequestKind};
use crate::subscription::EventFilter;

/// 요청 채널 용량 (클라이언트당)
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// 허브 카운터
#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    events_fanout: AtomicU64,
    messages_dropped: AtomicU64,
    clients_timed_out: AtomicU64,
}

/// 연결 레지스트리 — 허브 내에서 유일하게 락이 걸리는 구조
pub(crate) struct Registry {
    clients: Mutex<HashMap<String, ClientConn>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientConn>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// 클라이언트를 등록합니다. 같은 ID의 기존 연결은 닫고
    /// 교체합니다 (재연결 시 북키핑 중복 없음).
    fn insert(&self, conn: ClientConn) {
        let mut clients = self.lock();
        if let Some(old) = clients.insert(conn.client_id.clone(), conn) {
            tracing::info!(client = %old.client_id, "replacing existing connection on reconnect");
            old.buffer.close();
        }
    }

    /// 클라이언트 엔트리에 접근합니다.
    fn with_client<R>(
        &self,
        client_id: &str,
        f: impl FnOnce(&mut ClientConn) -> R,
    ) -> Option<R> {
        let mut clients = self.lock();
        clients.get_mut(client_id).map(f)
    }

    /// 클라이언트를 Closing 상태로 전이하고 제거합니다.
    ///
    /// 버퍼는 닫힌 뒤에도 잔여 프레임을 플러시하므로 Closing →
    /// Closed 시맨틱이 유지됩니다.
    fn close_client(&self, client_id: &str, reason: &str) -> bool {
        let mut clients = self.lock();
        match clients.remove(client_id) {
            Some(mut conn) => {
                conn.state = ClientState::Closing;
                conn.buffer.close();
                tracing::info!(client = client_id, reason, "client connection closed");
                true
            }
            None => false,
        }
    }

    /// 이벤트를 매칭되는 모든 Open 클라이언트의 버퍼에 팬아웃합니다.
    ///
    /// 버퍼 push는 논블로킹이므로 느린 클라이언트가 다른 클라이언트의
    /// 전달을 지연시키지 않습니다. 반환값은 (전달 수, 드롭 수)입니다.
    fn fanout(&self, event: &HubEvent, frame: &Frame) -> (u64, u64) {
        let clients = self.lock();
        let mut delivered = 0;
        let mut dropped = 0;
        for conn in clients.values() {
            if conn.state != ClientState::Open || !conn.subscription.matches(event) {
                continue;
            }
            if conn.buffer.push(frame.clone()) {
                dropped += 1;
            }
            delivered += 1;
        }
        (delivered, dropped)
    }

    /// 생존성 스윕 — 핑이 끊긴 클라이언트를 닫고 ID를 반환합니다.
    fn sweep(&self, interval: Duration, limit: u32) -> Vec<String> {
        let mut clients = self.lock();
        let mut expired = Vec::new();
        for conn in clients.values_mut() {
            if conn.last_seen.elapsed() >= interval {
                conn.missed_pings = conn.missed_pings.saturating_add(1);
                if conn.missed_pings >= limit {
                    expired.push(conn.client_id.clone());
                }
            }
        }
        for client_id in &expired {
            if let Some(mut conn) = clients.remove(client_id) {
                conn.state = ClientState::Closing;
                conn.buffer.close();
            }
        }
        expired
    }

    /// 모든 클라이언트에 종료 프레임을 보내고 연결을 닫습니다.
    fn close_all(&self) {
        let mut clients = self.lock();
        for (_, mut conn) in clients.drain() {
            conn.state = ClientState::Closing;
            conn.buffer.push(Frame::shutdown());
            conn.buffer.close();
        }
    }
}

/// 허브 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Initialized,
    Running,
    Stopped,
}

/// 브로드캐스트 허브
pub struct BroadcastHub {
    info: PluginInfo,
    config: HubConfig,
    registry: Arc<Registry>,
    counters: Arc<HubCounters>,
    event_rx: Option<mpsc::Receiver<HubEvent>>,
    state: RunState,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl BroadcastHub {
    /// 클라이언트 연결을 수락합니다.
    ///
    /// 인증 토큰이 설정된 허브에서는 토큰이 일치해야 `Open` 상태에
    /// 도달합니다. 불일치 연결은 그 전에 거부됩니다. 같은 ID의
    /// 재연결은 기존 연결을 교체하며 서버 측 북키핑을 중복시키지
    /// 않습니다.
    pub fn connect(
        &self,
        client_id: impl Into<String>,
        token: Option<&str>,
    ) -> Result<ClientHandle, BroadcastError> {
        self.connector().connect(client_id, token)
    }

    /// 클라이언트 연결을 닫습니다.
    pub fn disconnect(&self, client_id: &str) -> Result<(), BroadcastError> {
        self.connector().disconnect(client_id)
    }

    /// 전송 계층(외부 API 레이어)에 넘길 연결 핸들을 반환합니다.
    ///
    /// 허브가 플러그인 레지스트리에 박싱된 뒤에도 연결 수락이
    /// 가능해야 하므로 별도 핸들로 분리되어 있습니다.
    pub fn connector(&self) -> HubConnector {
        HubConnector {
            registry: self.registry.clone(),
            auth_token: self.config.auth_token.clone(),
            outbound_buffer: self.config.outbound_buffer,
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// 현재 연결 수를 반환합니다.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// 버퍼 오버플로우로 드롭된 총 메시지 수를 반환합니다.
    pub fn messages_dropped(&self) -> u64 {
        self.counters.messages_dropped.load(Ordering::Relaxed)
    }

    /// 팬아웃된 총 이벤트 수를 반환합니다.
    pub fn events_fanout(&self) -> u64 {
        self.counters.events_fanout.load(Ordering::Relaxed)
    }

    /// 핑 미수신으로 닫힌 클라이언트 수를 반환합니다.
    pub fn clients_timed_out(&self) -> u64 {
        self.counters.clients_timed_out.load(Ordering::Relaxed)
    }

    /// 레지스트리에 박싱된 뒤에도 사용할 수 있는 통계 핸들을 반환합니다.
    pub fn stats_handle(&self) -> HubStatsHandle {
        HubStatsHandle {
            registry: self.registry.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// 허브 연결 핸들 — 전송 계층과의 경계
///
/// 연결 수락/종료만 가능하며 허브 생명주기에는 접근하지 못합니다.
#[derive(Clone)]
pub struct HubConnector {
    registry: Arc<Registry>,
    auth_token: Option<String>,
    outbound_buffer: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl HubConnector {
    /// 클라이언트 연결을 수락합니다. 동작은
    /// [`BroadcastHub::connect`]와 동일합니다.
    pub fn connect(
        &self,
        client_id: impl Into<String>,
        token: Option<&str>,
    ) -> Result<ClientHandle, BroadcastError> {
        let client_id = client_id.into();

        // Connecting 단계: 인증
        if let Some(expected) = &self.auth_token
            && token != Some(expected.as_str())
        {
            tracing::warn!(client = %client_id, "rejecting unauthenticated connection");
            return Err(BroadcastError::Unauthorized { client_id });
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_buffer);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let mut conn = ClientConn::new(client_id.clone(), self.outbound_buffer);
        conn.state = ClientState::Open;
        let buffer = conn.buffer.clone();
        self.registry.insert(conn);
        let active = self.registry.len();
        metrics::gauge!(m::HUB_ACTIVE_CONNECTIONS).set(active as f64);
        tracing::info!(client = %client_id, active, "client connected");

        // 클라이언트별 전송 루프와 요청 루프
        tokio::spawn(run_send_loop(client_id.clone(), buffer, outbound_tx));
        tokio::spawn(run_request_loop(
            self.registry.clone(),
            client_id.clone(),
            request_rx,
            self.shutdown_tx.subscribe(),
        ));

        Ok(ClientHandle {
            client_id,
            outbound: outbound_rx,
            requests: request_tx,
        })
    }

    /// 클라이언트 연결을 닫습니다.
    pub fn disconnect(&self, client_id: &str) -> Result<(), BroadcastError> {
        if self.registry.close_client(client_id, "disconnect requested") {
            metrics::gauge!(m::HUB_ACTIVE_CONNECTIONS).set(self.registry.len() as f64);
            Ok(())
        } else {
            Err(BroadcastError::UnknownClient(client_id.to_owned()))
        }
    }
}

/// 허브 통계 핸들 — 읽기 전용 공유 뷰
#[derive(Clone)]
pub struct HubStatsHandle {
    registry: Arc<Registry>,
    counters: Arc<HubCounters>,
}

impl HubStatsHandle {
    /// 현재 연결 수를 반환합니다.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// 드롭된 총 메시지 수를 반환합니다.
    pub fn messages_dropped(&self) -> u64 {
        self.counters.messages_dropped.load(Ordering::Relaxed)
    }

    /// 팬아웃된 총 이벤트 수를 반환합니다.
    pub fn events_fanout(&self) -> u64 {
        self.counters.events_fanout.load(Ordering::Relaxed)
    }
}

impl Pipeline for BroadcastHub {
    async fn start(&mut self) -> Result<(), LogwardenError> {
        if self.state == RunState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let event_rx = self.event_rx.take().ok_or_else(|| {
            LogwardenError::Pipeline(PipelineError::InitFailed(
                "event channel already consumed".to_owned(),
            ))
        })?;

        tracing::info!(
            ping_interval_secs = self.config.ping_interval.as_secs(),
            missed_ping_limit = self.config.missed_ping_limit,
            "starting broadcast hub"
        );

        self.tasks.push(tokio::spawn(run_fanout(
            self.registry.clone(),
            self.counters.clone(),
            event_rx,
            self.shutdown_tx.subscribe(),
        )));
        self.tasks.push(tokio::spawn(run_liveness_sweep(
            self.registry.clone(),
            self.counters.clone(),
            self.config.ping_interval,
            self.config.missed_ping_limit,
            self.shutdown_tx.subscribe(),
        )));

        self.state = RunState::Running;
        tracing::info!("broadcast hub started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogwardenError> {
        if self.state != RunState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping broadcast hub");
        let _ = self.shutdown_tx.send(());

        // 클라이언트에 정상 종료 통지 후 연결 닫기
        self.registry.close_all();
        metrics::gauge!(m::HUB_ACTIVE_CONNECTIONS).set(0.0);

        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                tracing::warn!("hub task did not stop in time, aborting");
                task.abort();
            }
        }

        self.state = RunState::Stopped;
        tracing::info!("broadcast hub stopped");
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

impl Plugin for BroadcastHub {
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

// ─── 요청 핸들러 디스패치 테이블 ─────────────────────────────────────

type Handler = fn(&mut ClientConn, ClientRequest) -> Result<Option<Frame>, BroadcastError>;

/// 요청 종류 → 핸들러 룩업 테이블
///
/// 조건문 체인 대신 테이블로 디스패치하여, 요청 종류가 늘어도
/// 디스패치 로직이 바뀌지 않게 합니다.
const HANDLERS: &[(RequestKind, Handler)] = &[
    (RequestKind::Subscribe, handle_subscribe),
    (RequestKind::Unsubscribe, handle_unsubscribe),
    (RequestKind::SetFilter, handle_set_filter),
    (RequestKind::ClearFilter, handle_clear_filter),
    (RequestKind::Ping, handle_ping),
];

fn dispatch(conn: &mut ClientConn, request: ClientRequest) -> Result<Option<Frame>, BroadcastError> {
    let kind = request.kind();
    match HANDLERS.iter().find(|(k, _)| *k == kind) {
        Some((_, handler)) => handler(conn, request),
        None => Err(BroadcastError::Channel(format!(
            "no handler registered for {kind:?}"
        ))),
    }
}

fn handle_subscribe(
    conn: &mut ClientConn,
    request: ClientRequest,
) -> Result<Option<Frame>, BroadcastError> {
    let ClientRequest::Subscribe { event_types } = request else {
        return Err(BroadcastError::Channel("handler mismatch".to_owned()));
    };
    conn.subscription.subscribe(&event_types);
    Ok(Some(Frame::subscribed(conn.subscription.summary())))
}

fn handle_unsubscribe(
    conn: &mut ClientConn,
    request: ClientRequest,
) -> Result<Option<Frame>, BroadcastError> {
    let ClientRequest::Unsubscribe { event_types } = request else {
        return Err(BroadcastError::Channel("handler mismatch".to_owned()));
    };
    conn.subscription.unsubscribe(&event_types);
    Ok(Some(Frame::subscribed(conn.subscription.summary())))
}

fn handle_set_filter(
    conn: &mut ClientConn,
    request: ClientRequest,
) -> Result<Option<Frame>, BroadcastError> {
    let ClientRequest::SetFilter(spec) = request else {
        return Err(BroadcastError::Channel("handler mismatch".to_owned()));
    };
    // 유효하지 않은 필터는 거부되고 기존 필터가 유지됨
    let filter = EventFilter::from_spec(spec)?;
    conn.subscription.set_filter(filter);
    Ok(Some(Frame::subscribed(conn.subscription.summary())))
}

fn handle_clear_filter(
    conn: &mut ClientConn,
    request: ClientRequest,
) -> Result<Option<Frame>, BroadcastError> {
    let ClientRequest::ClearFilter = request else {
        return Err(BroadcastError::Channel("handler mismatch".to_owned()));
    };
    conn.subscription.clear_filter();
    Ok(Some(Frame::subscribed(conn.subscription.summary())))
}

fn handle_ping(
    conn: &mut ClientConn,
    request: ClientRequest,
) -> Result<Option<Frame>, BroadcastError> {
    let ClientRequest::Ping = request else {
        return Err(BroadcastError::Channel("handler mismatch".to_owned()));
    };
    let _ = conn;
    Ok(Some(Frame::pong()))
}

// ─── 백그라운드 태스크 ───────────────────────────────────────────────

/// 클라이언트 하나의 요청 처리 루프
async fn run_request_loop(
    registry: Arc<Registry>,
    client_id: String,
    mut request_rx: mpsc::Receiver<ClientRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            request = request_rx.recv() => {
                let Some(request) = request else {
                    // 전송 계층이 핸들을 놓음 → 클라이언트 이탈
                    registry.close_client(&client_id, "client disconnected");
                    metrics::gauge!(m::HUB_ACTIVE_CONNECTIONS).set(registry.len() as f64);
                    break;
                };
                let handled = registry.with_client(&client_id, |conn| {
                    conn.touch();
                    match dispatch(conn, request) {
                        Ok(Some(reply)) => {
                            conn.buffer.push(reply);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(client = %conn.client_id, error = %e, "request rejected");
                        }
                    }
                });
                if handled.is_none() {
                    break; // 레지스트리에서 이미 제거됨
                }
            }
        }
    }
    tracing::debug!(client = %client_id, "request loop finished");
}

/// 이벤트 팬아웃 루프
async fn run_fanout(
    registry: Arc<Registry>,
    counters: Arc<HubCounters>,
    mut event_rx: mpsc::Receiver<HubEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        // 프레임은 한 번만 만들고 클라이언트별로 복제
        let frame = Frame::from_event(&event);
        let (delivered, dropped) = registry.fanout(&event, &frame);

        if delivered > 0 {
            counters.events_fanout.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                m::HUB_EVENTS_FANOUT_TOTAL,
                m::LABEL_EVENT_TYPE => event.event_type.as_str()
            )
            .increment(1);
        }
        if dropped > 0 {
            counters.messages_dropped.fetch_add(dropped, Ordering::Relaxed);
            metrics::counter!(m::HUB_MESSAGES_DROPPED_TOTAL).increment(dropped);
            tracing::debug!(
                event = %event.id,
                dropped,
                "slow client buffers overflowed, oldest frames dropped"
            );
        }
    }
    tracing::debug!("fanout loop finished");
}

/// 생존성 스윕 루프 — 핑이 끊긴 클라이언트를 정리합니다.
async fn run_liveness_sweep(
    registry: Arc<Registry>,
    counters: Arc<HubCounters>,
    interval: Duration,
    missed_ping_limit: u32,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // 첫 틱은 즉시 발화하므로 건너뜀
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let expired = registry.sweep(interval, missed_ping_limit);
                if !expired.is_empty() {
                    let count = expired.len() as u64;
                    counters.clients_timed_out.fetch_add(count, Ordering::Relaxed);
                    metrics::counter!(m::HUB_CLIENTS_TIMED_OUT_TOTAL).increment(count);
                    metrics::gauge!(m::HUB_ACTIVE_CONNECTIONS).set(registry.len() as f64);
                    for client_id in expired {
                        tracing::info!(client = %client_id, "client closed after missed pings");
                    }
                }
            }
        }
    }
    tracing::debug!("liveness sweep finished");
}

/// 브로드캐스트 허브 빌더
pub struct BroadcastHubBuilder {
    config: HubConfig,
}

impl BroadcastHubBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
        }
    }

    /// 허브 설정을 지정합니다.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// 허브를 빌드합니다.
    ///
    /// # Returns
    /// - `BroadcastHub`: 허브 인스턴스
    /// - `mpsc::Sender<HubEvent>`: 이벤트 발행 채널 (프로세서/데몬이 사용)
    pub fn build(self) -> Result<(BroadcastHub, mpsc::Sender<HubEvent>), BroadcastError> {
        self.config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_channel_capacity);
        let (shutdown_tx, _) = broadcast::channel(8);

        let hub = BroadcastHub {
            info: PluginInfo {
                name: "broadcast".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                description: "client subscriptions and event fan-out".to_owned(),
                plugin_type: PluginType::Broadcast,
            },
            config: self.config,
            registry: Arc::new(Registry::new()),
            counters: Arc::new(HubCounters::default()),
            event_rx: Some(event_rx),
            state: RunState::Initialized,
            tasks: Vec::new(),
            shutdown_tx,
        };

        Ok((hub, event_tx))
    }
}

impl Default for BroadcastHubBuilder {
    fn default() -> Self {
        Self::new()
    }
}
