//! 클라이언트 연결 — 상태 머신과 클라이언트별 아웃바운드 버퍼
//!
//! # 연결 상태 머신
//! ```text
//! Connecting --(인증 성공)--> Open --(클라이언트 종료 요청 | 치명적
//! 쓰기 에러 | 핑 미수신)--> Closing --(잔여 쓰기 플러시)--> Closed
//! ```
//! 인증 실패 연결은 `Open`에 도달하기 전에 거부됩니다.
//!
//! # 느린 클라이언트 격리
//! 클라이언트마다 독립된 바운드 버퍼와 전송 루프를 가집니다.
//! 버퍼가 가득 차면 가장 오래된 프레임을 드롭하고 드롭 카운터를
//! 올립니다. 전송이 막히는 것은 그 클라이언트의 루프뿐입니다.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::message::{ClientRequest, Frame};
use crate::subscription::Subscription;

/// 클라이언트 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// 핸드셰이크/인증 진행 중
    Connecting,
    /// 정상 연결됨
    Open,
    /// 종료 중 (잔여 쓰기 플러시)
    Closing,
    /// 종료됨
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// 전송 계층이 받는 클라이언트 핸들
///
/// 외부 WebSocket 핸들러는 `outbound`에서 프레임을 꺼내 소켓에 쓰고,
/// 소켓에서 읽은 요청을 `requests`로 넣습니다.
#[derive(Debug)]
pub struct ClientHandle {
    /// 클라이언트 ID
    pub client_id: String,
    /// 허브 → 전송 계층 프레임 스트림
    pub outbound: mpsc::Receiver<Frame>,
    /// 전송 계층 → 허브 요청 스트림
    pub requests: mpsc::Sender<ClientRequest>,
}

/// 클라이언트별 바운드 아웃바운드 버퍼 (drop-oldest)
pub(crate) struct OutboundBuffer {
    inner: Mutex<VecDeque<Frame>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutboundBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// 프레임을 버퍼에 넣습니다. 가득 차면 가장 오래된 프레임을
    /// 드롭하고 `true`를 반환합니다. 블록하지 않습니다.
    pub(crate) fn push(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let dropped = {
            let mut inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            let dropped = if inner.len() >= self.capacity {
                inner.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            } else {
                false
            };
            inner.push_back(frame);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// 다음 프레임을 기다립니다.
    ///
    /// 버퍼가 닫히면 잔여 프레임을 모두 반환한 뒤 `None`을 반환합니다
    /// (Closing 상태의 플러시 시맨틱).
    pub(crate) async fn pop(&self) -> Option<Frame> {
        loop {
            let waiter = self.notify.notified();
            {
                let mut inner = match self.inner.lock() {
                    Ok(inner) => inner,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(frame) = inner.pop_front() {
                    return Some(frame);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            waiter.await;
        }
    }

    /// 버퍼를 닫습니다. 이후의 push는 무시되고, 전송 루프는 잔여
    /// 프레임을 플러시한 뒤 종료합니다.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// 드롭된 프레임 수를 반환합니다.
    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }
}

/// 허브 레지스트리에 저장되는 클라이언트 연결 엔트리
pub(crate) struct ClientConn {
    pub(crate) client_id: String,
    pub(crate) state: ClientState,
    pub(crate) subscription: Subscription,
    pub(crate) buffer: std::sync::Arc<OutboundBuffer>,
    /// 마지막 인바운드 요청(핑 포함) 시각
    pub(crate) last_seen: Instant,
    /// 연속 핑 미수신 횟수 (생존성 스윕이 관리)
    pub(crate) missed_pings: u32,
}

impl ClientConn {
    pub(crate) fn new(client_id: impl Into<String>, buffer_capacity: usize) -> Self {
        let client_id = client_id.into();
        Self {
            subscription: Subscription::new(client_id.clone()),
            client_id,
            state: ClientState::Connecting,
            buffer: std::sync::Arc::new(OutboundBuffer::new(buffer_capacity)),
            last_seen: Instant::now(),
            missed_pings: 0,
        }
    }

    /// 인바운드 활동을 기록합니다 (생존성 카운터 리셋).
    pub(crate) fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.missed_pings = 0;
    }
}

/// 클라이언트 전송 루프 — 버퍼의 프레임을 전송 채널로 밀어냅니다.
///
/// 전송 채널이 막히면 이 루프만 대기합니다. 다른 클라이언트의
/// 팬아웃은 영향을 받지 않습니다. 채널이 닫히면(클라이언트 이탈)
/// 종료합니다.
pub(crate) async fn run_send_loop(
    client_id: String,
    buffer: std::sync::Arc<OutboundBuffer>,
    outbound_tx: mpsc::Sender<Frame>,
) {
    while let Some(frame) = buffer.pop().await {
        if outbound_tx.send(frame).await.is_err() {
            tracing::debug!(client = %client_id, "transport closed, ending send loop");
            break;
        }
    }
    tracing::debug!(client = %client_id, "send loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(tag: u64) -> Frame {
        Frame {
            kind: crate::message::FrameKind::ProcessingUpdate,
            data: serde_json::json!({ "tag": tag }),
            timestamp: tag,
            priority: 0,
        }
    }

    #[test]
    fn client_state_display() {
        assert_eq!(ClientState::Connecting.to_string(), "connecting");
        assert_eq!(ClientState::Closed.to_string(), "closed");
    }

    #[tokio::test]
    async fn buffer_overflow_drops_oldest() {
        let buffer = OutboundBuffer::new(2);
        assert!(!buffer.push(frame(1)));
        assert!(!buffer.push(frame(2)));
        // 용량 초과: 가장 오래된 1번이 드롭됨
        assert!(buffer.push(frame(3)));
        assert_eq!(buffer.dropped_count(), 1);
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().await.unwrap().timestamp, 2);
        assert_eq!(buffer.pop().await.unwrap().timestamp, 3);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let buffer = Arc::new(OutboundBuffer::new(4));
        let buffer2 = buffer.clone();
        let waiter = tokio::spawn(async move { buffer2.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.push(frame(7));

        let frame = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.timestamp, 7);
    }

    #[tokio::test]
    async fn close_flushes_remaining_then_ends() {
        let buffer = OutboundBuffer::new(4);
        buffer.push(frame(1));
        buffer.push(frame(2));
        buffer.close();

        // 닫힌 뒤에도 잔여 프레임은 플러시됨
        assert_eq!(buffer.pop().await.unwrap().timestamp, 1);
        assert_eq!(buffer.pop().await.unwrap().timestamp, 2);
        assert!(buffer.pop().await.is_none());

        // 닫힌 뒤 push는 무시됨
        assert!(!buffer.push(frame(3)));
        assert!(buffer.pop().await.is_none());
    }

    #[tokio::test]
    async fn send_loop_forwards_frames_in_order() {
        let buffer = Arc::new(OutboundBuffer::new(8));
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(run_send_loop("c1".to_owned(), buffer.clone(), tx));

        buffer.push(frame(1));
        buffer.push(frame(2));

        assert_eq!(rx.recv().await.unwrap().timestamp, 1);
        assert_eq!(rx.recv().await.unwrap().timestamp, 2);

        buffer.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn conn_touch_resets_missed_pings() {
        let mut conn = ClientConn::new("c1", 4);
        conn.missed_pings = 2;
        conn.touch();
        assert_eq!(conn.missed_pings, 0);
    }
}
