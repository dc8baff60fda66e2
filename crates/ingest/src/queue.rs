//! 수집 큐 — 바운드 우선순위 큐와 백프레셔
//!
//! [`IngestQueue`]는 워처(생산자)와 프로세서 워커(소비자) 사이의
//! 유일한 공유 가변 구조입니다. 내부 뮤텍스와 [`tokio::sync::Notify`]
//! 페어로 동기화합니다.
//!
//! # 순서 보장
//! 엄격한 우선순위 우선, 티어 내부는 `sequence`에 의한 FIFO입니다.
//! 배치 드레인은 가장 높은 티어를 먼저 소진한 뒤 낮은 티어로
//! 내려갑니다.
//!
//! # 에이징 규칙 (기아 방지)
//! 하위 티어가 대기 중인 상태로 상위 티어에서만 `aging_threshold`번
//! 연속 배치가 드레인되면, 다음 배치는 가장 오래 기다린 하위 티어에서
//! 강제로 드레인합니다. 엄격한 우선순위만으로는 고우선 소스가 계속
//! 흐르는 동안 저우선 티어가 무한히 굶을 수 있습니다.
//!
//! # 백프레셔
//! 큐가 가득 차면 `enqueue`는 거부 대신 블록합니다. 워처는 적재
//! 성공 후에만 오프셋을 전진시키므로 종단 간 at-least-once가
//! 유지됩니다.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use logwarden_core::metrics as m;
use logwarden_core::types::LogEntry;

/// 큐에 적재된 엔트리
///
/// 디큐 시점에 파괴됩니다.
#[derive(Debug)]
pub struct QueueItem {
    /// 로그 엔트리
    pub entry: LogEntry,
    /// 적재 시각
    pub enqueued_at: Instant,
    /// 단조 증가 시퀀스 — 동일 우선순위 내 FIFO 보장과 결과 상관관계에 사용
    pub sequence: u64,
}

/// 큐 통계 스냅샷
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// 현재 큐 깊이
    pub size: usize,
    /// 최대 용량
    pub capacity: usize,
    /// 가장 오래된 엔트리의 대기 시간
    pub oldest_age: Option<Duration>,
    /// 티어별 깊이 (우선순위 내림차순)
    pub by_priority: Vec<(u8, usize)>,
}

struct QueueInner {
    /// 우선순위 → FIFO 티어
    tiers: BTreeMap<u8, VecDeque<QueueItem>>,
    size: usize,
    next_sequence: u64,
    /// 하위 티어가 대기 중인 채 상위 티어에서만 드레인된 연속 배치 수
    high_streak: u32,
}

impl QueueInner {
    fn push(&mut self, entry: LogEntry, now: Instant) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.tiers
            .entry(entry.priority.get())
            .or_default()
            .push_back(QueueItem {
                entry,
                enqueued_at: now,
                sequence,
            });
        self.size += 1;
        sequence
    }

    /// 비어있지 않은 티어 수
    fn occupied_tiers(&self) -> usize {
        self.tiers.values().filter(|q| !q.is_empty()).count()
    }

    /// 가장 오래 기다린 하위(최상위 제외) 티어의 키
    fn starved_tier(&self) -> Option<u8> {
        let top = self
            .tiers
            .iter()
            .rev()
            .find(|(_, q)| !q.is_empty())
            .map(|(k, _)| *k)?;
        self.tiers
            .iter()
            .filter(|(k, q)| **k < top && !q.is_empty())
            .min_by_key(|(_, q)| q.front().map(|item| item.enqueued_at))
            .map(|(k, _)| *k)
    }

    fn drain_tier(&mut self, tier: u8, max_items: usize, batch: &mut Vec<QueueItem>) {
        if let Some(queue) = self.tiers.get_mut(&tier) {
            while batch.len() < max_items {
                match queue.pop_front() {
                    Some(item) => {
                        self.size -= 1;
                        batch.push(item);
                    }
                    None => break,
                }
            }
        }
    }

    /// 배치를 드레인합니다. 강제 에이징 여부를 함께 반환합니다.
    fn drain_batch(&mut self, max_items: usize, aging_threshold: u32) -> (Vec<QueueItem>, bool) {
        let mut batch = Vec::new();
        if self.size == 0 || max_items == 0 {
            return (batch, false);
        }

        let force_age = self.high_streak >= aging_threshold && self.occupied_tiers() > 1;
        if force_age && let Some(tier) = self.starved_tier() {
            self.drain_tier(tier, max_items, &mut batch);
            self.high_streak = 0;
            self.prune_empty_tiers();
            return (batch, true);
        }

        // 일반 드레인: 상위 티어부터 소진
        let keys: Vec<u8> = self.tiers.keys().rev().copied().collect();
        for tier in keys {
            if batch.len() >= max_items {
                break;
            }
            self.drain_tier(tier, max_items, &mut batch);
        }

        // 이번 배치가 건드리지 않은 하위 티어가 남아 있으면 streak 증가
        let lowest_drained = batch.last().map(|item| item.entry.priority.get());
        let lower_waiting = match lowest_drained {
            Some(lowest) => self
                .tiers
                .iter()
                .any(|(k, q)| *k < lowest && !q.is_empty()),
            None => false,
        };
        if lower_waiting {
            self.high_streak += 1;
        } else {
            self.high_streak = 0;
        }

        self.prune_empty_tiers();
        (batch, false)
    }

    fn drain_all(&mut self) -> Vec<QueueItem> {
        let mut all = Vec::with_capacity(self.size);
        let keys: Vec<u8> = self.tiers.keys().rev().copied().collect();
        for tier in keys {
            if let Some(queue) = self.tiers.get_mut(&tier) {
                while let Some(item) = queue.pop_front() {
                    self.size -= 1;
                    all.push(item);
                }
            }
        }
        self.tiers.clear();
        all
    }

    fn prune_empty_tiers(&mut self) {
        self.tiers.retain(|_, q| !q.is_empty());
    }

    fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.tiers
            .values()
            .filter_map(|q| q.front())
            .map(|item| now.duration_since(item.enqueued_at))
            .max()
    }
}

/// 바운드 우선순위 수집 큐
pub struct IngestQueue {
    inner: Mutex<QueueInner>,
    /// 빈 슬롯 발생 알림 (블록된 생산자 깨움)
    space: Notify,
    /// 적재 발생 알림 (대기 중인 소비자 깨움)
    items: Notify,
    capacity: usize,
    aging_threshold: u32,
}

impl IngestQueue {
    /// 새 큐를 생성합니다.
    pub fn new(capacity: usize, aging_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tiers: BTreeMap::new(),
                size: 0,
                next_sequence: 0,
                high_streak: 0,
            }),
            space: Notify::new(),
            items: Notify::new(),
            capacity,
            aging_threshold,
        }
    }

    /// 엔트리를 적재합니다. 큐가 가득 차 있으면 자리가 날 때까지
    /// 블록합니다 (드롭 없음).
    ///
    /// 할당된 시퀀스 번호를 반환합니다.
    pub async fn enqueue(&self, entry: LogEntry) -> u64 {
        let mut pending = Some(entry);
        loop {
            let pushed = {
                let mut inner = self.lock();
                if inner.size < self.capacity {
                    pending.take().map(|entry| {
                        let size_after = inner.size + 1;
                        (inner.push(entry, Instant::now()), size_after)
                    })
                } else {
                    None
                }
            };

            if let Some((sequence, size_after)) = pushed {
                metrics::counter!(m::QUEUE_ENQUEUED_TOTAL).increment(1);
                metrics::gauge!(m::QUEUE_SIZE).set(size_after as f64);
                self.items.notify_one();
                if size_after < self.capacity {
                    // 여유가 남아 있으면 블록된 다른 생산자도 깨움
                    self.space.notify_one();
                }
                return sequence;
            }

            self.space.notified().await;
        }
    }

    /// 배치를 드레인합니다.
    ///
    /// 큐가 비어 있으면 `max_wait`까지 적재를 기다리고, 그래도 비어
    /// 있으면 빈 배치를 반환합니다.
    pub async fn dequeue_batch(&self, max_items: usize, max_wait: Duration) -> Vec<QueueItem> {
        let deadline = Instant::now() + max_wait;
        loop {
            let waiter = self.items.notified();
            let (batch, aged) = {
                let mut inner = self.lock();
                inner.drain_batch(max_items, self.aging_threshold)
            };

            if !batch.is_empty() {
                if aged {
                    metrics::counter!(m::QUEUE_AGED_BATCHES_TOTAL).increment(1);
                    tracing::debug!(
                        len = batch.len(),
                        priority = batch[0].entry.priority.get(),
                        "aged batch force-drained from starved tier"
                    );
                }
                let (size, has_more) = {
                    let inner = self.lock();
                    (inner.size, inner.size > 0)
                };
                metrics::gauge!(m::QUEUE_SIZE).set(size as f64);
                self.space.notify_one();
                if has_more {
                    // 남은 엔트리가 있으면 다른 소비자도 깨움
                    self.items.notify_one();
                }
                return batch;
            }

            if Instant::now() >= deadline {
                return Vec::new();
            }
            tokio::select! {
                _ = waiter => {}
                _ = tokio::time::sleep_until(deadline) => return Vec::new(),
            }
        }
    }

    /// 큐의 모든 엔트리를 드레인합니다 (종료 처리용).
    pub fn drain_all(&self) -> Vec<QueueItem> {
        let all = {
            let mut inner = self.lock();
            inner.drain_all()
        };
        metrics::gauge!(m::QUEUE_SIZE).set(0.0);
        self.space.notify_one();
        all
    }

    /// 통계 스냅샷을 반환합니다.
    pub fn stats(&self) -> QueueStats {
        let now = Instant::now();
        let inner = self.lock();
        let oldest_age = inner.oldest_age(now);
        if let Some(age) = oldest_age {
            metrics::gauge!(m::QUEUE_OLDEST_AGE_SECONDS).set(age.as_secs_f64());
        }
        QueueStats {
            size: inner.size,
            capacity: self.capacity,
            oldest_age,
            by_priority: inner
                .tiers
                .iter()
                .rev()
                .filter(|(_, q)| !q.is_empty())
                .map(|(k, q)| (*k, q.len()))
                .collect(),
        }
    }

    /// 현재 큐 깊이를 반환합니다.
    pub fn len(&self) -> usize {
        self.lock().size
    }

    /// 큐가 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 큐 최대 용량을 반환합니다.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 큐 사용률을 0.0~1.0 범위로 반환합니다.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.len() as f64 / self.capacity as f64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // 뮤텍스 독성은 내부 패닉에서만 발생 — 복구 불가이므로 전파
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
