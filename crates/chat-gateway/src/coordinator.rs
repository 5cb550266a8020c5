//! Shard coordinator
//!
//! Owns the shards of this process and the connect queue. Identifies are
//! spread over `max_concurrency` rate-limit keys (`shard_id % max_concurrency`)
//! and paced by a [`TokenBucket`] of `max_concurrency` per identify interval.
//! A key never runs two handshakes at once. Resuming shards skip the bucket.
//! The queue is re-examined when a shard is requeued or settles.

use crate::error::{GatewayError, GatewayResult};
use crate::events::{Event, ShardEvent};
use crate::shard::{Shard, ShardSnapshot, ShardStatus};
use chat_common::GatewayConfig;
use chat_ratelimit::{LatencyRef, TokenBucket};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Window of the identify bucket
pub const IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

const EVENT_BUFFER: usize = 4096;

/// Resolved shard layout for a coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub gateway_url: String,
    pub token: String,
    pub shard_count: u32,
    pub first_shard: u32,
    pub last_shard: u32,
    pub max_concurrency: u32,
    pub identify_interval: Duration,
    pub gateway: GatewayConfig,
}

impl CoordinatorOptions {
    /// Options for shards `0..shard_count`
    pub fn new(
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        shard_count: u32,
        gateway: GatewayConfig,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            shard_count,
            first_shard: 0,
            last_shard: shard_count.saturating_sub(1),
            max_concurrency: 1,
            identify_interval: IDENTIFY_INTERVAL,
            gateway,
        }
    }

    pub fn with_range(mut self, first_shard: u32, last_shard: u32) -> Self {
        self.first_shard = first_shard;
        self.last_shard = last_shard;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_identify_interval(mut self, interval: Duration) -> Self {
        self.identify_interval = interval;
        self
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.shard_count == 0 {
            return Err(GatewayError::InvalidConfig(
                "shard count must be at least 1".to_string(),
            ));
        }
        if self.first_shard > self.last_shard || self.last_shard >= self.shard_count {
            return Err(GatewayError::InvalidConfig(format!(
                "shard range {}..={} does not fit {} shards",
                self.first_shard, self.last_shard, self.shard_count
            )));
        }
        if self.max_concurrency == 0 {
            return Err(GatewayError::InvalidConfig(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Manages the shards of one process
#[derive(Clone)]
pub struct ShardCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    shards: BTreeMap<u32, Shard>,
    max_concurrency: u32,
    queue: Mutex<VecDeque<u32>>,
    /// `max_concurrency` identifies per `identify_interval`
    identify_bucket: TokenBucket,
    /// Shards holding a place in the identify bucket
    identifying: Mutex<HashSet<u32>>,
    events: broadcast::Sender<ShardEvent>,
    requeue: Mutex<Option<mpsc::UnboundedReceiver<u32>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ShardCoordinator {
    pub fn new(options: CoordinatorOptions) -> GatewayResult<Self> {
        options.validate()?;

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (requeue_tx, requeue_rx) = mpsc::unbounded_channel();
        let shards = (options.first_shard..=options.last_shard)
            .map(|id| {
                let shard = Shard::new(
                    id,
                    options.shard_count,
                    options.gateway_url.clone(),
                    options.token.clone(),
                    options.gateway.clone(),
                    events.clone(),
                    requeue_tx.clone(),
                );
                (id, shard)
            })
            .collect();

        tracing::info!(
            shard_count = options.shard_count,
            first_shard = options.first_shard,
            last_shard = options.last_shard,
            max_concurrency = options.max_concurrency,
            "Shard coordinator created"
        );

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                shards,
                max_concurrency: options.max_concurrency,
                queue: Mutex::new(VecDeque::new()),
                identify_bucket: TokenBucket::new(
                    options.max_concurrency,
                    options.identify_interval,
                    0,
                    LatencyRef::default(),
                ),
                identifying: Mutex::new(HashSet::new()),
                events,
                requeue: Mutex::new(Some(requeue_rx)),
                task: Mutex::new(None),
            }),
        })
    }

    /// Subscribe to the events of every shard
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.inner.events.subscribe()
    }

    pub fn shard(&self, id: u32) -> Option<&Shard> {
        self.inner.shards.get(&id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.inner.shards.values()
    }

    pub fn snapshots(&self) -> Vec<ShardSnapshot> {
        self.shards().map(Shard::snapshot).collect()
    }

    /// Shard IDs waiting for their turn, in order
    pub fn queued(&self) -> Vec<u32> {
        self.inner.queue.lock().iter().copied().collect()
    }

    /// Queue every shard and start the connect loop
    pub fn connect(&self) {
        for id in self.inner.shards.keys() {
            self.enqueue(*id);
        }
        self.start();
        self.try_connect();
    }

    /// Disconnect every shard
    ///
    /// Without `reconnect` the queue is cleared and no shard comes back.
    pub fn disconnect(&self, reconnect: bool) {
        if !reconnect {
            self.inner.queue.lock().clear();
            self.inner.identifying.lock().clear();
        }
        for shard in self.shards() {
            shard.disconnect(reconnect);
        }
    }

    /// Spawn the task that takes requeued shards and re-examines the queue
    /// whenever a shard finishes or abandons a handshake
    fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }
        let Some(mut requeue) = self.inner.requeue.lock().take() else {
            return;
        };
        let mut events = self.inner.events.subscribe();

        let weak: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    id = requeue.recv() => {
                        let Some(id) = id else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        let coordinator = ShardCoordinator { inner };
                        tracing::debug!(shard_id = id, "Shard queued for reconnect");
                        coordinator.enqueue(id);
                        coordinator.try_connect();
                    }
                    event = events.recv() => {
                        let settled = match event {
                            Ok(event) => matches!(
                                event.event,
                                Event::PreReady { .. } | Event::Resumed | Event::Disconnect { .. }
                            ),
                            Err(RecvError::Lagged(_)) => true,
                            Err(RecvError::Closed) => break,
                        };
                        if settled {
                            let Some(inner) = weak.upgrade() else { break };
                            ShardCoordinator { inner }.try_connect();
                        }
                    }
                }
            }
        }));
    }

    fn enqueue(&self, id: u32) {
        if self.inner.identifying.lock().contains(&id) {
            return;
        }
        let mut queue = self.inner.queue.lock();
        if !queue.contains(&id) {
            queue.push_back(id);
        }
    }

    fn key(&self, id: u32) -> u32 {
        id % self.inner.max_concurrency
    }

    /// Release every queued shard whose rate-limit key is free
    ///
    /// Resuming shards connect right away; identifying shards take a place in
    /// the identify bucket, one per key.
    fn try_connect(&self) {
        let inner = &self.inner;
        let mut resuming = Vec::new();
        let mut identifying = Vec::new();
        {
            let mut queue = inner.queue.lock();
            let mut waiting = inner.identifying.lock();
            let mut keys_taken = HashSet::new();
            let mut index = 0;

            while index < queue.len() {
                let id = queue[index];
                let Some(shard) = inner.shards.get(&id) else {
                    queue.remove(index);
                    continue;
                };
                if shard.status() != ShardStatus::Disconnected {
                    queue.remove(index);
                    continue;
                }

                let key = self.key(id);
                if keys_taken.contains(&key) || self.key_connecting(key, id) {
                    index += 1;
                    continue;
                }

                if shard.can_resume() {
                    keys_taken.insert(key);
                    resuming.push(shard.clone());
                } else if waiting.iter().any(|other| self.key(*other) == key) {
                    index += 1;
                    continue;
                } else {
                    waiting.insert(id);
                    identifying.push(id);
                }
                queue.remove(index);
            }
        }

        for shard in resuming {
            tracing::debug!(shard_id = shard.id(), "Resuming shard");
            shard.connect();
        }
        for id in identifying {
            let weak = Arc::downgrade(&self.inner);
            self.inner.identify_bucket.queue(
                move || {
                    if let Some(inner) = weak.upgrade() {
                        ShardCoordinator { inner }.start_identify(id);
                    }
                },
                false,
            );
        }
    }

    /// The identify bucket granted `id` its turn
    fn start_identify(&self, id: u32) {
        if !self.inner.identifying.lock().remove(&id) {
            // Cancelled by a disconnect
            return;
        }
        let Some(shard) = self.inner.shards.get(&id) else {
            return;
        };
        if shard.status() != ShardStatus::Disconnected {
            return;
        }
        if self.key_connecting(self.key(id), id) {
            // A resume took the key meanwhile
            let mut queue = self.inner.queue.lock();
            if !queue.contains(&id) {
                queue.push_front(id);
            }
            return;
        }
        tracing::debug!(shard_id = id, "Identifying shard");
        shard.connect();
    }

    /// Whether another shard of the key is mid-handshake
    fn key_connecting(&self, key: u32, id: u32) -> bool {
        self.inner.shards.values().any(|other| {
            other.id() != id && self.key(other.id()) == key && other.status().is_connecting()
        })
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator")
            .field("shards", &self.inner.shards.len())
            .field("max_concurrency", &self.inner.max_concurrency)
            .finish()
    }
}
