//! In-process durable transport.
//!
//! Queues live in memory for the lifetime of the transport. Semantics follow
//! a classic work-queue broker: routing-key bindings, FIFO queues, explicit
//! ack/requeue, per-subscription prefetch and per-message TTL with
//! dead-lettering.
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace};

use crate::broker::transport::{
    Acker, Delivery, PublishOptions, Subscription, Transport, TransportError,
};

struct Stored {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
    dead_letter: Option<String>,
    redelivered: bool,
}

#[derive(Default)]
struct MemoryState {
    /// routing key → bound queues
    bindings: HashMap<String, Vec<String>>,
    queues: HashMap<String, VecDeque<Stored>>,
    /// Bumped by `disconnect`; older subscriptions and ackers become stale.
    generation: u64,
    closed: bool,
}

impl MemoryState {
    fn route(&mut self, routing_key: &str, make: impl Fn() -> Stored) -> usize {
        let Some(queues) = self.bindings.get(routing_key) else {
            return 0;
        };
        for queue in queues {
            self.queues.entry(queue.clone()).or_default().push_back(make());
        }
        queues.len()
    }

    /// Move expired messages to their dead-letter routing key.
    fn sweep(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (queue, messages) in self.queues.iter_mut() {
            let before = messages.len();
            messages.retain_mut(|m| {
                if m.expires_at.is_some_and(|at| at <= now) {
                    expired.push((queue.clone(), m.dead_letter.take(), std::mem::take(&mut m.payload)));
                    false
                } else {
                    true
                }
            });
            if messages.len() != before {
                trace!(queue = %queue, expired = before - messages.len(), "messages expired");
            }
        }
        for (queue, dead_letter, payload) in expired {
            let Some(key) = dead_letter else {
                debug!(queue = %queue, "expired message dropped");
                continue;
            };
            let routed = self.route(&key, || Stored {
                payload: payload.clone(),
                expires_at: None,
                dead_letter: None,
                redelivered: false,
            });
            debug!(queue = %queue, dead_letter = %key, routed, "expired message dead-lettered");
        }
    }

    /// Earliest expiry across all queues; a dead letter may land in any of them.
    fn next_expiry(&self) -> Option<Instant> {
        self.queues
            .values()
            .flat_map(|q| q.iter().filter_map(|m| m.expires_at))
            .min()
    }
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    changed: Notify,
}

/// Durable transport kept in process memory.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Messages waiting in `queue`, not counting unsettled deliveries.
    pub fn queue_len(&self, queue: &str) -> usize {
        let mut st = self.inner.state.lock();
        st.sweep(Instant::now());
        st.queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Drop every open subscription as a lost connection would.
    ///
    /// Unsettled deliveries go back to their queue once their acker is used or dropped.
    pub fn disconnect(&self) {
        self.inner.state.lock().generation += 1;
        self.inner.changed.notify_waiters();
    }

    /// Shut the transport down; subscriptions end and publishing fails.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.changed.notify_waiters();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        let expires_at = options.ttl.map(|ttl| Instant::now() + ttl);
        {
            let mut st = self.inner.state.lock();
            if st.closed {
                return Err(TransportError::Closed);
            }
            let routed = st.route(routing_key, || Stored {
                payload: payload.clone(),
                expires_at,
                dead_letter: options.dead_letter.clone(),
                redelivered: false,
            });
            trace!(routing_key, routed, "message published");
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }

    async fn declare(&self, queue: &str, routing_key: &str) -> Result<(), TransportError> {
        let mut st = self.inner.state.lock();
        if st.closed {
            return Err(TransportError::Closed);
        }
        st.queues.entry(queue.to_string()).or_default();
        let bound = st.bindings.entry(routing_key.to_string()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let st = self.inner.state.lock();
        if st.closed {
            return Err(TransportError::Closed);
        }
        if !st.queues.contains_key(queue) {
            return Err(TransportError::Rejected(format!("queue '{queue}' is not declared")));
        }
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            prefetch: prefetch.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
            generation: st.generation,
        }))
    }
}

struct MemorySubscription {
    inner: Arc<MemoryInner>,
    queue: String,
    prefetch: usize,
    in_flight: Arc<AtomicUsize>,
    generation: u64,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>> {
        loop {
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let wake_at = {
                let mut st = self.inner.state.lock();
                if st.closed {
                    return None;
                }
                if st.generation != self.generation {
                    return Some(Err(TransportError::Closed));
                }
                st.sweep(Instant::now());

                if self.in_flight.load(Ordering::Acquire) < self.prefetch {
                    if let Some(message) = st.queues.get_mut(&self.queue).and_then(VecDeque::pop_front) {
                        self.in_flight.fetch_add(1, Ordering::AcqRel);
                        let payload = message.payload.clone();
                        let redelivered = message.redelivered;
                        let acker = MemoryAcker {
                            inner: self.inner.clone(),
                            queue: self.queue.clone(),
                            message: Some(message),
                            in_flight: self.in_flight.clone(),
                            generation: self.generation,
                        };
                        return Some(Ok(Delivery::new(payload, redelivered, Box::new(acker))));
                    }
                }
                st.next_expiry()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => changed.await,
            }
        }
    }
}

struct MemoryAcker {
    inner: Arc<MemoryInner>,
    queue: String,
    message: Option<Stored>,
    in_flight: Arc<AtomicUsize>,
    generation: u64,
}

impl MemoryAcker {
    fn settle(&mut self, requeue: bool) -> Result<(), TransportError> {
        let Some(mut message) = self.message.take() else {
            return Ok(());
        };
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let stale = {
            let mut st = self.inner.state.lock();
            let stale = st.generation != self.generation;
            if requeue || stale {
                message.redelivered = true;
                st.queues
                    .entry(self.queue.clone())
                    .or_default()
                    .push_front(message);
            }
            stale
        };
        self.inner.changed.notify_waiters();

        if stale {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<(), TransportError> {
        self.settle(false)
    }

    async fn requeue(&mut self) -> Result<(), TransportError> {
        self.settle(true)
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        let _ = self.settle(true);
    }
}
