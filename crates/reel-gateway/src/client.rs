//! Job-pull client.
//!
//! One slot loop runs per resource: it queues a [`SlotToken`], waits for the
//! job the token gets fulfilled with, dispatches it on the bus and queues the
//! result frame. A single connection loop owns the connection: after each
//! connect it announces the in-flight jobs, then serves tokens one at a time
//! with a `request` frame each, racing the assignment against the connection
//! closing. A token whose request is lost to a close goes back to the front
//! of the queue.
use std::{sync::Arc, time::Instant};

use futures::{SinkExt, StreamExt};
use reel_core::{Bus, CoreError, JobOutcome, MetricsHandle, noop_metrics};
use reel_model::{ClientFrame, decode_assignment};
use tokio::{sync::mpsc, task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    GatewayConfig, GatewayError,
    link::{Connector, FrameSink, FrameStream, Link},
    pending::{InFlight, PendingSlots, SlotToken},
};

/// Failure reason reported for errors that carry no user-facing message.
pub const FALLBACK_REASON: &str = "Recorder failed.";

const METRICS_SOURCE: &str = "gateway";

#[derive(Default)]
struct Shared {
    pending: PendingSlots,
    in_flight: InFlight,
}

/// Current number of slots allowed to request jobs.
pub type SlotLimit = Arc<dyn Fn() -> usize + Send + Sync>;

/// Pulls recording jobs from the assignment endpoint for `slots` resources.
pub struct GatewayClient {
    connector: Arc<dyn Connector>,
    bus: Bus,
    slots: usize,
    slot_limit: Option<SlotLimit>,
    config: GatewayConfig,
    metrics: MetricsHandle,
}

impl GatewayClient {
    pub fn new(connector: impl Connector, bus: Bus, slots: usize) -> Self {
        Self {
            connector: Arc::new(connector),
            bus,
            slots,
            slot_limit: None,
            config: GatewayConfig::default(),
            metrics: noop_metrics(),
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Retire slots whose index reaches `limit()`, e.g. the capacity of a
    /// pool that shrank after a failed recovery.
    ///
    /// Checked before each request; a retired slot stops asking for jobs.
    pub fn with_slot_limit(mut self, limit: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.slot_limit = Some(Arc::new(limit));
        self
    }

    /// Serve jobs until `cancel` fires or the endpoint rejects the credentials.
    ///
    /// Transient connection failures are retried forever; the only error
    /// returned is a terminal one.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), GatewayError> {
        let shared = Arc::new(Shared::default());
        let (results_tx, results_rx) = mpsc::channel(self.config.result_buffer.max(1));

        let slots_cancel = cancel.child_token();
        let mut slots = JoinSet::new();
        for slot in 0..self.slots {
            slots.spawn(slot_loop(
                slot,
                shared.clone(),
                self.bus.clone(),
                results_tx.clone(),
                self.metrics.clone(),
                slots_cancel.clone(),
            ));
        }
        drop(results_tx);
        info!(slots = self.slots, endpoint = %self.config.endpoint, "gateway client started");

        let mut conn = ConnectionLoop {
            connector: self.connector.clone(),
            shared,
            slot_limit: self.slot_limit.clone(),
            config: &self.config,
            metrics: self.metrics.clone(),
            results: results_rx,
            unsent: None,
        };
        let res = conn.run(&cancel).await;

        slots_cancel.cancel();
        while slots.join_next().await.is_some() {}
        match &res {
            Ok(()) => info!("gateway client stopped"),
            Err(e) => error!(error = %e, "gateway client stopped"),
        }
        res
    }
}

async fn slot_loop(
    slot: usize,
    shared: Arc<Shared>,
    bus: Bus,
    results: mpsc::Sender<ClientFrame>,
    metrics: MetricsHandle,
    cancel: CancellationToken,
) {
    loop {
        let (token, assigned) = SlotToken::new(slot);
        shared.pending.push_back(token);

        let job = tokio::select! {
            _ = cancel.cancelled() => return,
            job = assigned => match job {
                Ok(job) => job,
                Err(_) => return,
            },
        };
        let job_id = job.job_id;
        info!(slot, %job_id, "job assigned");

        shared.in_flight.insert(job_id);
        metrics.record_job_started(METRICS_SOURCE);
        let started = Instant::now();

        let res = tokio::select! {
            _ = cancel.cancelled() => return,
            res = bus.dispatch(job) => res,
        };
        let elapsed = started.elapsed().as_millis() as u64;

        let frame = match res {
            Ok(()) => {
                info!(slot, %job_id, elapsed_ms = elapsed, "job succeeded");
                metrics.record_job_completed(METRICS_SOURCE, JobOutcome::Success, elapsed);
                ClientFrame::Success { job_id }
            }
            Err(e) => {
                let reason = match &e {
                    CoreError::Handler(err) => err.public_reason(FALLBACK_REASON).to_string(),
                    _ => FALLBACK_REASON.to_string(),
                };
                warn!(slot, %job_id, error = %e, %reason, "job failed");
                metrics.record_job_completed(METRICS_SOURCE, JobOutcome::Failure, elapsed);
                ClientFrame::Failure { job_id, reason }
            }
        };

        shared.in_flight.remove(&job_id);
        if results.send(frame).await.is_err() {
            return;
        }
    }
}

struct ConnectionLoop<'a> {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    slot_limit: Option<SlotLimit>,
    config: &'a GatewayConfig,
    metrics: MetricsHandle,
    results: mpsc::Receiver<ClientFrame>,
    /// Result frame whose write failed; sent first on the next connection.
    unsent: Option<ClientFrame>,
}

impl ConnectionLoop<'_> {
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.connector.connect() => res,
            };

            match connected {
                Ok(link) => {
                    attempt = 0;
                    info!("connected to gateway");
                    match self.serve(link, cancel).await {
                        Ok(()) => return Ok(()),
                        Err(e) if e.is_terminal() => return Err(e),
                        Err(e) => warn!(error = %e, "lost connection to gateway"),
                    }
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!(error = %e, attempt, "gateway connect failed"),
            }

            self.metrics.record_gateway_reconnect();
            let delay = self.config.reconnect.delay(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Drive one connection. `Ok` only on cancellation.
    async fn serve(&mut self, link: Link, cancel: &CancellationToken) -> Result<(), GatewayError> {
        let Link {
            mut sink,
            mut stream,
        } = link;

        let announce = self.shared.in_flight.snapshot();
        debug!(jobs = announce.len(), "announcing in-flight jobs");
        sink.send(ClientFrame::Announce(announce)).await?;

        if let Some(frame) = self.unsent.take() {
            self.write_result(&mut sink, frame).await?;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
                incoming = stream.next() => {
                    let text = incoming.unwrap_or_else(closed_without_frame)?;
                    warn!(frame = %text, "unexpected frame without a pending request");
                }
                Some(frame) = self.results.recv() => {
                    self.write_result(&mut sink, frame).await?;
                }
                token = self.shared.pending.pop() => {
                    if self.is_retired(&token) {
                        continue;
                    }
                    if !self.request(token, &mut sink, &mut stream, cancel).await? {
                        let _ = sink.close().await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Request one job for `token`.
    ///
    /// Returns `Ok(false)` when cancelled. On any path where the token was not
    /// fulfilled it is put back at the front of the queue.
    async fn request(
        &mut self,
        token: SlotToken,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        cancel: &CancellationToken,
    ) -> Result<bool, GatewayError> {
        let slot = token.slot;
        if let Err(e) = sink.send(ClientFrame::Request).await {
            self.shared.pending.push_front(token);
            return Err(e);
        }
        debug!(slot, "job requested");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.shared.pending.push_front(token);
                    return Ok(false);
                }
                incoming = stream.next() => {
                    let text = match incoming.unwrap_or_else(closed_without_frame) {
                        Ok(text) => text,
                        Err(e) => {
                            info!(slot, "request interrupted; slot requeued");
                            self.shared.pending.push_front(token);
                            return Err(e);
                        }
                    };
                    match decode_assignment(&text) {
                        Ok(job) => {
                            if let Err(job) = token.fulfill(job) {
                                error!(slot, job_id = %job.job_id, "slot gone before assignment");
                            }
                        }
                        Err(e) => {
                            warn!(slot, error = %e, "malformed assignment; requesting again");
                            self.shared.pending.push_front(token);
                        }
                    }
                    return Ok(true);
                }
                Some(frame) = self.results.recv() => {
                    if let Err(e) = self.write_result(sink, frame).await {
                        self.shared.pending.push_front(token);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Whether `token`'s slot is past the limit. Dropping the token ends its slot loop.
    fn is_retired(&self, token: &SlotToken) -> bool {
        let Some(limit) = &self.slot_limit else {
            return false;
        };
        let limit = limit();
        if token.slot < limit {
            return false;
        }
        warn!(slot = token.slot, limit, "slot retired; resource pool shrank");
        true
    }

    async fn write_result(&mut self, sink: &mut FrameSink, frame: ClientFrame) -> Result<(), GatewayError> {
        match sink.send(frame.clone()).await {
            Ok(()) => {
                debug!(frame = frame.tag(), "result sent");
                Ok(())
            }
            Err(e) => {
                self.unsent = Some(frame);
                Err(e)
            }
        }
    }
}

fn closed_without_frame() -> Result<String, GatewayError> {
    Err(GatewayError::Closed {
        code: None,
        reason: "connection dropped".to_string(),
    })
}
