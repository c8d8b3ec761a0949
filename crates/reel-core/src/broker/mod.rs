//! Bridge between the local [`Bus`] and a durable broker.
//!
//! Outbound messages are published through a [`Transport`] under their routing
//! name with the publish policy of their type. Inbound messages are consumed
//! by one loop per subscribed type, handed to the bus and settled according
//! to the consume policy of their type.
//!
//! Commands are consumed from a shared queue named after the routing key, so
//! processes compete for them. Events are consumed from a per-process queue
//! `"{identifier}.{name}"`, so every subscribed process sees each event.
mod config;
pub use config::BrokerConfig;

mod transport;
pub use transport::{Acker, Delivery, PublishOptions, Subscription, Transport, TransportError};

mod memory;
pub use memory::MemoryTransport;

use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use reel_model::{Command, Message, MessageKind};
use tokio::{task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    bus::Bus,
    envelope::Envelope,
    error::CoreError,
    handler::{HandlerError, Publish},
    metrics::{MetricsHandle, noop_metrics},
    registry::Outcome,
};

/// Builder for a [`Broker`].
pub struct BrokerBuilder {
    bus: Bus,
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
    publishes: HashSet<&'static str>,
    consumes: Vec<(&'static str, MessageKind)>,
    metrics: MetricsHandle,
}

impl BrokerBuilder {
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Allow this process to publish command `C`.
    pub fn publishes<C: Command>(mut self) -> Self {
        self.publishes.insert(C::NAME);
        self
    }

    /// Consume `M` from the broker once started.
    pub fn consumes<M: Message>(mut self) -> Self {
        if !self.consumes.iter().any(|(name, _)| *name == M::NAME) {
            self.consumes.push((M::NAME, M::KIND));
        }
        self
    }

    /// Report redeliveries to `metrics`.
    pub fn metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Broker {
        Broker {
            inner: Arc::new(BrokerInner {
                bus: self.bus,
                transport: self.transport,
                config: self.config,
                publishes: self.publishes,
                consumes: self.consumes,
                metrics: self.metrics,
            }),
        }
    }
}

struct BrokerInner {
    bus: Bus,
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
    publishes: HashSet<&'static str>,
    consumes: Vec<(&'static str, MessageKind)>,
    metrics: MetricsHandle,
}

/// Durable messaging endpoint of one process. Cheap to clone.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn builder(bus: Bus, transport: Arc<dyn Transport>) -> BrokerBuilder {
        BrokerBuilder {
            bus,
            transport,
            config: BrokerConfig::default(),
            publishes: HashSet::new(),
            consumes: Vec::new(),
            metrics: noop_metrics(),
        }
    }

    /// Local bus consumed messages are handed to.
    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Runtime settings this broker was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Queue a consumed message of this routing name and kind is read from.
    pub fn queue_name(&self, name: &str, kind: MessageKind) -> String {
        self.inner.queue_name(name, kind)
    }

    /// Publish durably; returns once the transport accepted the message.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), CoreError> {
        self.inner.publish_envelope(Envelope::of(message)?).await
    }

    pub async fn publish_envelope(&self, envelope: Envelope) -> Result<(), CoreError> {
        self.inner.publish_envelope(envelope).await
    }

    /// Make this broker the publisher behind [`crate::Context::publish`].
    pub fn attach(&self) {
        let publisher = BrokerPublisher(Arc::downgrade(&self.inner));
        self.inner.bus.set_publisher(Arc::new(publisher));
    }

    /// Validate the registrations, declare queues and start the consume loops.
    ///
    /// Fails with [`CoreError::UnregisteredCommand`] if a consumed command has no handler.
    pub async fn start(&self, cancel: CancellationToken) -> Result<BrokerHandle, CoreError> {
        let inner = &self.inner;
        inner.bus.registry().ensure_handlers(
            inner
                .consumes
                .iter()
                .filter(|(_, kind)| *kind == MessageKind::Command)
                .map(|(name, _)| *name),
        )?;

        for (name, kind) in &inner.consumes {
            inner
                .transport
                .declare(&inner.queue_name(name, *kind), name)
                .await?;
        }

        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for (name, kind) in inner.consumes.iter().copied() {
            tasks.spawn(consume_loop(inner.clone(), name, kind, cancel.clone()));
        }
        info!(
            identifier = %inner.config.identifier,
            loops = inner.consumes.len(),
            "broker started"
        );

        Ok(BrokerHandle { cancel, tasks })
    }
}

/// Running consume loops of a started broker.
pub struct BrokerHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl BrokerHandle {
    /// Stop all consume loops and wait for them to exit.
    ///
    /// Deliveries still being handled are dropped and return to their queue.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
    }

    /// Token that stops the consume loops when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl BrokerInner {
    fn queue_name(&self, name: &str, kind: MessageKind) -> String {
        match kind {
            MessageKind::Command => name.to_string(),
            MessageKind::Event => format!("{}.{}", self.config.identifier, name),
        }
    }

    #[instrument(level = "debug", skip(self, envelope), fields(message = %envelope.name()))]
    async fn publish_envelope(&self, envelope: Envelope) -> Result<(), CoreError> {
        if envelope.kind() == MessageKind::Command && !self.publishes.contains(envelope.name()) {
            return Err(CoreError::Publish(format!(
                "command '{}' is not declared as published by this process",
                envelope.name()
            )));
        }

        let policy = self.bus.registry().publish_policy(envelope.name());
        let options = PublishOptions {
            ttl: policy.ttl,
            dead_letter: policy.dead_event.map(str::to_string),
        };
        let payload = envelope.to_bytes()?;

        self.transport
            .publish(envelope.name(), payload, options)
            .await
            .map_err(|e| CoreError::Publish(e.to_string()))?;
        debug!("published");
        Ok(())
    }

    async fn handle_delivery(self: Arc<Self>, name: &'static str, kind: MessageKind, delivery: Delivery) {
        let envelope = match Envelope::from_bytes(name, kind, &delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(message = name, error = %e, "undecodable message dropped");
                settle(name, delivery.ack().await);
                return;
            }
        };
        let job_id = envelope.job_id();

        let result = match kind {
            MessageKind::Command => self
                .bus
                .dispatch_envelope(&envelope)
                .await
                .map_err(|e| match e {
                    CoreError::Handler(e) => e,
                    other => HandlerError::failed(other),
                }),
            MessageKind::Event => self.bus.publish_local_envelope(&envelope).await,
        };

        let policy = self.bus.registry().consume_policy(name);
        match policy.classify(result) {
            Outcome::Ok => settle(name, delivery.ack().await),
            Outcome::Retryable(err) => {
                warn!(message = name, ?job_id, redelivered = delivery.redelivered, error = %err, "handler failed; requeueing");
                self.metrics.record_redelivery(name);
                settle(name, delivery.requeue().await);
            }
            Outcome::Terminal(err) => match policy.error_event(&err, &envelope) {
                Some(event) => {
                    let event_name = event.name().to_string();
                    match self.publish_envelope(event).await {
                        Ok(()) => {
                            warn!(message = name, ?job_id, event = %event_name, error = %err, "handler failed; error event published");
                            settle(name, delivery.ack().await);
                        }
                        Err(e) => {
                            error!(message = name, ?job_id, error = %e, "error event publish failed; requeueing");
                            settle(name, delivery.requeue().await);
                        }
                    }
                }
                None => {
                    error!(message = name, ?job_id, error = %err, "handler failed");
                    settle(name, delivery.ack().await);
                }
            },
        }
    }
}

fn settle(name: &str, result: Result<(), TransportError>) {
    if let Err(e) = result {
        warn!(message = name, error = %e, "delivery settlement failed");
    }
}

async fn consume_loop(
    inner: Arc<BrokerInner>,
    name: &'static str,
    kind: MessageKind,
    cancel: CancellationToken,
) {
    let queue = inner.queue_name(name, kind);
    let mut attempt: u32 = 0;

    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            res = subscribe(&inner, &queue, name) => res,
        };

        match subscribed {
            Ok(mut subscription) => {
                attempt = 0;
                info!(message = name, queue = %queue, "consuming");
                let mut running = JoinSet::new();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        Some(_) = running.join_next(), if !running.is_empty() => {}
                        next = subscription.next() => match next {
                            Some(Ok(delivery)) => {
                                running.spawn(inner.clone().handle_delivery(name, kind, delivery));
                            }
                            Some(Err(e)) => {
                                warn!(message = name, error = %e, "subscription lost");
                                break;
                            }
                            None => {
                                warn!(message = name, "subscription ended");
                                break;
                            }
                        },
                    }
                }

                // let handlers that already hold a delivery settle it
                while running.join_next().await.is_some() {}
            }
            Err(e) => warn!(message = name, queue = %queue, error = %e, "subscribe failed"),
        }

        let delay = inner.config.reconnect.delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

async fn subscribe(
    inner: &BrokerInner,
    queue: &str,
    name: &str,
) -> Result<Box<dyn Subscription>, TransportError> {
    inner.transport.declare(queue, name).await?;
    inner.transport.subscribe(queue, inner.config.prefetch).await
}

struct BrokerPublisher(Weak<BrokerInner>);

#[async_trait]
impl Publish for BrokerPublisher {
    async fn publish_envelope(&self, envelope: Envelope) -> Result<(), CoreError> {
        let Some(inner) = self.0.upgrade() else {
            return Err(CoreError::Publish("broker is gone".to_string()));
        };
        inner.publish_envelope(envelope).await
    }
}
