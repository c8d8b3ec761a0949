//! In-process message bus.
//!
//! Routes commands to their single handler, fans events out to every
//! listener and resolves correlation waiters. The bus only knows the
//! [`Registry`] it was built from; durable transport lives in the broker.
mod waiter;
pub use waiter::Waiter;

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{FutureExt, future::join_all};
use parking_lot::{Mutex, RwLock};
use reel_model::{Command, Event, MessageKind};
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace, warn};

use crate::{
    envelope::Envelope,
    error::CoreError,
    handler::{Context, Dependencies, HandlerError, Publish},
    registry::Registry,
};

type Matcher = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;

struct WaiterSlot {
    id: u64,
    matches: Matcher,
    tx: oneshot::Sender<Envelope>,
}

struct BusInner {
    registry: Registry,
    deps: RwLock<Dependencies>,
    waiters: Mutex<HashMap<&'static str, Vec<WaiterSlot>>>,
    next_waiter: AtomicU64,
}

/// Shared handle to the bus. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Build a bus over a finished registry; publishes stay local until a broker attaches.
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry,
                deps: RwLock::new(Dependencies::new()),
                waiters: Mutex::new(HashMap::new()),
                next_waiter: AtomicU64::new(1),
            }),
        }
    }

    /// Registration tables this bus routes with.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Merge named dependencies; later entries override earlier ones.
    pub fn add_dependencies(&self, deps: Dependencies) {
        self.inner.deps.write().merge(deps);
    }

    /// Replace the publisher used by [`Context::publish`].
    pub fn set_publisher(&self, publisher: Arc<dyn Publish>) {
        self.add_dependencies(Dependencies::new().with_publisher(publisher));
    }

    /// Context for one dispatch, with a snapshot of the current dependencies.
    pub fn context(&self) -> Context {
        Context::new(self.clone(), self.inner.deps.read().clone())
    }

    /// Run the handler registered for `C`.
    pub async fn dispatch<C: Command>(&self, command: C) -> Result<(), CoreError> {
        let envelope = Envelope::of(&command)?;
        self.dispatch_envelope(&envelope).await
    }

    /// Run the handler registered for the envelope's routing name.
    ///
    /// Fails with [`CoreError::UnregisteredCommand`] if there is none. A handler
    /// panic is reported as [`HandlerError::Panicked`].
    #[instrument(level = "debug", skip(self, envelope), fields(command = %envelope.name(), job_id = ?envelope.job_id()))]
    pub async fn dispatch_envelope(&self, envelope: &Envelope) -> Result<(), CoreError> {
        let handler = self
            .inner
            .registry
            .handler(envelope.name())
            .cloned()
            .ok_or_else(|| CoreError::UnregisteredCommand(envelope.name().to_string()))?;

        let ctx = self.context();
        debug!(handler = handler.name(), "dispatching command");
        AssertUnwindSafe(handler.call(envelope, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic))))
            .map_err(CoreError::Handler)
    }

    /// Deliver an event to waiters and listeners of this process.
    pub async fn publish_local<E: Event>(&self, event: &E) -> Result<(), HandlerError> {
        let envelope = Envelope::of(event).map_err(HandlerError::failed)?;
        self.publish_local_envelope(&envelope).await
    }

    /// Deliver an event envelope to waiters and listeners.
    ///
    /// Every listener runs even if another one fails; failures are logged and
    /// the first one is returned so a consuming broker can apply its policy.
    #[instrument(level = "debug", skip(self, envelope), fields(event = %envelope.name(), job_id = ?envelope.job_id()))]
    pub async fn publish_local_envelope(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self.resolve_waiters(envelope);

        let listeners = self.inner.registry.listeners(envelope.name());
        if listeners.is_empty() {
            trace!("no listeners");
            return Ok(());
        }

        let ctx = self.context();
        let runs = listeners.iter().map(|listener| {
            let ctx = &ctx;
            async move {
                let res = AssertUnwindSafe(listener.call(envelope, ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic))));
                if let Err(e) = &res {
                    warn!(listener = listener.name(), error = %e, "listener failed");
                }
                res
            }
        });

        join_all(runs).await.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    /// Register a waiter for the first `E` matching `predicate`.
    ///
    /// The waiter is live as soon as this returns, so an event published after
    /// this call and before [`Waiter::wait`] is not missed.
    pub fn waiter<E, F>(&self, predicate: F) -> Waiter<E>
    where
        E: Event,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let id = self.inner.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let matches: Matcher = Box::new(move |envelope: &Envelope| {
            envelope
                .decode::<E>()
                .map(|event| predicate(&event))
                .unwrap_or(false)
        });

        self.inner
            .waiters
            .lock()
            .entry(E::NAME)
            .or_default()
            .push(WaiterSlot { id, matches, tx });

        Waiter::new(self.clone(), id, rx)
    }

    /// Wait up to `timeout` for the first `E` matching `predicate`.
    ///
    /// `None` on timeout.
    pub async fn wait_for<E, F>(&self, predicate: F, timeout: Duration) -> Option<E>
    where
        E: Event,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.waiter(predicate).wait(timeout).await
    }

    /// Number of registered, unresolved waiters for `name`.
    pub fn pending_waiters(&self, name: &str) -> usize {
        self.inner.waiters.lock().get(name).map_or(0, Vec::len)
    }

    fn resolve_waiters(&self, envelope: &Envelope) {
        let mut waiters = self.inner.waiters.lock();
        let Some(slots) = waiters.get_mut(envelope.name()) else {
            return;
        };

        let mut i = 0;
        while i < slots.len() {
            if (slots[i].matches)(envelope) {
                let slot = slots.swap_remove(i);
                let _ = slot.tx.send(envelope.clone());
                trace!(waiter = slot.id, "waiter resolved");
            } else {
                i += 1;
            }
        }
        if slots.is_empty() {
            waiters.remove(envelope.name());
        }
    }

    pub(crate) fn remove_waiter(&self, name: &'static str, id: u64) {
        let mut waiters = self.inner.waiters.lock();
        if let Some(slots) = waiters.get_mut(name) {
            slots.retain(|s| s.id != id);
            if slots.is_empty() {
                waiters.remove(name);
            }
        }
    }
}

#[async_trait]
impl Publish for Bus {
    /// Local fallback: commands are dispatched, events delivered in-process.
    async fn publish_envelope(&self, envelope: Envelope) -> Result<(), CoreError> {
        match envelope.kind() {
            MessageKind::Command => self.dispatch_envelope(&envelope).await,
            MessageKind::Event => {
                // listener failures are already logged
                let _ = self.publish_local_envelope(&envelope).await;
                Ok(())
            }
        }
    }
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
