//! Startup-time registration tables.
//!
//! Built once with [`RegistryBuilder`], then shared read-only by the bus and
//! the broker: command type → single handler, event type → listeners, plus
//! per-message publish and consume policies.
mod erased;
pub(crate) use erased::{ErasedHandler, ErasedListener};

mod policy;
pub use policy::{ConsumePolicy, ErrorFactory, Outcome, PublishPolicy};

use std::{collections::HashMap, sync::Arc};

use reel_model::{Command, Event, Message, MessageKind};
use tracing::debug;

use crate::{
    error::CoreError,
    handler::{Handler, Listener},
};

/// Builder for a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
    listeners: HashMap<&'static str, Vec<Arc<dyn ErasedListener>>>,
    publish: HashMap<&'static str, PublishPolicy>,
    consume: HashMap<&'static str, ConsumePolicy>,
    kinds: HashMap<&'static str, MessageKind>,
}

impl RegistryBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for command `C`.
    ///
    /// Fails with [`CoreError::DuplicateHandler`] if `C` already has one.
    pub fn handler<C, H>(&mut self, handler: H) -> Result<&mut Self, CoreError>
    where
        C: Command,
        H: Handler<C>,
    {
        if self.handlers.contains_key(C::NAME) {
            return Err(CoreError::DuplicateHandler(C::NAME));
        }
        debug!(command = C::NAME, handler = handler.name(), "handler registered");
        self.kinds.insert(C::NAME, MessageKind::Command);
        self.handlers.insert(C::NAME, erased::handler(handler));
        Ok(self)
    }

    /// Add a listener for event `E`. Any number of listeners may share an event.
    pub fn listener<E, L>(&mut self, listener: L) -> &mut Self
    where
        E: Event,
        L: Listener<E>,
    {
        debug!(event = E::NAME, listener = listener.name(), "listener registered");
        self.kinds.insert(E::NAME, MessageKind::Event);
        self.listeners
            .entry(E::NAME)
            .or_default()
            .push(erased::listener(listener));
        self
    }

    /// Set the durable-publish policy (TTL, dead-letter event) of `M`.
    pub fn publish_policy<M: Message>(&mut self, policy: PublishPolicy) -> &mut Self {
        self.kinds.insert(M::NAME, M::KIND);
        self.publish.insert(M::NAME, policy);
        self
    }

    /// Set the failure policy applied when a consumed `M` fails.
    pub fn consume_policy<M: Message>(&mut self, policy: ConsumePolicy) -> &mut Self {
        self.kinds.insert(M::NAME, M::KIND);
        self.consume.insert(M::NAME, policy);
        self
    }

    /// Make `M` known without attaching anything to it.
    pub fn declare<M: Message>(&mut self) -> &mut Self {
        self.kinds.insert(M::NAME, M::KIND);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                handlers: self.handlers,
                listeners: self.listeners,
                publish: self.publish,
                consume: self.consume,
                kinds: self.kinds,
            }),
        }
    }
}

struct RegistryInner {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
    listeners: HashMap<&'static str, Vec<Arc<dyn ErasedListener>>>,
    publish: HashMap<&'static str, PublishPolicy>,
    consume: HashMap<&'static str, ConsumePolicy>,
    kinds: HashMap<&'static str, MessageKind>,
}

/// Read-only registration tables. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn handler(&self, name: &str) -> Option<&Arc<dyn ErasedHandler>> {
        self.inner.handlers.get(name)
    }

    pub(crate) fn listeners(&self, name: &str) -> &[Arc<dyn ErasedListener>] {
        self.inner
            .listeners
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a handler is registered for command `name`.
    pub fn has_handler(&self, name: &str) -> bool {
        self.inner.handlers.contains_key(name)
    }

    /// Number of listeners subscribed to event `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners(name).len()
    }

    /// Kind of a registered or declared message name.
    pub fn kind_of(&self, name: &str) -> Option<MessageKind> {
        self.inner.kinds.get(name).copied()
    }

    /// Publish policy of `name`; the default (no TTL) when none was set.
    pub fn publish_policy(&self, name: &str) -> PublishPolicy {
        self.inner.publish.get(name).cloned().unwrap_or_default()
    }

    /// Consume policy of `name`; the default (log and acknowledge) when none was set.
    pub fn consume_policy(&self, name: &str) -> ConsumePolicy {
        self.inner.consume.get(name).cloned().unwrap_or_default()
    }

    /// Fail with [`CoreError::UnregisteredCommand`] for the first name without a handler.
    pub fn ensure_handlers<'a>(
        &self,
        commands: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), CoreError> {
        for name in commands {
            if !self.has_handler(name) {
                return Err(CoreError::UnregisteredCommand(name.to_string()));
            }
        }
        Ok(())
    }
}
