use std::{fmt, sync::Arc, time::Duration};

use reel_model::{Event, Message};

use crate::{envelope::Envelope, handler::HandlerError};

/// Durable-publish settings of one message type.
#[derive(Clone, Debug, Default)]
pub struct PublishPolicy {
    /// Time a published message may wait unconsumed.
    pub ttl: Option<Duration>,
    /// Routing name of the event published with the original payload on expiry.
    pub dead_event: Option<&'static str>,
}

impl PublishPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Publish `E` with the expired message's payload when the TTL runs out.
    pub fn dead_letter<E: Event>(mut self) -> Self {
        self.dead_event = Some(E::NAME);
        self
    }
}

/// Builds the derived error event for a failed consumed message.
pub type ErrorFactory = Arc<dyn Fn(&HandlerError, &Envelope) -> Option<Envelope> + Send + Sync>;

/// Failure handling for one consumed message type.
#[derive(Clone, Default)]
pub struct ConsumePolicy {
    pub error_factory: Option<ErrorFactory>,
    /// Return the message to the broker instead of acknowledging it.
    pub requeue: bool,
    /// Treat a normal completion as a failure.
    pub raise_on_ok: bool,
}

/// What the broker does with a consumed message after its handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledge.
    Ok,
    /// Return for redelivery; no error event on this attempt.
    Retryable(HandlerError),
    /// Acknowledge, publishing the derived error event if the policy has one.
    Terminal(HandlerError),
}

impl ConsumePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive an error event `E` from a failed `M`.
    ///
    /// The closure may return `None` to skip the event for this failure.
    pub fn on_error<M, E, F>(mut self, factory: F) -> Self
    where
        M: Message,
        E: Event,
        F: Fn(&HandlerError, M) -> Option<E> + Send + Sync + 'static,
    {
        self.error_factory = Some(Arc::new(move |err: &HandlerError, envelope: &Envelope| {
            let message = envelope.decode::<M>().ok()?;
            let event = factory(err, message)?;
            Envelope::of(&event).ok()
        }));
        self
    }

    pub fn requeue(mut self, requeue: bool) -> Self {
        self.requeue = requeue;
        self
    }

    pub fn raise_on_ok(mut self, raise_on_ok: bool) -> Self {
        self.raise_on_ok = raise_on_ok;
        self
    }

    /// Map a handler result onto an [`Outcome`].
    pub fn classify(&self, result: Result<(), HandlerError>) -> Outcome {
        let err = match result {
            Ok(()) if !self.raise_on_ok => return Outcome::Ok,
            Ok(()) => HandlerError::NegativeOutcome,
            Err(e) => e,
        };
        if self.requeue {
            Outcome::Retryable(err)
        } else {
            Outcome::Terminal(err)
        }
    }

    /// Derived error event for `err`, if the policy defines one.
    pub fn error_event(&self, err: &HandlerError, envelope: &Envelope) -> Option<Envelope> {
        self.error_factory.as_ref().and_then(|f| f(err, envelope))
    }
}

impl fmt::Debug for ConsumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumePolicy")
            .field("error_factory", &self.error_factory.is_some())
            .field("requeue", &self.requeue)
            .field("raise_on_ok", &self.raise_on_ok)
            .finish()
    }
}
