//! Message contracts shared by the bus, the broker and the gateway.
//!
//! A message is either a [`Command`] (exactly one handler) or an [`Event`]
//! (any number of listeners). Both are plain serde types addressed by a
//! stable routing name.
use std::fmt;

use serde::{Serialize, de::DeserializeOwned};

use crate::JobId;

/// Dispatch class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Routed to a single handler.
    Command,
    /// Fanned out to every listener.
    Event,
}

impl MessageKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, serializable message with a stable routing name.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Routing name; also the broker routing key.
    const NAME: &'static str;
    /// Whether this is a command or an event.
    const KIND: MessageKind;

    /// Job this message correlates to, if any.
    fn job_id(&self) -> Option<JobId> {
        None
    }
}

/// Instruction with exactly one intended handler.
pub trait Command: Message {}

/// Fact broadcast to zero or more listeners.
pub trait Event: Message {}

/// Implements [`Message`] plus the matching marker trait for a type that has a `job_id` field.
macro_rules! job_message {
    ($ty:ty, $name:literal, $kind:ident) => {
        impl $crate::Message for $ty {
            const NAME: &'static str = $name;
            const KIND: $crate::MessageKind = $crate::MessageKind::$kind;

            fn job_id(&self) -> Option<$crate::JobId> {
                Some(self.job_id)
            }
        }

        impl $crate::$kind for $ty {}
    };
}
pub(crate) use job_message;
