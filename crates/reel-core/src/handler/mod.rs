//! Handler and listener contracts used by the bus.
//!
//! Commands go to exactly one [`Handler`]; events go to every [`Listener`]
//! registered for their type. Both receive a [`Context`] carrying the
//! dependencies injected at startup.
mod error;
pub use error::HandlerError;

mod context;
pub use context::{Context, Dependencies, Publish};

use async_trait::async_trait;
use reel_model::{Command, Event};

/// Single handler for a command type.
#[async_trait]
pub trait Handler<C: Command>: Send + Sync + 'static {
    /// Handle one command.
    ///
    /// An `Err` is resolved by the consume policy of `C` when the command
    /// came from the broker, and returned to the caller of `dispatch` otherwise.
    async fn handle(&self, command: C, ctx: &Context) -> Result<(), HandlerError>;

    /// Handler name used in logs and diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// One of many listeners for an event type.
#[async_trait]
pub trait Listener<E: Event>: Send + Sync + 'static {
    async fn on_event(&self, event: &E, ctx: &Context) -> Result<(), HandlerError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
