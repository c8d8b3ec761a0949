//! Logging setup for reel processes and, with the `listener` feature, a bus
//! listener that turns job lifecycle events into log lines.
mod logger;
pub use logger::*;

#[cfg(feature = "listener")]
mod listener;
#[cfg(feature = "listener")]
pub use listener::JobLogListener;
