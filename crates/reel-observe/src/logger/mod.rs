mod config;
mod error;
mod layers;
mod object;

pub use config::LoggerConfig;
pub use error::{LoggerError, LoggerResult};
pub use object::{LoggerFormat, LoggerLevel, LoggerTimeZone, init_local_offset};

/// Install the global tracing subscriber described by `cfg`.
///
/// Call once at startup. With [`LoggerTimeZone::Local`], call
/// [`init_local_offset`] first, before any thread is spawned.
pub fn init_logger(cfg: &LoggerConfig) -> LoggerResult<()> {
    match cfg.format {
        LoggerFormat::Text => layers::init_text(cfg),
        LoggerFormat::Json => layers::init_json(cfg),
        LoggerFormat::Journald => layers::init_journald(cfg),
    }
}
