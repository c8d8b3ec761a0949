mod backoff;
pub use backoff::BackoffStrategy;
