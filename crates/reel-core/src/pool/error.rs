use thiserror::Error;

use crate::pool::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("resource pool is closed")]
    Closed,

    #[error("resource {resource} failed: {reason}")]
    ResourceFailure { resource: ResourceId, reason: String },

    #[error("resource recovery failed: {0}")]
    RecoveryFailed(String),
}
