use async_trait::async_trait;

use crate::pool::{PoolError, ResourcePool};

/// Rebuilds a retired resource.
///
/// Called once per retirement on a background task. Implementations are
/// expected to build a replacement and hand it back with [`ResourcePool::add`];
/// returning an error gives up the slot.
#[async_trait]
pub trait Recovery<R: Send + 'static>: Send + Sync + 'static {
    async fn on_removal(
        &self,
        pool: ResourcePool<R>,
        resource: R,
        reason: String,
    ) -> Result<(), PoolError>;
}
