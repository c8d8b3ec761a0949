use std::ops::{Deref, DerefMut};

use crate::pool::{PoolError, ResourceId, ResourcePool};

/// Exclusive hold on one pooled resource.
///
/// Dropping the guard returns the resource to the idle set, unless it was
/// reported lost while busy. [`Checkout::retire`] removes it for recovery.
pub struct Checkout<R: Send + 'static> {
    pool: ResourcePool<R>,
    id: ResourceId,
    resource: Option<R>,
}

impl<R: Send + 'static> Checkout<R> {
    pub(super) fn new(pool: ResourcePool<R>, id: ResourceId, resource: R) -> Self {
        Self {
            pool,
            id,
            resource: Some(resource),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Mark the resource dead and hand it to the recovery callback.
    ///
    /// Returns the matching [`PoolError::ResourceFailure`] for the caller to propagate.
    pub fn retire(mut self, reason: impl Into<String>) -> PoolError {
        let reason = reason.into();
        if let Some(resource) = self.resource.take() {
            self.pool.retire(self.id, resource, reason.clone());
        }
        PoolError::ResourceFailure {
            resource: self.id,
            reason,
        }
    }
}

impl<R: Send + 'static> Deref for Checkout<R> {
    type Target = R;

    fn deref(&self) -> &R {
        // Only `retire` and `drop` take the resource, both consume the guard.
        self.resource.as_ref().unwrap_or_else(|| unreachable!("checkout already released"))
    }
}

impl<R: Send + 'static> DerefMut for Checkout<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().unwrap_or_else(|| unreachable!("checkout already released"))
    }
}

impl<R: Send + 'static> Drop for Checkout<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(self.id, resource);
        }
    }
}
