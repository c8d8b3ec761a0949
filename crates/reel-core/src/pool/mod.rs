//! Exclusive checkout of a small set of expensive, crash-prone resources.
//!
//! Each resource is idle, busy (held by exactly one [`Checkout`]) or being
//! recovered. `idle + busy + recovering == capacity` holds at every point
//! where the state lock is released; a retired resource is handed to the
//! [`Recovery`] callback, which is expected to [`ResourcePool::add`] a
//! replacement.
mod error;
pub use error::PoolError;

mod guard;
pub use guard::Checkout;

mod recovery;
pub use recovery::Recovery;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::Semaphore};
use tracing::{debug, error, info, warn};

use crate::{
    bus::panic_message,
    metrics::{MetricsHandle, noop_metrics},
};

/// Stable identifier of a pooled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub idle: usize,
    pub busy: usize,
    pub recovering: usize,
}

struct PoolState<R> {
    idle: VecDeque<(ResourceId, R)>,
    busy: HashSet<ResourceId>,
    /// Busy resources reported lost; retired on release.
    lost: HashMap<ResourceId, String>,
    recovering: usize,
    capacity: usize,
    next_id: u64,
}

struct PoolInner<R: Send + 'static> {
    state: Mutex<PoolState<R>>,
    /// One permit per idle resource.
    available: Semaphore,
    recovery: Option<Arc<dyn Recovery<R>>>,
    metrics: MetricsHandle,
}

/// Shared handle to a resource pool. Cheap to clone.
pub struct ResourcePool<R: Send + 'static> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Send + 'static> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`ResourcePool`].
pub struct PoolBuilder<R: Send + 'static> {
    recovery: Option<Arc<dyn Recovery<R>>>,
    metrics: MetricsHandle,
}

impl<R: Send + 'static> PoolBuilder<R> {
    /// Rebuild retired resources with `recovery` instead of shrinking the pool.
    pub fn recovery(mut self, recovery: impl Recovery<R>) -> Self {
        self.recovery = Some(Arc::new(recovery));
        self
    }

    /// Report resource failures to `metrics`.
    pub fn metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Empty pool; populate it with [`ResourcePool::add`].
    pub fn build(self) -> ResourcePool<R> {
        ResourcePool {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    busy: HashSet::new(),
                    lost: HashMap::new(),
                    recovering: 0,
                    capacity: 0,
                    next_id: 0,
                }),
                available: Semaphore::new(0),
                recovery: self.recovery,
                metrics: self.metrics,
            }),
        }
    }
}

impl<R: Send + 'static> Default for ResourcePool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Empty pool without recovery; retired resources shrink its capacity.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PoolBuilder<R> {
        PoolBuilder {
            recovery: None,
            metrics: noop_metrics(),
        }
    }

    /// Admit an idle resource.
    ///
    /// Fills an in-flight recovery slot if there is one, otherwise grows capacity by one.
    pub fn add(&self, resource: R) -> ResourceId {
        let id = {
            let mut st = self.inner.state.lock();
            st.next_id += 1;
            let id = ResourceId(st.next_id);
            if st.recovering > 0 {
                st.recovering -= 1;
            } else {
                st.capacity += 1;
            }
            st.idle.push_back((id, resource));
            id
        };
        self.inner.available.add_permits(1);
        debug!(resource = %id, "resource added");
        id
    }

    /// Wait for an idle resource and hold it exclusively.
    ///
    /// Waiters are served in FIFO order. Fails only once the pool is closed.
    pub async fn checkout(&self) -> Result<Checkout<R>, PoolError> {
        loop {
            let permit = self
                .inner
                .available
                .acquire()
                .await
                .map_err(|_| PoolError::Closed)?;
            permit.forget();

            let mut st = self.inner.state.lock();
            // A permit can outlive its resource when an idle one was reported lost.
            if let Some((id, resource)) = st.idle.pop_front() {
                st.busy.insert(id);
                drop(st);
                debug!(resource = %id, "resource checked out");
                return Ok(Checkout::new(self.clone(), id, resource));
            }
        }
    }

    /// Run `op` against a checked-out resource.
    ///
    /// An `Err` from `op` retires the resource before the error is returned;
    /// `Ok` releases it back to the idle set.
    pub async fn with_resource<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: for<'r> FnOnce(&'r mut R) -> BoxFuture<'r, Result<T, E>>,
        E: From<PoolError> + fmt::Display,
    {
        let mut checkout = self.checkout().await?;
        let result = op(&mut *checkout).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                checkout.retire(e.to_string());
                Err(e)
            }
        }
    }

    /// Report a resource as gone outside of any operation on it.
    ///
    /// An idle resource is retired at once; a busy one when its checkout ends.
    pub fn report_lost(&self, id: ResourceId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut st = self.inner.state.lock();

        if st.busy.contains(&id) {
            warn!(resource = %id, %reason, "busy resource lost; retiring on release");
            st.lost.insert(id, reason);
            return;
        }

        let Some(pos) = st.idle.iter().position(|(rid, _)| *rid == id) else {
            debug!(resource = %id, "lost report for unknown resource");
            return;
        };
        let Some((_, resource)) = st.idle.remove(pos) else {
            return;
        };
        // Keep permits == idle; a concurrent checkout may already hold this one.
        if let Ok(permit) = self.inner.available.try_acquire() {
            permit.forget();
        }
        st.busy.insert(id);
        drop(st);

        self.retire(id, resource, reason);
    }

    /// Stop serving checkouts; pending and future [`checkout`](Self::checkout) calls fail.
    pub fn close(&self) {
        self.inner.available.close();
    }

    /// All counters read under one lock.
    pub fn snapshot(&self) -> PoolSnapshot {
        let st = self.inner.state.lock();
        PoolSnapshot {
            capacity: st.capacity,
            idle: st.idle.len(),
            busy: st.busy.len(),
            recovering: st.recovering,
        }
    }

    /// Resources the pool owns, counting those being recovered.
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Resources ready for checkout.
    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Resources held by a [`Checkout`].
    pub fn busy(&self) -> usize {
        self.inner.state.lock().busy.len()
    }

    /// Retired resources whose replacement has not been added yet.
    pub fn recovering(&self) -> usize {
        self.inner.state.lock().recovering
    }

    pub(crate) fn release(&self, id: ResourceId, resource: R) {
        let mut st = self.inner.state.lock();
        if let Some(reason) = st.lost.remove(&id) {
            drop(st);
            self.retire(id, resource, reason);
            return;
        }
        st.busy.remove(&id);
        st.idle.push_back((id, resource));
        drop(st);
        self.inner.available.add_permits(1);
        debug!(resource = %id, "resource released");
    }

    pub(crate) fn retire(&self, id: ResourceId, resource: R, reason: String) {
        self.inner.metrics.record_resource_failure();
        let recovery = self.inner.recovery.clone();
        {
            let mut st = self.inner.state.lock();
            st.busy.remove(&id);
            st.lost.remove(&id);
            match recovery {
                Some(_) => st.recovering += 1,
                None => st.capacity = st.capacity.saturating_sub(1),
            }
        }

        let Some(recovery) = recovery else {
            warn!(resource = %id, %reason, "resource retired without recovery; capacity reduced");
            return;
        };
        warn!(resource = %id, %reason, "resource retired; recovering");

        let Ok(handle) = Handle::try_current() else {
            self.give_up_recovery(id, "no runtime to run recovery on");
            return;
        };
        let pool = self.clone();
        handle.spawn(async move {
            let res = AssertUnwindSafe(recovery.on_removal(pool.clone(), resource, reason))
                .catch_unwind()
                .await;
            match res {
                Ok(Ok(())) => info!(resource = %id, "resource recovery finished"),
                Ok(Err(e)) => pool.give_up_recovery(id, &e.to_string()),
                Err(panic) => {
                    let reason = format!("recovery panicked: {}", panic_message(panic));
                    pool.give_up_recovery(id, &reason);
                }
            }
        });
    }

    fn give_up_recovery(&self, id: ResourceId, reason: &str) {
        let capacity = {
            let mut st = self.inner.state.lock();
            st.recovering = st.recovering.saturating_sub(1);
            st.capacity = st.capacity.saturating_sub(1);
            st.capacity
        };
        error!(resource = %id, %reason, capacity, "resource recovery failed; capacity reduced");
    }
}

impl<R: Send + 'static> fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
