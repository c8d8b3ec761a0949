use std::{marker::PhantomData, time::Duration};

use reel_model::Event;
use tokio::sync::oneshot;

use crate::{bus::Bus, envelope::Envelope};

/// Pending correlation wait for one event of type `E`.
///
/// Dropping the waiter unregisters it.
pub struct Waiter<E: Event> {
    bus: Bus,
    id: u64,
    rx: oneshot::Receiver<Envelope>,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event> Waiter<E> {
    pub(super) fn new(bus: Bus, id: u64, rx: oneshot::Receiver<Envelope>) -> Self {
        Self {
            bus,
            id,
            rx,
            _event: PhantomData,
        }
    }

    /// Resolve to the matching event, or `None` once `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Option<E> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(envelope)) => envelope.decode::<E>().ok(),
            _ => None,
        }
    }
}

impl<E: Event> Drop for Waiter<E> {
    fn drop(&mut self) {
        self.bus.remove_waiter(E::NAME, self.id);
    }
}
