use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use reel_model::{Command, Event};

use crate::{
    envelope::Envelope,
    handler::{Context, Handler, HandlerError, Listener},
};

/// Type-erased command handler stored in the registry.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn call(&self, envelope: &Envelope, ctx: &Context) -> Result<(), HandlerError>;
    fn name(&self) -> &'static str;
}

/// Type-erased event listener stored in the registry.
#[async_trait]
pub(crate) trait ErasedListener: Send + Sync {
    async fn call(&self, envelope: &Envelope, ctx: &Context) -> Result<(), HandlerError>;
    fn name(&self) -> &'static str;
}

struct TypedHandler<C, H> {
    inner: H,
    _command: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C, H> ErasedHandler for TypedHandler<C, H>
where
    C: Command,
    H: Handler<C>,
{
    async fn call(&self, envelope: &Envelope, ctx: &Context) -> Result<(), HandlerError> {
        let command = envelope
            .decode::<C>()
            .map_err(|e| HandlerError::failed(format!("decode {}: {e}", C::NAME)))?;
        self.inner.handle(command, ctx).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

struct TypedListener<E, L> {
    inner: L,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, L> ErasedListener for TypedListener<E, L>
where
    E: Event,
    L: Listener<E>,
{
    async fn call(&self, envelope: &Envelope, ctx: &Context) -> Result<(), HandlerError> {
        let event = envelope
            .decode::<E>()
            .map_err(|e| HandlerError::failed(format!("decode {}: {e}", E::NAME)))?;
        self.inner.on_event(&event, ctx).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

pub(super) fn handler<C: Command, H: Handler<C>>(inner: H) -> Arc<dyn ErasedHandler> {
    Arc::new(TypedHandler {
        inner,
        _command: PhantomData,
    })
}

pub(super) fn listener<E: Event, L: Listener<E>>(inner: L) -> Arc<dyn ErasedListener> {
    Arc::new(TypedListener {
        inner,
        _event: PhantomData,
    })
}
