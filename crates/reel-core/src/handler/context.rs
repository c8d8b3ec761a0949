use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use reel_model::Message;

use crate::{bus::Bus, envelope::Envelope, error::CoreError, handler::HandlerError};

/// Outbound publishing capability injected into handlers.
///
/// The bus publishes locally by default; a broker replaces it with a durable publish.
#[async_trait]
pub trait Publish: Send + Sync + 'static {
    async fn publish_envelope(&self, envelope: Envelope) -> Result<(), CoreError>;
}

/// Named dependencies shared with every handler and listener.
///
/// Populated once at startup; [`Dependencies::merge`] lets later entries
/// override earlier ones with the same name.
#[derive(Clone, Default)]
pub struct Dependencies {
    publisher: Option<Arc<dyn Publish>>,
    named: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named dependency and return updated set.
    pub fn with<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: Arc<T>) -> Self {
        self.insert(name, value);
        self
    }

    /// Replace the outbound publisher and return updated set.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publish>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: Arc<T>) {
        self.named.insert(name.into(), value);
    }

    /// Merge `other` into `self`; entries from `other` win.
    pub fn merge(&mut self, other: Dependencies) {
        if other.publisher.is_some() {
            self.publisher = other.publisher;
        }
        self.named.extend(other.named);
    }

    /// Typed lookup by name. `None` if missing or of another type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.named
            .get(name)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn publisher(&self) -> Option<&Arc<dyn Publish>> {
        self.publisher.as_ref()
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Dependencies")
            .field("publisher", &self.publisher.as_ref().map(|_| "<handle>"))
            .field("named", &names)
            .finish()
    }
}

/// Per-dispatch view handed to handlers and listeners.
#[derive(Clone)]
pub struct Context {
    bus: Bus,
    deps: Dependencies,
}

impl Context {
    pub(crate) fn new(bus: Bus, deps: Dependencies) -> Self {
        Self { bus, deps }
    }

    /// The bus that dispatched the current message; use it for `wait_for`.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    /// Typed dependency lookup.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.deps.get(name)
    }

    /// Like [`Context::get`], failing the handler when the dependency is absent.
    pub fn require<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, HandlerError> {
        self.get(name)
            .ok_or_else(|| HandlerError::Failed(format!("missing dependency: {name}")))
    }

    /// Publish through the injected publisher, or locally if none was injected.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), CoreError> {
        let envelope = Envelope::of(message)?;
        match self.deps.publisher() {
            Some(publisher) => publisher.publish_envelope(envelope).await,
            None => self.bus.publish_envelope(envelope).await,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("deps", &self.deps).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Faceit(&'static str);

    #[test]
    fn typed_lookup_by_name() {
        let deps = Dependencies::new()
            .with("faceit", Arc::new(Faceit("key")))
            .with("upload_url", Arc::new(String::from("https://u.example")));

        assert_eq!(deps.get::<Faceit>("faceit").unwrap().0, "key");
        assert_eq!(deps.get::<String>("upload_url").unwrap().as_str(), "https://u.example");
        assert!(deps.get::<String>("faceit").is_none());
        assert!(deps.get::<Faceit>("steam").is_none());
    }

    #[test]
    fn merge_overrides_same_name() {
        let mut deps = Dependencies::new().with("token", Arc::new(1u32));
        deps.merge(Dependencies::new().with("token", Arc::new(2u32)));

        assert_eq!(*deps.get::<u32>("token").unwrap(), 2);
        assert_eq!(deps.len(), 1);
    }
}
