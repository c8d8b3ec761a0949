pub mod broker;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod pool;
pub mod registry;

pub use broker::{
    Broker, BrokerBuilder, BrokerConfig, BrokerHandle, Delivery, MemoryTransport, PublishOptions,
    Subscription, Transport, TransportError,
};
pub use bus::{Bus, Waiter};
pub use envelope::Envelope;
pub use error::CoreError;
pub use handler::{Context, Dependencies, Handler, HandlerError, Listener, Publish};
pub use metrics::{JobOutcome, MetricsBackend, MetricsHandle, NoOpMetrics, noop_metrics};
pub use pool::{
    Checkout, PoolBuilder, PoolError, PoolSnapshot, Recovery, ResourceId, ResourcePool,
};
pub use registry::{
    ConsumePolicy, ErrorFactory, Outcome, PublishPolicy, Registry, RegistryBuilder,
};

pub mod prelude {
    pub use crate::bus::Bus;
    pub use crate::error::CoreError;
    pub use crate::handler::{Context, Handler, HandlerError, Listener};
    pub use crate::pool::{Checkout, ResourcePool};
    pub use crate::registry::{ConsumePolicy, PublishPolicy, RegistryBuilder};
}
