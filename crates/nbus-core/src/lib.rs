mod entity;
mod error;
mod health;
mod memory;
mod registry;
mod retry;
mod transport;

pub use entity::{Level, NotificationEntity};
pub use error::TransportError;
pub use health::{DEGRADED_LATENCY, HealthStatus};
pub use memory::{MemoryTransport, MemoryTransportConfig};
pub use registry::{
    Decoder, GenericNotification, IdentityDecoder, Resolved, TypeRegistry, TypeRegistryBuilder,
    UpdateableConfig,
};
pub use retry::RetryPolicy;
pub use transport::{ReceiveStream, Transport};
