//! `sweep-events`: internal event bus that triggers durable functions.
//!
//! Events carry a name and a JSON payload. A durable function declares the
//! event name it responds to; the bus only distributes, it never persists.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod names;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
