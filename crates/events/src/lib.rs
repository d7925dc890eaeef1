//! Grant-mutation events and the pub/sub plumbing that carries them.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod mutation;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use mutation::GrantMutation;
