//! Event system for conductor
//!
//! Everything the host observes about agents and orchestration runs flows
//! through an [`EventBus`] as [`ConductorEvent`]s.

pub mod bus;
pub mod memory;
pub mod types;

pub use bus::{EventBus, EventSeq};
pub use memory::MemoryEventBus;
pub use types::ConductorEvent;
