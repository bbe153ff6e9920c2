//! Suspension and resumption across restarts
//!
//! A [`ResumeContext`] is written whenever an agent is suspended (blocked on
//! the user, or the host shutting down) and deleted once the agent runs again.

pub mod context;
pub mod manager;

pub use context::{
    InteractionKind, InteractionResponse, PendingInteraction, ResumeContext, SuspensionReason,
};
pub use manager::SuspensionManager;
