//! Agent lifecycle
//!
//! - [`AgentLifecycleState`] and its derived predicates
//! - [`LifecycleEvent`] inputs and the [`AgentLifecycleContext`] guards
//! - The pure transition table ([`resolve`]) returning [`LifecycleEffect`]s as data
//! - [`AgentLifecycleStateMachine`], the single owner of every agent's state

pub mod event;
pub mod machine;
pub mod state;

pub use event::{AgentLifecycleContext, LifecycleEffect, LifecycleEvent};
pub use machine::{AgentLifecycleStateMachine, Rejection, TableEntry, TransitionOutcome, resolve};
pub use state::AgentLifecycleState;
