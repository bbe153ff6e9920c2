//! CLI subprocess management
//!
//! The [`CliProcessManager`] abstraction lets the engine run against real
//! `claude` subprocesses ([`ClaudeProcessManager`]) or scripted ones
//! ([`MockProcessManager`]).

pub mod claude;
pub mod mock;
pub mod stream_json;
pub mod traits;

pub use claude::{ClaudeProcessConfig, ClaudeProcessManager};
pub use mock::{MockProcessManager, MockRun};
pub use traits::{CliProcessManager, ProcessEvent, ProcessHandle, ProcessResult, SpawnRequest};
