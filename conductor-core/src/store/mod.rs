//! Key/blob storage and persisted snapshots
//!
//! The engine never touches a storage technology directly: everything durable
//! goes through an injected [`KeyValueStore`].

pub mod file;
pub mod memory;
pub mod snapshot;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use snapshot::{
    AgentRecord, PersistedSnapshot, SnapshotScheduler, SnapshotSource, SnapshotStore,
};
pub use traits::{KeyValueStore, get_json, put_json};
