//! Distributed state primitives for noderoute
//!
//! [`DistributedStateStore`] offers three independent keyspaces:
//!
//! - **sessions**: last-write-wins values with an optional lifetime
//! - **locks**: non-blocking, owner-checked try-locks with a TTL
//! - **shared data**: plain last-write-wins key/value pairs
//!
//! The store delegates to a [`StateBackend`]. [`MemoryBackend`] keeps
//! everything in one mutex-guarded table set; a networked lock service can
//! implement the same trait without changing callers.

mod backend;
mod store;

pub use backend::{LockRecord, MemoryBackend, StateBackend};
pub use store::DistributedStateStore;
