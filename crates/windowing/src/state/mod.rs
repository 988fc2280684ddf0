//! Key-value state backends
//!
//! - [`StateBackend`]: the byte-oriented key-value interface
//! - [`MemoryStateBackend`]: `DashMap`-backed, not durable
//! - [`SledStateBackend`]: persistent, on local disk

pub mod backend;
pub mod memory;
pub mod sled_backend;

pub use backend::StateBackend;
pub use memory::{MemoryBackendStats, MemoryStateBackend};
pub use sled_backend::{SledConfig, SledStateBackend};
