//! Job status persistence.
//!
//! This crate provides:
//! - The `StatusStore` contract used by the orchestrator and query paths
//! - A Redis implementation with per-write expiry
//! - An in-process implementation for tests and local runs

pub mod config;
pub mod error;
pub mod redis_store;
pub mod store;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use redis_store::RedisStatusStore;
pub use store::{MemoryStatusStore, StatusStore};
