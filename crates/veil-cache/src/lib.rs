//! Veil Cache - namespaced, expiring registries of encrypted entries
//!
//! Entries bind a [`CacheKey`] to a [`veil_store::ChunkStore`]. Registries
//! are looked up through [`CacheRegistries`], which also owns the shared
//! cipher pool and the background maintenance worker.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod maintenance;
pub mod namespace;
pub mod registries;
pub mod registry;
pub mod strategy;

pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use key::CacheKey;
pub use maintenance::{MaintenanceFailure, MaintenanceTask, MaintenanceTicket};
pub use namespace::Namespace;
pub use registries::CacheRegistries;
pub use registry::CacheRegistry;
pub use strategy::StorageMode;
