//! # wfsm-storage
//!
//! Storage backends for wfsm.
//!
//! This crate provides:
//! - [`FileStore`], a durable [`EntityStore`](wfsm_core::EntityStore) keeping
//!   one checksummed JSON document per entity
//! - A re-export of the in-memory [`MemoryStore`]

pub mod error;
pub mod file;

pub use error::StorageError;
pub use file::{EntityMeta, FileStore, FileStoreConfig};
pub use wfsm_core::MemoryStore;
