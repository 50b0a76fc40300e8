//! # Storage Engines
//!
//! Two interchangeable implementations of [`StorageEngine`]: a fixed-bucket
//! hash table ([`HashEngine`]) and a red-black tree ([`RbTreeEngine`]). Both
//! share the same dispatcher/TTL manager machinery so that expiry behaves
//! identically regardless of which one a caller picks.

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod hash;
pub mod rbtree;
pub mod ttl_manager;

pub use dispatcher::Dispatcher;
pub use engine::{Entry, EngineId, StorageEngine};
pub use hash::HashEngine;
pub use rbtree::RbTreeEngine;
pub use ttl_manager::TtlManager;
