//! # OrbitKV Engine
//!
//! An in-process, versioned, transactional key-value engine with an
//! event-driven request model.
//!
//! This crate provides the storage layer OrbitKV adapters talk to:
//!
//! - Named databases with an integer version
//! - Object stores keyed by a key path, optionally generating keys
//! - Secondary indexes, optionally unique
//! - Upgrades: structure changes only while opening at a higher version
//! - Atomic transactions over a fixed set of stores
//! - Snapshot files for carrying data across processes
//!
//! ## Request Model
//!
//! Nothing returns its outcome directly. Every operation yields a request
//! object; callers register success and error handlers on it and the engine
//! fires exactly one of them from its event-loop thread. Handlers may be
//! registered after the outcome is known and still receive it.
//!
//! Opening at a higher version asks existing connections to close. While any
//! stays open, the opener receives a *blocked* event and keeps waiting.
//!
//! ## Example
//!
//! ```rust,no_run
//! use orbitkv_engine::{MemoryEngine, StoreParams, TransactionMode};
//! use serde_json::json;
//!
//! let engine = MemoryEngine::new();
//! let open = engine.open("orbit", 1);
//! open.on_upgrade_needed(|change| change.create_object_store("planet", StoreParams::new("id")));
//! open.on_success(|db| {
//!     let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
//!     txn.object_store("planet").unwrap().add(json!({"id": "p1"})).unwrap();
//!     txn.on_complete(|| println!("stored"));
//!     txn.commit().unwrap();
//! });
//! open.send();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod connection;
mod engine;
mod error;
mod event;
mod key;
mod snapshot;
mod store;
mod transaction;
mod types;
mod upgrade;

pub use connection::DbConnection;
pub use engine::{DeleteRequest, MemoryEngine, OpenRequest, UpgradeHandler, VersionChangeHandler};
pub use error::{EngineError, EngineResult};
pub use event::{EventSlot, Request};
pub use key::Key;
pub use snapshot::{SNAPSHOT_FORMAT, SNAPSHOT_MAGIC};
pub use transaction::{ObjectStore, Transaction};
pub use types::{
    BlockedEvent, ConnectionId, DatabaseInfo, IndexInfo, IndexParams, StoreInfo, StoreParams,
    TransactionId, TransactionMode, VersionChangeEvent,
};
pub use upgrade::VersionChange;
