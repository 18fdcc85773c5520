//! # OrbitKV Core
//!
//! A schema-driven storage adapter over the OrbitKV engine.
//!
//! This crate provides:
//! - [`EngineConnection`]: the connection lifecycle as an explicit state
//!   machine, including blocked opens and version-change closure
//! - Provisioning: a pure [`plan`] from existing structure and schema to
//!   create-collection and create-index actions, [`apply`]d during upgrades
//! - The request bridge: every engine request settles one future exactly
//!   once; writes settle on transaction completion, reads on request success
//! - CRUD and operation dispatch through [`StorageAdapter`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use orbitkv_core::{AdapterConfig, Operation, Schema, StorageAdapter};
//! use orbitkv_engine::MemoryEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::from_json(
//!     r#"{"idField": "id", "models": {"planet": {"attributes": {"name": {"unique": true}}}}}"#,
//! )?;
//! let config = AdapterConfig::new().namespace("solar").version(1);
//! let adapter = StorageAdapter::initialize(MemoryEngine::new(), schema, config).await?;
//!
//! let op: Operation = serde_json::from_str(
//!     r#"{"op": "add", "path": ["planet", "p1"], "value": {"id": "p1", "name": "Jupiter"}}"#,
//! )?;
//! adapter.apply_operation(&op).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod bridge;
mod config;
mod connection;
mod dispatch;
mod error;
mod provision;
mod records;
mod schema;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use adapter::StorageAdapter;
pub use bridge::Pending;
pub use config::{AdapterConfig, BlockedCallback, ReadyCallback, DEFAULT_NAMESPACE, DEFAULT_VERSION};
pub use connection::{ConnectionState, EngineConnection, VersionChangeObserver};
pub use dispatch::{OpKind, Operation, OperationOutcome};
pub use error::{AdapterError, AdapterResult, EngineContext, ErrorKind};
pub use provision::{apply, plan, ProvisionAction, StoreLayout};
pub use schema::{
    is_missing_id, AttributeDescriptor, IdGenerator, LinkDescriptor, LinkKind, ModelDescriptor,
    Record, Schema, UuidGenerator, DEFAULT_ID_FIELD,
};
