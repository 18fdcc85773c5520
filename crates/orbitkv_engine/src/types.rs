//! Core type definitions for the engine.

use std::fmt;

/// Identifier of one open connection.
///
/// Connection IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a new connection ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Identifier of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("readonly"),
            Self::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// Delivered to open connections when another opener needs a newer version
/// or wants to delete the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// Version of the connection receiving the event.
    pub old_version: u32,
    /// Requested version, or `None` when the database is being deleted.
    pub new_version: Option<u32>,
}

/// Delivered to an open or delete request that must wait for other
/// connections to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedEvent {
    /// Version currently stored.
    pub old_version: u32,
    /// Requested version, or `None` for a delete.
    pub new_version: Option<u32>,
}

/// Parameters for creating an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreParams {
    /// Dotted path of the primary key inside each value.
    pub key_path: String,
    /// Whether missing keys are generated by the store.
    pub auto_increment: bool,
}

impl StoreParams {
    /// Creates parameters for a store keyed by `key_path`.
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            auto_increment: false,
        }
    }

    /// Sets whether keys are generated.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// Parameters for creating an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParams {
    /// Dotted path of the indexed value inside each record.
    pub key_path: String,
    /// Whether two records may share an indexed value.
    pub unique: bool,
}

impl IndexParams {
    /// Creates parameters for a non-unique index on `key_path`.
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Sets uniqueness.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }
}

/// Description of one index, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed key path.
    pub key_path: String,
    /// Uniqueness flag.
    pub unique: bool,
}

/// Description of one object store, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Store name.
    pub name: String,
    /// Primary key path.
    pub key_path: String,
    /// Whether keys are generated.
    pub auto_increment: bool,
    /// Indexes in name order.
    pub indexes: Vec<IndexInfo>,
    /// Number of stored records.
    pub record_count: usize,
}

/// Description of one database, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Stored version.
    pub version: u32,
    /// Object stores in name order.
    pub stores: Vec<StoreInfo>,
}
