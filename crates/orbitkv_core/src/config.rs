//! Adapter configuration.

use crate::error::{AdapterError, AdapterResult};
use std::fmt;
use std::sync::Arc;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "orbit";

/// Schema version used when none is configured.
pub const DEFAULT_VERSION: u32 = 1;

/// Callback invoked once the adapter is usable.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Callback invoked when an open or delete is blocked by older connections.
pub type BlockedCallback = Arc<dyn Fn(&AdapterError) + Send + Sync + 'static>;

/// Configuration for initializing a [`StorageAdapter`](crate::StorageAdapter).
#[derive(Clone)]
pub struct AdapterConfig {
    /// Database name.
    pub namespace: String,

    /// Schema version to open at. Provisioning runs when it exceeds the stored version.
    pub version: u32,

    /// Whether record collections generate missing identifiers.
    pub auto_increment: bool,

    /// Invoked once, after the first successful open.
    pub on_ready: Option<ReadyCallback>,

    /// Invoked with a [`AdapterError::ConnectionBlocked`] while an open waits.
    pub on_blocked: Option<BlockedCallback>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: DEFAULT_VERSION,
            auto_increment: false,
            on_ready: None,
            on_blocked: None,
        }
    }
}

impl AdapterConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets whether identifiers are generated by the engine.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Sets the ready callback.
    #[must_use]
    pub fn on_ready(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(callback));
        self
    }

    /// Sets the blocked callback.
    #[must_use]
    pub fn on_blocked(mut self, callback: impl Fn(&AdapterError) + Send + Sync + 'static) -> Self {
        self.on_blocked = Some(Arc::new(callback));
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty namespace or a zero version.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.namespace.is_empty() {
            return Err(AdapterError::invalid_argument("namespace must not be empty"));
        }
        if self.version == 0 {
            return Err(AdapterError::invalid_argument("version must be at least 1"));
        }
        Ok(())
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("auto_increment", &self.auto_increment)
            .field("on_ready", &self.on_ready.is_some())
            .field("on_blocked", &self.on_blocked.is_some())
            .finish()
    }
}
