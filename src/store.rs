//! Persistence for node lists and auth tokens.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use nested_enum_utils::common_fields;
use snafu::{Backtrace, Snafu};
use tokio::sync::Mutex;

/// Key under which the last fetched node list is stored.
pub const NODES_KEY: &str = "retrieval/nodes";
/// Key under which the current auth token is stored.
pub const TOKEN_KEY: &str = "retrieval/jwt";

/// Errors from a [`KeyValueStore`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum StoreError {
    #[snafu(display("store backend failed: {message}"))]
    Backend { message: String },
}

impl StoreError {
    /// A failure of the storage backend.
    pub fn backend(message: impl Into<String>) -> Self {
        BackendSnafu { message }.build()
    }
}

/// A string key-value store.
///
/// Used on a best-effort basis: failures are logged and retrieval carries on.
#[async_trait]
pub trait KeyValueStore: Debug + Send + Sync + 'static {
    /// Reads `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Writes `key`.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// A [`KeyValueStore`] in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}
