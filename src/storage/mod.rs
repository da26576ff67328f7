//! Key/value storage collaborator.
//!
//! The embedding host owns persistence: how bytes are stored, replicated or
//! encrypted at rest is not this crate's concern. The engine only needs the
//! four single-key operations of [`Storage`]. Signing keys, roles and the
//! engine configuration are each serialized as one JSON record per key:
//!
//! | Prefix | Record |
//! |--------|--------|
//! | `keys/<name>` | [`SigningKeyRecord`](crate::keys::SigningKeyRecord) |
//! | `roles/<name>` | [`DelegationRole`](crate::role::DelegationRole) |
//! | `config` | [`ExchangeConfig`](crate::exchange_config::ExchangeConfig) |

pub mod memory;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

pub use memory::MemoryStorage;

/// Trait abstracting the host's key/value store.
///
/// Implementations must be `Send + Sync` because the engine is shared across
/// async tasks. Each call is treated as atomic; there are no multi-key
/// transactions.
#[async_trait::async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Read the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List the keys directly under `prefix`, with the prefix stripped.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read and decode a JSON record.
pub(crate) async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>> {
    let Some(bytes) = storage.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::storage(format!("failed to decode record {key}: {e}")))
}

/// Encode and write a JSON record.
pub(crate) async fn put_json<T: Serialize>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    storage.put(key, bytes).await
}
