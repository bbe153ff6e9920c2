//! KeyValueStore trait and JSON helpers

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Byte storage keyed by `/`-separated strings
///
/// Implementations must make `put` atomic: a reader sees either the old value
/// or the new one, never a partial write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, bytes).await
}

/// Reject keys that could escape a store rooted in a directory
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
