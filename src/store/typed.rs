use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::RemoteStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store not initialized")]
    NotInitialized,
    #[error("cache key not found: {key}")]
    KeyNotFound { key: String },
    #[error("cache backend error: {0}")]
    Backend(#[source] anyhow::Error),
    #[error("cache serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl CacheError {
    /// A miss is a normal signal for callers, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::KeyNotFound { .. })
    }
}

/// Typed view over the untyped byte store.
///
/// Values are encoded as self-describing JSON so an entry written by one
/// proxy instance decodes on any other. A decode mismatch surfaces as
/// [`CacheError::Serialization`], never as a miss.
pub struct TypedCache<T> {
    store: Option<Arc<dyn RemoteStore>>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> TypedCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// A handle built from `None` stays callable; every operation reports
    /// [`CacheError::NotInitialized`] instead of faulting.
    pub fn new(store: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            store,
            _value: PhantomData,
        }
    }

    fn store(&self) -> Result<&Arc<dyn RemoteStore>, CacheError> {
        self.store.as_ref().ok_or(CacheError::NotInitialized)
    }

    pub async fn get(&self, key: &str) -> Result<T, CacheError> {
        let store = self.store()?;
        let bytes = store.get(key).await.map_err(CacheError::Backend)?;
        let bytes = bytes.ok_or_else(|| CacheError::KeyNotFound {
            key: key.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(CacheError::Serialization)
    }

    pub async fn set(&self, key: &str, value: &T, ttl_seconds: i64) -> Result<(), CacheError> {
        let store = self.store()?;
        let bytes = serde_json::to_vec(value).map_err(CacheError::Serialization)?;
        store
            .set(key, &bytes, ttl_seconds)
            .await
            .map_err(CacheError::Backend)
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        self.store()?.ping().await.map_err(CacheError::Backend)
    }
}
