use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::RemoteStore;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: SystemTime,
}

/// In-process store with the same TTL contract as the remote service.
///
/// Backs the test suite and embedded deployments that run without a shared
/// store. Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if SystemTime::now() < entry.expires_at => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: i64) -> Result<()> {
        let mut entries = self.entries.lock();
        if ttl_seconds <= 0 {
            // Non-positive TTL means "already expired".
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: SystemTime::now() + Duration::from_secs(ttl_seconds as u64),
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_reads_within_ttl() -> Result<()> {
        let store = MemoryStore::new();
        store.set("k", b"value", 60).await?;
        assert_eq!(store.get("k").await?, Some(b"value".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_is_a_clean_miss() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn non_positive_ttl_expires_immediately() -> Result<()> {
        let store = MemoryStore::new();
        store.set("k", b"value", 60).await?;

        store.set("k", b"value", 0).await?;
        assert_eq!(store.get("k").await?, None);

        store.set("k", b"value", -5).await?;
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_replaces_value_and_ttl() -> Result<()> {
        let store = MemoryStore::new();
        store.set("k", b"old", 60).await?;
        store.set("k", b"new", 60).await?;
        assert_eq!(store.get("k").await?, Some(b"new".to_vec()));
        Ok(())
    }
}
