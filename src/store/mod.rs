pub mod memory;
pub mod typed;

use anyhow::Result;
use async_trait::async_trait;

/// Byte-oriented remote key-value service shared by every proxy instance.
///
/// Every call is a single attempt: connection pooling, reconnection, and
/// retry policy belong to the implementing client. A `ttl_seconds` of zero
/// or below instructs the store to treat the entry as already expired.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `Ok(None)` is a clean miss; `Err` is a backend failure.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: i64) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
