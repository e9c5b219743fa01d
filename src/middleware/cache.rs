use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use http::header::{AGE, CACHE_CONTROL};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::metrics;
use crate::store::RemoteStore;
use crate::store::typed::{CacheError, TypedCache};

use super::recorder::{CapturedResponse, ResponseRecorder};
use super::{HttpHandler, Request, ResponseWriter, unix_now};

/// Upper bound on a single detached write-back; a slow store must not
/// accumulate unbounded in-flight work.
const WRITE_BACK_TIMEOUT: Duration = Duration::from_secs(10);

/// A whole captured response as persisted in the shared store.
///
/// `age` is never stored; it is derived from wall-clock time at read time
/// so replicas that read the entry later serve an accurate value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub body: Vec<u8>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stored_at: i64,
    pub max_age: i64,
}

impl CacheEntry {
    fn age(&self, now: i64) -> i64 {
        (now - self.stored_at).max(0)
    }
}

fn headermap_to_pairs(map: &HeaderMap) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in map.iter() {
        if let Ok(value) = value.to_str() {
            pairs.push((name.as_str().to_string(), value.to_string()));
        }
    }
    pairs
}

/// Whole-response cache decorator keyed by request fingerprint.
///
/// Reads are served without touching the downstream handler; misses fall
/// through and the captured response is persisted off the request path.
/// Store trouble degrades to "no cache", never to a failed request.
pub struct CacheMiddleware {
    next: Arc<dyn HttpHandler>,
    name: String,
    cache: TypedCache<CacheEntry>,
    ttl: Duration,
    variation_headers: Vec<String>,
}

impl CacheMiddleware {
    pub async fn new(
        next: Arc<dyn HttpHandler>,
        config: &CacheConfig,
        name: impl Into<String>,
        store: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self> {
        let name = name.into();
        let ttl = humantime::parse_duration(config.ttl.trim())
            .with_context(|| format!("invalid cache ttl '{}'", config.ttl))?;

        let cache = TypedCache::new(store);
        if config.require_store {
            cache
                .ping()
                .await
                .with_context(|| format!("cache store unavailable for middleware '{name}'"))?;
        }

        // Lower-cased, sorted, deduplicated so every instance of a
        // logically-identical middleware derives identical fingerprints.
        let mut variation_headers: Vec<String> = config
            .variation_headers
            .split(',')
            .map(|header| header.trim().to_ascii_lowercase())
            .filter(|header| !header.is_empty())
            .collect();
        variation_headers.sort();
        variation_headers.dedup();

        debug!(
            name,
            ttl = %config.ttl,
            variation_headers = ?variation_headers,
            "creating cache middleware"
        );

        Ok(Self {
            next,
            name,
            cache,
            ttl,
            variation_headers,
        })
    }

    /// Deterministic request fingerprint: SHA-256 over the middleware name,
    /// the request URI, and the values of the configured variation headers.
    /// Unconfigured headers never influence the key.
    pub(crate) fn build_key(&self, req: &Request) -> String {
        let mut parts = Vec::new();
        for name in &self.variation_headers {
            let values: Vec<&str> = req
                .headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            if values.is_empty() {
                continue;
            }
            parts.push(format!("{}:{}", name, values.join(":")));
        }

        let base = format!("{};{};{}", self.name, req.uri, parts.join(","));
        let digest = Sha256::digest(base.as_bytes());
        format!("{digest:x}")
    }

    fn read_eligible(req: &Request) -> bool {
        if req.method != Method::GET {
            return false;
        }
        !req.headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("no-cache"))
    }

    async fn replay(&self, entry: &CacheEntry, writer: &mut dyn ResponseWriter) -> Result<()> {
        let headers = writer.headers_mut();
        for (name, value) in &entry.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        // Always derived fresh, overwriting anything the entry replayed.
        headers.insert(AGE, HeaderValue::from(entry.age(unix_now())));
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_str(&format!("max-age={}", entry.max_age))?,
        );

        let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
        writer.write_head(status).await?;
        writer.write_body(&entry.body).await
    }

    fn spawn_write_back(&self, key: String, captured: CapturedResponse) {
        let mut headers = captured.headers;
        // Derived at replay time, never stored.
        headers.remove(CACHE_CONTROL);
        headers.remove(AGE);

        let entry = CacheEntry {
            body: captured.body.to_vec(),
            status: captured.status.as_u16(),
            headers: headermap_to_pairs(&headers),
            stored_at: unix_now(),
            max_age: self.ttl.as_secs() as i64,
        };
        let ttl_seconds = self.ttl.as_secs() as i64;
        let cache = self.cache.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            match timeout(WRITE_BACK_TIMEOUT, cache.set(&key, &entry, ttl_seconds)).await {
                Ok(Ok(())) => {
                    metrics::record_cache_store("stored");
                    debug!(name = %name, key = %key, "stored response in cache");
                }
                Ok(Err(err)) => {
                    metrics::record_cache_store("error");
                    warn!(name = %name, key = %key, error = %err, "cache write failed");
                }
                Err(_) => {
                    metrics::record_cache_store("timeout");
                    warn!(name = %name, key = %key, "cache write timed out");
                }
            }
        });
    }
}

#[async_trait]
impl HttpHandler for CacheMiddleware {
    async fn serve(&self, req: &Request, writer: &mut dyn ResponseWriter) -> Result<()> {
        let key = self.build_key(req);
        let read_eligible = Self::read_eligible(req);

        if read_eligible {
            match self.cache.get(&key).await {
                Ok(entry) => {
                    metrics::record_cache_lookup("hit");
                    debug!(name = %self.name, key = %key, "serving from cache");
                    return self.replay(&entry, writer).await;
                }
                Err(err) if err.is_not_found() => {
                    metrics::record_cache_lookup("miss");
                }
                Err(err) => {
                    metrics::record_cache_lookup("error");
                    warn!(
                        name = %self.name,
                        error = %err,
                        "cache read failed; serving uncached"
                    );
                }
            }
        }

        let mut recorder = ResponseRecorder::new(writer);
        self.next.serve(req, &mut recorder).await?;
        let captured = recorder.into_captured();

        if read_eligible
            && let Some(captured) = captured
            && captured.status == StatusCode::OK
        {
            self.spawn_write_back(key, captured);
        }
        Ok(())
    }
}
