use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use http::header::RETRY_AFTER;
use http::{HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::metrics;
use crate::store::RemoteStore;
use crate::store::typed::TypedCache;

use super::source::{SourceExtractor, build_source_extractor};
use super::{HttpHandler, Request, ResponseWriter, unix_now};

static X_RETRY_IN: HeaderName = HeaderName::from_static("x-retry-in");

/// Deadline on a single counter write; exceeding it abandons the write,
/// never the request.
const COUNTER_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Best-effort running total of request units observed since the window
/// anchor. Concurrent read-modify-write sequences may undercount; that
/// approximation is accepted in exchange for lock-free shared counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateCounter {
    pub stored_at: i64,
    pub counter: i64,
}

/// TTL instruction for the current window, derived from its anchor.
///
/// The store's own expiry encodes "time remaining in the window": an open
/// window re-writes the counter with the remaining seconds, and an elapsed
/// window hands the store a non-positive TTL so the entry is treated as
/// already expired. That self-expiry IS the window reset; no delete needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowTtl {
    pub ttl_seconds: i64,
    pub elapsed: bool,
}

impl WindowTtl {
    pub fn remaining(&self) -> Duration {
        if self.ttl_seconds > 0 {
            Duration::from_secs(self.ttl_seconds as u64)
        } else {
            Duration::ZERO
        }
    }
}

pub(crate) fn window_ttl(stored_at: i64, period: Duration, now: i64) -> WindowTtl {
    let window_end = stored_at.saturating_add(period.as_secs() as i64);
    let ttl_seconds = window_end - now;
    WindowTtl {
        ttl_seconds,
        elapsed: ttl_seconds <= 0,
    }
}

/// Per-source admission control over the shared counter store, so that
/// every proxy instance enforces one logical quota.
///
/// Counter-store trouble always degrades to "allow traffic": an
/// unavailable store must not become a denial-of-service vector.
pub struct RateLimiterMiddleware {
    next: Arc<dyn HttpHandler>,
    name: String,
    average: i64,
    period: Duration,
    counters: TypedCache<RateCounter>,
    source: Box<dyn SourceExtractor>,
}

impl RateLimiterMiddleware {
    pub fn new(
        next: Arc<dyn HttpHandler>,
        config: &RateLimitConfig,
        name: impl Into<String>,
        store: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            config.average >= 0,
            "negative value not valid for rate limit average: {}",
            config.average
        );
        let period = config.parse_period()?;
        let source = build_source_extractor(&config.source_criterion)?;

        debug!(name, period = ?period, average = config.average, "creating rate limiter middleware");

        Ok(Self {
            next,
            name,
            average: config.average,
            period,
            counters: TypedCache::new(store),
            source,
        })
    }

    fn composite_key(&self, source: &str, req: &Request) -> String {
        format!(
            "rl:{}:{}:{}:{}",
            self.name,
            source,
            req.method,
            req.uri.path()
        )
    }

    async fn reject(&self, writer: &mut dyn ResponseWriter, remaining: Duration) -> Result<()> {
        let headers = writer.headers_mut();
        headers.insert(RETRY_AFTER, HeaderValue::from(remaining.as_secs()));
        headers.insert(
            X_RETRY_IN.clone(),
            HeaderValue::from_str(&humantime::format_duration(remaining).to_string())?,
        );
        writer.write_head(StatusCode::TOO_MANY_REQUESTS).await?;
        writer.write_body(b"Too Many Requests").await
    }
}

#[async_trait]
impl HttpHandler for RateLimiterMiddleware {
    async fn serve(&self, req: &Request, writer: &mut dyn ResponseWriter) -> Result<()> {
        let (source, amount) = match self.source.extract(req) {
            Ok(extracted) => extracted,
            Err(err) => {
                // The one client-visible failure: an unidentifiable source
                // cannot be rate limited safely.
                warn!(name = %self.name, error = %err, "could not extract source of request");
                writer.write_head(StatusCode::INTERNAL_SERVER_ERROR).await?;
                return writer.write_body(b"could not extract source of request").await;
            }
        };

        if self.average == 0 {
            return self.next.serve(req, writer).await;
        }

        let key = self.composite_key(&source, req);
        let now = unix_now();
        let mut counter = match self.counters.get(&key).await {
            Ok(counter) => counter,
            Err(err) if err.is_not_found() => RateCounter {
                stored_at: now,
                counter: 0,
            },
            Err(err) => {
                warn!(
                    name = %self.name,
                    error = %err,
                    "counter store unavailable; skipping rate limit"
                );
                metrics::record_rate_limit("fail_open");
                return self.next.serve(req, writer).await;
            }
        };

        counter.counter += amount;
        let window = window_ttl(counter.stored_at, self.period, now);
        debug!(
            name = %self.name,
            source = %source,
            amount,
            counter = counter.counter,
            ttl_seconds = window.ttl_seconds,
            "rate limit check"
        );

        if counter.counter > self.average && !window.elapsed {
            metrics::record_rate_limit("rejected");
            return self.reject(writer, window.remaining()).await;
        }

        // Always re-written, even for an existing source: the stored anchor
        // must reflect the latest activity, and an elapsed window must hand
        // the store its non-positive TTL to trigger the reset.
        match timeout(
            COUNTER_WRITE_TIMEOUT,
            self.counters.set(&key, &counter, window.ttl_seconds),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(name = %self.name, error = %err, "could not persist rate counter");
            }
            Err(_) => {
                warn!(name = %self.name, "rate counter write timed out");
            }
        }

        metrics::record_rate_limit("allowed");
        self.next.serve(req, writer).await
    }
}
