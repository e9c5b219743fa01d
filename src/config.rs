use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_period() -> String {
    "1s".to_string()
}

/// Response-cache middleware configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime as a duration string, e.g. "30s" or "5m".
    pub ttl: String,
    /// Comma-separated request header names whose values select the cached
    /// variant (content negotiation).
    #[serde(default)]
    pub variation_headers: String,
    /// Fail construction when the store does not answer a ping, instead of
    /// degrading to cache-disabled at request time.
    #[serde(default)]
    pub require_store: bool,
}

/// Rate-limiter middleware configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum request units per source within one period. Zero disables
    /// the limiter.
    #[serde(default)]
    pub average: i64,
    /// Window length as a duration string, e.g. "1s" or "1m".
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default)]
    pub source_criterion: SourceCriterion,
}

impl RateLimitConfig {
    /// An empty or zero period falls back to one second. The store's TTL
    /// granularity is whole seconds, so shorter periods round up to it.
    pub(crate) fn parse_period(&self) -> Result<Duration> {
        let raw = self.period.trim();
        if raw.is_empty() {
            return Ok(Duration::from_secs(1));
        }
        let period = humantime::parse_duration(raw)
            .with_context(|| format!("invalid rate limit period '{}'", self.period))?;
        Ok(period.max(Duration::from_secs(1)))
    }
}

/// Strategy selecting the traffic-source identity of a request. At most one
/// field may be set; unset means the IP strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceCriterion {
    #[serde(default)]
    pub ip_strategy: Option<IpStrategy>,
    #[serde(default)]
    pub request_header_name: Option<String>,
    #[serde(default)]
    pub request_host: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpStrategy {
    /// How many trusted proxies sit in front: picks the nth entry from the
    /// right of `x-forwarded-for`. Zero uses the peer address.
    #[serde(default)]
    pub depth: usize,
}
