use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static CACHE_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookups_total", "Cache lookups by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookups_total");
    vec
});

static CACHE_STORES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_stores_total", "Cache write-backs by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_stores_total");
    vec
});

static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "rate_limit_decisions_total",
        "Rate limiter decisions by outcome",
    );
    let vec = IntCounterVec::new(opts, &["decision"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register rate_limit_decisions_total");
    vec
});

pub fn record_cache_lookup(outcome: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_cache_store(outcome: &str) {
    CACHE_STORES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_rate_limit(decision: &str) {
    RATE_LIMIT_DECISIONS_TOTAL
        .with_label_values(&[decision])
        .inc();
}

/// Text-format export for the embedding proxy's metrics endpoint.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
