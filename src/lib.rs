pub mod config;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod store;

pub use config::{CacheConfig, IpStrategy, RateLimitConfig, SourceCriterion};
pub use middleware::cache::CacheMiddleware;
pub use middleware::ratelimit::RateLimiterMiddleware;
pub use middleware::recorder::{CapturedResponse, ResponseRecorder};
pub use middleware::source::SourceExtractor;
pub use middleware::{HttpHandler, Request, ResponseWriter};
pub use store::RemoteStore;
pub use store::typed::{CacheError, TypedCache};
