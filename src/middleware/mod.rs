pub mod cache;
pub mod ratelimit;
pub mod recorder;
pub mod source;

use std::net::SocketAddr;
use std::time::SystemTime;

use anyhow::Result;
use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode, Uri};

/// Inbound request as handed over by the routing engine.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub peer: SocketAddr,
}

/// Client-facing response sink owned by the proxy engine.
///
/// Headers are mutable until `write_head`, which is called at most once.
/// A body write without a prior head implies status 200.
#[async_trait]
pub trait ResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    async fn write_head(&mut self, status: StatusCode) -> Result<()>;

    async fn write_body(&mut self, chunk: &[u8]) -> Result<()>;
}

/// The decorator seam. Middlewares implement this and wrap a downstream
/// handler behind the same trait; the routing engine sits at the far end.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn serve(&self, req: &Request, writer: &mut dyn ResponseWriter) -> Result<()>;
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
