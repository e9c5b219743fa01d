use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};

use fleetgate::{HttpHandler, RemoteStore, Request, ResponseWriter};

/// Downstream stub responding with a fixed status and body; counts how
/// often it actually runs so tests can tell hits from passes.
pub struct StaticHandler {
    status: StatusCode,
    body: &'static [u8],
    calls: AtomicUsize,
}

impl StaticHandler {
    pub fn ok(body: &'static [u8]) -> Arc<Self> {
        Self::with_status(StatusCode::OK, body)
    }

    pub fn with_status(status: StatusCode, body: &'static [u8]) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpHandler for StaticHandler {
    async fn serve(&self, req: &Request, writer: &mut dyn ResponseWriter) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        writer
            .headers_mut()
            .insert("content-type", HeaderValue::from_static("text/plain"));
        if let Some(lang) = req.headers.get("accept-language") {
            writer.headers_mut().insert("content-language", lang.clone());
        }
        writer.write_head(self.status).await?;
        writer.write_body(self.body).await
    }
}

/// The "real client" end of the pipeline.
#[derive(Default)]
pub struct ClientWriter {
    pub headers: HeaderMap,
    pub status: Option<StatusCode>,
    pub body: Vec<u8>,
}

#[async_trait]
impl ResponseWriter for ClientWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_head(&mut self, status: StatusCode) -> Result<()> {
        self.status = Some(status);
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> Result<()> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

/// Store stub whose every call reports a backend failure.
pub struct FailingStore;

#[async_trait]
impl RemoteStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        anyhow::bail!("store unreachable")
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_seconds: i64) -> Result<()> {
        anyhow::bail!("store unreachable")
    }

    async fn ping(&self) -> Result<()> {
        anyhow::bail!("store unreachable")
    }
}

pub fn get_request(uri: &str, headers: HeaderMap) -> Request {
    Request {
        method: Method::GET,
        uri: uri.parse::<Uri>().unwrap(),
        headers,
        peer: "203.0.113.7:40000".parse().unwrap(),
    }
}

/// Polls until the condition holds or the deadline passes. Detached cache
/// write-backs land on their own schedule; tests observe them externally.
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
