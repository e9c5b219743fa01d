use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};

use super::ResponseWriter;

/// Everything the downstream handler produced, finalized once it returns.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Pass-through sink that forwards every write to the real client while
/// buffering a copy of status, headers, and body.
pub struct ResponseRecorder<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: Option<StatusCode>,
    // Snapshot cloned when the head is written; the deferred cache write
    // must never read a header map the engine may reuse.
    headers: HeaderMap,
    body: BytesMut,
}

impl<'a> ResponseRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self {
            inner,
            status: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
        }
    }

    /// `None` when the downstream handler never wrote a response head.
    pub fn into_captured(self) -> Option<CapturedResponse> {
        let status = self.status?;
        Some(CapturedResponse {
            status,
            headers: self.headers,
            body: self.body.freeze(),
        })
    }
}

#[async_trait]
impl ResponseWriter for ResponseRecorder<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    async fn write_head(&mut self, status: StatusCode) -> Result<()> {
        self.headers = self.inner.headers_mut().clone();
        self.status = Some(status);
        self.inner.write_head(status).await
    }

    async fn write_body(&mut self, chunk: &[u8]) -> Result<()> {
        if self.status.is_none() {
            self.write_head(StatusCode::OK).await?;
        }
        self.body.extend_from_slice(chunk);
        self.inner.write_body(chunk).await
    }
}
