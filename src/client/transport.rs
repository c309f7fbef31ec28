//! Part transports: how one part's bytes reach its presigned URL.
//!
//! A transport turns a single PUT into a stream of [`PartEvent`]s: zero or
//! more progress ticks, then exactly one terminal event.

use bytes::Bytes;
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use reqwest::header::{CONTENT_LENGTH, ETAG};
use std::io;
use tokio::sync::mpsc;
use tracing::trace;

/// Default body chunk; progress is reported once per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum PartEvent {
    /// `sent` of `total` body bytes handed to the connection.
    Progress { sent: u64, total: u64 },
    /// The provider accepted the part. `etag` is whatever the response carried.
    Finished { etag: Option<String> },
    Failed { reason: String },
}

impl PartEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PartEvent::Progress { .. })
    }
}

/// Uploads one part body to a presigned URL.
pub trait PartTransport: Send + Sync {
    fn put_part(&self, url: &str, body: Bytes) -> BoxStream<'static, PartEvent>;
}

impl<T: PartTransport + ?Sized> PartTransport for std::sync::Arc<T> {
    fn put_part(&self, url: &str, body: Bytes) -> BoxStream<'static, PartEvent> {
        (**self).put_part(url, body)
    }
}

/// HTTP PUT via reqwest, streaming the body in chunks to report progress.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl PartTransport for HttpTransport {
    fn put_part(&self, url: &str, body: Bytes) -> BoxStream<'static, PartEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let total = body.len() as u64;

        let chunks: Vec<Bytes> = (0..body.len())
            .step_by(self.chunk_size)
            .map(|start| body.slice(start..(start + self.chunk_size).min(body.len())))
            .collect();
        let progress_tx = tx.clone();
        let mut sent = 0u64;
        let body_stream = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            let _ = progress_tx.send(PartEvent::Progress { sent, total });
            Ok::<Bytes, io::Error>(chunk)
        });

        let request = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body_stream));

        tokio::spawn(async move {
            let event = match request.send().await {
                Ok(response) if response.status().is_success() => PartEvent::Finished {
                    etag: response
                        .headers()
                        .get(ETAG)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                },
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    PartEvent::Failed {
                        reason: format!("HTTP {status}: {body}"),
                    }
                }
                Err(err) => PartEvent::Failed {
                    reason: err.to_string(),
                },
            };
            trace!(?event, "part request finished");
            let _ = tx.send(event);
        });

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) }).boxed()
    }
}
