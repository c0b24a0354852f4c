//! Outbound HTTP behind a trait, to allow mocking.
//!
//! Transport-layer failures never surface as Rust errors here: they are
//! mapped onto synthetic retryable statuses so the subquery state machine
//! can treat "connection refused" and "upstream 200" uniformly.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};

use crate::error::{CompositeError, Result};

/// Synthetic status: TCP connect failed.
pub const STATUS_CONNECT_FAILED: u16 = 595;
/// Synthetic status: response body read failed or timed out.
pub const STATUS_READ_FAILED: u16 = 596;
/// Synthetic status: request could not be sent.
pub const STATUS_SEND_FAILED: u16 = 597;

/// Transport failures eligible for retry.
pub fn is_retryable(status: u16) -> bool {
    matches!(
        status,
        STATUS_CONNECT_FAILED | STATUS_READ_FAILED | STATUS_SEND_FAILED
    )
}

/// Body read error; the subquery converts it to `STATUS_READ_FAILED`.
#[derive(Debug)]
pub struct BodyError(pub String);

pub type BodyStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, BodyError>> + Send>>;

/// One upstream response: headers received, body still streaming.
pub struct HttpReply {
    pub status: u16,
    pub reason: String,
    pub body: BodyStream,
}

impl HttpReply {
    /// A reply with no body, used for synthetic transport-failure statuses.
    pub fn empty(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            body: Box::pin(futures::stream::empty()),
        }
    }
}

/// The gateway's view of an HTTP client.
#[async_trait]
pub trait HttpSource: Send + Sync {
    /// Issue a GET. Infallible: transport problems come back as synthetic
    /// statuses, not errors.
    async fn get(&self, url: &str) -> HttpReply;
}

/// Production `HttpSource` over a shared reqwest client.
pub struct ReqwestSource {
    client: reqwest::Client,
}

impl ReqwestSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CompositeError::internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpSource for ReqwestSource {
    async fn get(&self, url: &str) -> HttpReply {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => {
                return HttpReply::empty(STATUS_CONNECT_FAILED, e.to_string())
            }
            Err(e) if e.is_timeout() => return HttpReply::empty(STATUS_READ_FAILED, e.to_string()),
            Err(e) => return HttpReply::empty(STATUS_SEND_FAILED, e.to_string()),
        };
        let status = resp.status().as_u16();
        let reason = resp
            .status()
            .canonical_reason()
            .unwrap_or("unknown")
            .to_string();
        let body = resp
            .bytes_stream()
            .map(|item| item.map_err(|e| BodyError(e.to_string())));
        HttpReply {
            status,
            reason,
            body: Box::pin(body),
        }
    }
}
