use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Request};

use crate::error::{AppError, AppResult, HttpError};

/// A response whose body has been fully drained.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Empty unless the caller asked for the body to be kept.
    pub body: Bytes,
    pub body_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

/// Sends one request and drains its response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: Request,
        capture_body: bool,
    ) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::http(HttpError::BuildClientFailed { source: err }))?;
        Ok(Self { client })
    }

    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: Request,
        capture_body: bool,
    ) -> Result<TransportResponse, TransportError> {
        let response = self.client.execute(request).await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let mut stream = response.bytes_stream();
        let mut body_len: u64 = 0;
        let mut captured: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(transport_error)?;
            body_len = body_len.saturating_add(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
            if capture_body {
                captured.extend_from_slice(&bytes);
            }
        }

        Ok(TransportResponse {
            status,
            headers,
            body: Bytes::from(captured),
            body_len,
        })
    }
}

/// Group-friendly message: the error chain without the request URL.
fn transport_error(err: reqwest::Error) -> TransportError {
    let timed_out = err.is_timeout();
    let err = err.without_url();
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    TransportError { message, timed_out }
}
