//! Upstream compute service client
//!
//! The research service is an opaque collaborator reachable over a blocking
//! request/response endpoint and a streaming endpoint. The wire format is
//! the service's snake_case JSON; payloads it returns (thinking traces,
//! metadata) are round-tripped, never interpreted.

pub mod framing;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::context::TurnContext;
use crate::{Error, Result};

pub use framing::{StreamDecoder, UpstreamEvent};

/// Raw transport chunks from the streaming endpoint
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Request payload for the compute service
#[derive(Debug, Clone, Serialize)]
pub struct ComputeRequest {
    pub message: String,
    pub thread_id: String,
    pub user_id: String,
    pub conversation_history: Vec<TurnContext>,
    pub metadata: serde_json::Value,
}

impl ComputeRequest {
    /// Copy of this request with `metadata.streaming` set, as the
    /// streaming endpoint expects
    #[must_use]
    pub fn with_streaming_flag(&self) -> Self {
        let mut request = self.clone();
        if !request.metadata.is_object() {
            request.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = request.metadata.as_object_mut() {
            map.insert("streaming".to_string(), serde_json::Value::Bool(true));
        }
        request
    }
}

/// Response from the blocking endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeResponse {
    pub content: String,
    #[serde(default)]
    pub thinking_trace: Option<serde_json::Value>,
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Seam for the compute service, so turns can be exercised against a
/// scripted implementation in tests
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Execute a research request and wait for the full response
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamUnavailable`] if the service cannot be
    /// reached, times out, or answers with a failure
    async fn execute(&self, request: &ComputeRequest) -> Result<ComputeResponse>;

    /// Open a streaming research request, returning raw transport chunks
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamUnavailable`] if the service cannot be
    /// reached, times out, or answers with a failure
    async fn open_stream(&self, request: &ComputeRequest) -> Result<ByteStream>;
}

/// HTTP implementation backed by `reqwest`
pub struct HttpComputeService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpComputeService {
    /// Create a client for the given base URL.
    ///
    /// The timeout is one coarse ceiling covering the entire call on both
    /// paths, including inter-chunk stalls while streaming. Research tasks
    /// are slow, so the ceiling is long, but it is always finite.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ComputeService for HttpComputeService {
    async fn execute(&self, request: &ComputeRequest) -> Result<ComputeResponse> {
        let response = self
            .client
            .post(format!("{}/api/chat/process", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "compute service returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))
    }

    async fn open_stream(&self, request: &ComputeRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(format!("{}/api/chat/stream", self.base_url))
            .json(&request.with_streaming_flag())
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "compute service returned {}",
                response.status()
            )));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| Error::UpstreamUnavailable(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}
