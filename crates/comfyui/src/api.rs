//! REST client for the generation server's HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (readiness stats, workflow submission,
//! history retrieval, artifact download) using [`reqwest`]. Every call
//! carries its own request timeout; the server is local, but inference
//! stalls must not pin an invocation forever.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use genbridge_core::outputs::{ArtifactKind, OutputDescriptor};

// ---------------------------------------------------------------------------
// Request timeouts
// ---------------------------------------------------------------------------

/// Timeout for workflow submission.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single history poll.
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for artifact download.
pub const VIEW_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for one readiness probe attempt.
pub const STATS_TIMEOUT: Duration = Duration::from_secs(5);

/// Artifact bodies under this size are treated as corrupt or incomplete.
pub const MIN_ARTIFACT_BYTES: usize = 1000;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for a single generation server.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the `/prompt` endpoint after successfully
/// queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    #[serde(default)]
    pub number: Option<i32>,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Errors from artifact retrieval, each mapped to a distinct report.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Missing filename in ComfyUI {kind} output")]
    MissingFilename { kind: &'static str },

    #[error("Timeout downloading artifact from ComfyUI /view")]
    Timeout,

    #[error("Error downloading artifact from ComfyUI /view: {0}")]
    Request(String),

    #[error("ComfyUI /view returned HTTP {status}")]
    Http { status: u16 },

    #[error("Downloaded artifact is too small ({bytes} bytes)")]
    TooSmall { bytes: usize },
}

impl ComfyUIApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Base HTTP API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Readiness probe. Any 200 from `/system_stats` means ready; the
    /// body is not inspected.
    pub async fn system_stats(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(STATS_TIMEOUT)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the workflow JSON and a
    /// client ID. A non-200 response or a body without `prompt_id` is a
    /// hard failure; there is no retry.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned JSON is
    /// a mapping keyed by prompt id; an id not yet present means the job
    /// is still pending.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download a produced artifact through the `/view` endpoint.
    ///
    /// Returns the raw bytes and a content type. A reported content type
    /// that does not match the expected media kind falls back to the
    /// kind's default.
    pub async fn fetch_view(
        &self,
        descriptor: &OutputDescriptor,
        kind: ArtifactKind,
    ) -> Result<(Vec<u8>, String), ArtifactError> {
        if descriptor.filename.is_empty() {
            return Err(ArtifactError::MissingFilename { kind: kind.label() });
        }

        let mut request = self
            .client
            .get(format!("{}/view", self.api_url))
            .timeout(VIEW_TIMEOUT)
            .query(&[
                ("filename", descriptor.filename.as_str()),
                ("type", descriptor.storage_type.as_str()),
            ]);
        if !descriptor.subfolder.is_empty() {
            request = request.query(&[("subfolder", descriptor.subfolder.as_str())]);
        }

        tracing::info!(
            filename = %descriptor.filename,
            storage_type = %descriptor.storage_type,
            subfolder = %descriptor.subfolder,
            "Downloading artifact from ComfyUI",
        );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ArtifactError::Timeout
            } else {
                ArtifactError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactError::Http {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ArtifactError::Timeout
            } else {
                ArtifactError::Request(e.to_string())
            }
        })?;

        if bytes.len() < MIN_ARTIFACT_BYTES {
            return Err(ArtifactError::TooSmall { bytes: bytes.len() });
        }

        let content_type = if content_type.starts_with(kind.content_type_prefix()) {
            content_type
        } else {
            kind.default_content_type().to_string()
        };

        Ok((bytes.to_vec(), content_type))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
