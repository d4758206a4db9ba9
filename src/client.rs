//! Typed client for the remote phase services.
//!
//! Each service exposes `POST {endpoint}/execute` taking
//! `{"target", "options"}` and answering `{"status", "findings", ...}`.
//! Findings may contain sensitive data and are never logged here.

use async_trait::async_trait;
use reqwest::redirect;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::record::StepResult;
use crate::target::Target;

/// Maximum accepted response body (16 MiB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Remote status strings that mean the service rejected the work.
const FAILURE_STATUSES: [&str; 3] = ["error", "failed", "failure"];

// ============================================================================
// Wire types
// ============================================================================

/// Request body sent to `/execute`.
#[derive(Debug, Serialize)]
pub struct PhaseRequest<'a> {
    /// The validated target.
    pub target: &'a str,
    /// Rendered commands plus static phase options, or `null`.
    pub options: Option<&'a Value>,
}

/// A well-formed phase service response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhaseResponse {
    /// Service-reported status (`ok`, `completed`, ...).
    pub status: String,
    /// Opaque findings.
    pub findings: Vec<Value>,
    /// Per-command results, when the service reports them.
    #[serde(default)]
    pub steps: Option<Vec<StepResult>>,
    /// Error detail accompanying a failure status.
    #[serde(default)]
    pub error: Option<Value>,
}

impl PhaseResponse {
    /// Whether the status string reports an application-level failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        let status = self.status.trim();
        FAILURE_STATUSES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(status))
    }

    /// Converts a failure status into [`ClientError::Remote`].
    ///
    /// # Errors
    ///
    /// Returns `Remote` when [`is_failure`](Self::is_failure) holds.
    pub fn into_result(self) -> Result<Self, ClientError> {
        if !self.is_failure() {
            return Ok(self);
        }
        let detail = match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => format!("service reported status '{}'", self.status),
            Some(other) => other.to_string(),
        };
        Err(ClientError::Remote(detail))
    }
}

// ============================================================================
// Client seam
// ============================================================================

/// Sends one request to one phase service.
///
/// Implementations do not retry and do not enforce the per-attempt
/// timeout; both belong to the dispatcher.
#[async_trait]
pub trait PhaseClient: Send + Sync {
    /// Executes a phase for `target` at `endpoint`.
    ///
    /// # Errors
    ///
    /// - `Transport` on connection failure
    /// - `Protocol` on non-2xx status or malformed body
    /// - `Remote` when the service reports a failure status
    async fn execute(
        &self,
        endpoint: &str,
        target: &Target,
        options: Option<&Value>,
    ) -> Result<PhaseResponse, ClientError>;
}

/// `reqwest`-backed [`PhaseClient`].
#[derive(Debug, Clone)]
pub struct HttpPhaseClient {
    client: reqwest::Client,
}

impl HttpPhaseClient {
    /// Builds a client that never follows redirects.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("testudo/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Joins an endpoint base URL and the `/execute` path.
#[must_use]
pub fn execute_url(endpoint: &str) -> String {
    format!("{}/execute", endpoint.trim_end_matches('/'))
}

#[async_trait]
impl PhaseClient for HttpPhaseClient {
    async fn execute(
        &self,
        endpoint: &str,
        target: &Target,
        options: Option<&Value>,
    ) -> Result<PhaseResponse, ClientError> {
        let url = execute_url(endpoint);
        let body = PhaseRequest {
            target: target.as_str(),
            options,
        };

        debug!(url = %url, "sending phase request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Protocol(format!(
                "{url} answered HTTP {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(ClientError::Protocol(format!(
                "response body exceeds {MAX_RESPONSE_SIZE} byte limit"
            )));
        }

        parse_response(&bytes)
    }
}

/// Parses and classifies a raw response body.
///
/// # Errors
///
/// `Protocol` for malformed JSON or a missing `status`/`findings`,
/// `Remote` for a failure status.
pub fn parse_response(bytes: &[u8]) -> Result<PhaseResponse, ClientError> {
    let response: PhaseResponse = serde_json::from_slice(bytes)
        .map_err(|e| ClientError::Protocol(format!("malformed response: {e}")))?;
    response.into_result()
}
