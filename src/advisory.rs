//! Optional advisory enrichment.
//!
//! After all phases ran, each succeeded phase's findings are handed to an
//! [`AdvisoryProvider`] and the returned lines are attached to the record.
//! Every provider failure is logged and treated as "no recommendations".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::redirect;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AdvisoryConfig;
use crate::error::AdvisoryError;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::phase::Phase;
use crate::record::{AssessmentRecord, OutcomeStatus};

const SYSTEM_PROMPT: &str = "You are an offensive security expert.";

// ============================================================================
// Provider seam
// ============================================================================

/// Input to one advisory call.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRequest<'a> {
    /// Phase whose findings are analyzed.
    pub phase: Phase,
    /// Findings as returned by the phase service.
    pub findings: &'a [Value],
}

/// External analysis collaborator: findings in, recommendation lines out.
#[async_trait]
pub trait AdvisoryProvider: Send + Sync {
    /// Returns ordered recommendation lines.
    ///
    /// # Errors
    ///
    /// Any [`AdvisoryError`]; the enricher swallows all of them.
    async fn analyze(&self, request: &AdvisoryRequest<'_>) -> Result<Vec<String>, AdvisoryError>;
}

// ============================================================================
// Chat-completions provider
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions provider.
#[derive(Clone)]
pub struct ChatAdvisor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for ChatAdvisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAdvisor")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatAdvisor {
    /// Creates a provider with an explicit key.
    ///
    /// # Errors
    ///
    /// Returns `Request` if the HTTP client cannot be built.
    pub fn new(endpoint: String, model: String, api_key: String) -> Result<Self, AdvisoryError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AdvisoryError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }

    /// Creates a provider from configuration, reading the key from the
    /// configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `Disabled` when the variable is unset or empty.
    pub fn from_config(config: &AdvisoryConfig) -> Result<Self, AdvisoryError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AdvisoryError::Disabled(format!(
                    "environment variable '{}' is not set",
                    config.api_key_env
                ))
            })?;
        Self::new(config.endpoint.clone(), config.model.clone(), api_key)
    }

    fn prompt(request: &AdvisoryRequest<'_>) -> String {
        let findings = serde_json::to_string(request.findings).unwrap_or_default();
        format!(
            "Analyze these security assessment results.\n\
             Phase: {}\n\
             Findings: {findings}\n\n\
             What are the recommended next steps? Answer with one recommendation per line.",
            request.phase
        )
    }
}

#[async_trait]
impl AdvisoryProvider for ChatAdvisor {
    async fn analyze(&self, request: &AdvisoryRequest<'_>) -> Result<Vec<String>, AdvisoryError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::prompt(request),
                },
            ],
        };

        debug!(phase = %request.phase, model = %self.model, "requesting advisory");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdvisoryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdvisoryError::Request(format!("HTTP {}", status.as_u16())));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdvisoryError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AdvisoryError::InvalidResponse("missing choices[0].message.content".into()))?;

        Ok(split_recommendations(&content))
    }
}

/// Splits model output into trimmed, non-empty lines.
#[must_use]
pub fn split_recommendations(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ============================================================================
// Enricher
// ============================================================================

/// Attaches advisory text to succeeded phases.
pub struct AdvisoryEnricher {
    provider: Arc<dyn AdvisoryProvider>,
    timeout: Duration,
    events: Arc<EventEmitter>,
}

impl std::fmt::Debug for AdvisoryEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryEnricher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AdvisoryEnricher {
    /// Creates an enricher; `timeout` bounds each provider call.
    #[must_use]
    pub fn new(provider: Arc<dyn AdvisoryProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            events: Arc::new(EventEmitter::noop()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Builds the enricher the configuration asks for.
    ///
    /// Returns `None` when advisory is disabled or no credential is
    /// available; a missing key is not an error.
    #[must_use]
    pub fn from_config(config: &AdvisoryConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match ChatAdvisor::from_config(config) {
            Ok(advisor) => Some(Self::new(Arc::new(advisor), config.timeout.get())),
            Err(e) => {
                info!(reason = %e, "advisory enrichment disabled");
                None
            }
        }
    }

    /// Enriches every succeeded phase of `record`.
    pub async fn enrich(&self, record: &mut AssessmentRecord) {
        let mut attached = Vec::new();

        for outcome in record
            .outcomes()
            .filter(|o| o.status() == OutcomeStatus::Succeeded)
        {
            let phase = outcome.phase();
            let request = AdvisoryRequest {
                phase,
                findings: outcome.findings(),
            };
            if let Some(lines) = self.analyze_one(&request).await {
                attached.push((phase, lines));
            }
        }

        for (phase, lines) in attached {
            record.attach_recommendations(phase, lines);
        }
    }

    async fn analyze_one(&self, request: &AdvisoryRequest<'_>) -> Option<Vec<String>> {
        let phase = request.phase;
        let result = tokio::time::timeout(self.timeout, self.provider.analyze(request))
            .await
            .unwrap_or(Err(AdvisoryError::Timeout));

        let reason = match result {
            Ok(lines) if !lines.is_empty() => {
                metrics::record_advisory("attached");
                self.events.emit(Event::AdvisoryAttached {
                    timestamp: Utc::now(),
                    phase,
                    recommendations: lines.len(),
                });
                return Some(lines);
            }
            Ok(_) => {
                metrics::record_advisory("empty");
                "provider returned no recommendations".to_string()
            }
            Err(e) => {
                metrics::record_advisory(match &e {
                    AdvisoryError::Timeout => "timeout",
                    _ => "failed",
                });
                warn!(phase = %phase, error = %e, "advisory failed; continuing without recommendations");
                e.to_string()
            }
        };

        self.events.emit(Event::AdvisorySkipped {
            timestamp: Utc::now(),
            phase,
            reason,
        });
        None
    }
}
