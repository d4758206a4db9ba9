//! Phase dispatch with retry and per-attempt timeout.
//!
//! [`ServiceDispatcher::dispatch`] never fails: every error ends up in the
//! returned [`PhaseOutcome`]. Only transport errors are retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::client::PhaseClient;
use crate::config::{AssessmentConfig, RetryPolicy};
use crate::error::{ClientError, ConfigError};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::phase::Phase;
use crate::record::{ErrorDetail, OutcomeStatus, PhaseOutcome, StepResult};
use crate::target::Target;
use crate::templates::{CommandTemplates, NoTemplates, build_options, rendered_commands};

/// Where and how to reach one phase service.
#[derive(Debug, Clone)]
pub struct PhaseEndpoint {
    /// Base URL; `/execute` is appended by the client.
    pub url: String,
    /// Static options merged into every request.
    pub options: Map<String, Value>,
}

impl PhaseEndpoint {
    /// An endpoint without static options.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: Map::new(),
        }
    }
}

/// Resolves phases to services and invokes them under the retry policy.
pub struct ServiceDispatcher {
    endpoints: BTreeMap<Phase, PhaseEndpoint>,
    retry: RetryPolicy,
    timeout: Duration,
    client: Arc<dyn PhaseClient>,
    templates: Arc<dyn CommandTemplates>,
    events: Arc<EventEmitter>,
}

impl std::fmt::Debug for ServiceDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDispatcher")
            .field("endpoints", &self.endpoints)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceDispatcher {
    /// Creates a dispatcher over an explicit endpoint map.
    #[must_use]
    pub fn new(
        endpoints: BTreeMap<Phase, PhaseEndpoint>,
        retry: RetryPolicy,
        timeout: Duration,
        client: Arc<dyn PhaseClient>,
    ) -> Self {
        Self {
            endpoints,
            retry,
            timeout,
            client,
            templates: Arc::new(NoTemplates),
            events: Arc::new(EventEmitter::noop()),
        }
    }

    /// Creates a dispatcher from a loaded configuration.
    ///
    /// Entries without an endpoint are left unmapped; [`ensure_covers`]
    /// reports them before any dispatch.
    ///
    /// [`ensure_covers`]: Self::ensure_covers
    #[must_use]
    pub fn from_config(config: &AssessmentConfig, client: Arc<dyn PhaseClient>) -> Self {
        let endpoints = config
            .phases
            .iter()
            .filter_map(|entry| {
                let url = entry.endpoint.as_deref()?.trim();
                (!url.is_empty()).then(|| {
                    (
                        entry.phase,
                        PhaseEndpoint {
                            url: url.to_string(),
                            options: entry.options.clone(),
                        },
                    )
                })
            })
            .collect();
        Self::new(endpoints, config.retry, config.timeout.get(), client)
    }

    /// Sets the command-template source.
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn CommandTemplates>) -> Self {
        self.templates = templates;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Endpoint mapped for `phase`, if any.
    #[must_use]
    pub fn endpoint(&self, phase: Phase) -> Option<&PhaseEndpoint> {
        self.endpoints.get(&phase)
    }

    /// Checks that every phase in `phases` has an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEndpoint`] for the first unmapped phase.
    pub fn ensure_covers(&self, phases: &[Phase]) -> Result<(), ConfigError> {
        match phases.iter().find(|p| !self.endpoints.contains_key(p)) {
            Some(&phase) => Err(ConfigError::MissingEndpoint { phase }),
            None => Ok(()),
        }
    }

    /// Attempts `phase` against `target` and returns its outcome.
    pub async fn dispatch(&self, phase: Phase, target: &Target) -> PhaseOutcome {
        let started = Instant::now();
        let outcome = self.attempt_all(phase, target).await;

        let elapsed = started.elapsed();
        metrics::record_phase_outcome(phase, outcome.status());
        metrics::record_dispatch_duration(phase, elapsed);
        self.events.emit(Event::PhaseFinished {
            timestamp: outcome.timestamp(),
            phase,
            status: outcome.status(),
            attempts: outcome.attempts(),
            findings: outcome.findings().len(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });

        match outcome.status() {
            OutcomeStatus::Succeeded => info!(
                phase = %phase,
                attempts = outcome.attempts(),
                findings = outcome.findings().len(),
                "phase succeeded"
            ),
            _ => warn!(
                phase = %phase,
                attempts = outcome.attempts(),
                error = outcome.error().map_or("", |e| e.message.as_str()),
                "phase failed"
            ),
        }
        outcome
    }

    async fn attempt_all(&self, phase: Phase, target: &Target) -> PhaseOutcome {
        let Some(endpoint) = self.endpoints.get(&phase) else {
            return PhaseOutcome::failed(
                phase,
                ErrorDetail::new(
                    "configuration",
                    format!("no endpoint configured for phase '{phase}'"),
                ),
                0,
                Utc::now(),
            );
        };

        let commands = rendered_commands(self.templates.as_ref(), phase, target);
        let options = build_options(&commands, &endpoint.options);
        let total = self.retry.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            metrics::record_phase_attempt(phase);
            self.events.emit(Event::PhaseDispatched {
                timestamp: Utc::now(),
                phase,
                attempt,
            });
            debug!(phase = %phase, attempt, endpoint = %endpoint.url, "dispatching phase");

            let result = tokio::time::timeout(
                self.timeout,
                self.client.execute(&endpoint.url, target, options.as_ref()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ClientError::Transport(format!(
                    "attempt timed out after {}",
                    humantime::format_duration(self.timeout)
                )))
            });

            let err = match result {
                Ok(response) => {
                    let steps = response.steps.unwrap_or_else(|| {
                        commands
                            .iter()
                            .map(|command| StepResult {
                                command: command.clone(),
                                raw_result: Value::Null,
                            })
                            .collect()
                    });
                    return PhaseOutcome::succeeded(
                        phase,
                        response.status,
                        steps,
                        response.findings,
                        attempt,
                        Utc::now(),
                    );
                }
                Err(err) => err,
            };

            let will_retry = err.is_retryable() && attempt < total;
            metrics::record_phase_error(phase, err.kind());
            self.events.emit(Event::PhaseAttemptFailed {
                timestamp: Utc::now(),
                phase,
                attempt,
                kind: err.kind().to_string(),
                will_retry,
            });

            if !will_retry {
                return PhaseOutcome::failed(phase, &err, attempt, Utc::now());
            }

            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                phase = %phase,
                attempt,
                error = %err,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "transport failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
