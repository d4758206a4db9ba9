//! Configuration validation.
//!
//! Runs on the deserialized [`AssessmentConfig`] and collects every issue
//! rather than stopping at the first, so a broken deployment file is
//! reported in one pass.

use std::collections::HashSet;

use crate::config::schema::{AssessmentConfig, ExecutionMode};
use crate::error::{Severity, ValidationIssue};

/// Retry counts above this are almost always a typo.
const MAX_SENSIBLE_RETRIES: u32 = 10;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns the result.
    pub fn validate(&mut self, config: &AssessmentConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_phases(config);
        self.validate_timing(config);
        self.validate_execution(config);
        self.validate_advisory(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_phases(&mut self, config: &AssessmentConfig) {
        if config.phases.is_empty() {
            self.add_error("phases", "At least one phase must be configured");
            return;
        }

        let mut seen = HashSet::new();
        for (idx, entry) in config.phases.iter().enumerate() {
            let path = format!("phases[{idx}]");

            if !seen.insert(entry.phase) {
                self.add_error(
                    &format!("{path}.phase"),
                    &format!("Phase '{}' is configured more than once", entry.phase),
                );
            }

            match entry.endpoint.as_deref().map(str::trim) {
                None | Some("") => self.add_error(
                    &format!("{path}.endpoint"),
                    &format!("Phase '{}' has no service endpoint", entry.phase),
                ),
                Some(url) => self.validate_endpoint(url, &format!("{path}.endpoint")),
            }
        }
    }

    fn validate_endpoint(&mut self, url: &str, path: &str) {
        let Some((scheme, rest)) = url.split_once("://") else {
            self.add_error(path, &format!("Endpoint '{url}' is not an absolute URL"));
            return;
        };
        if !matches!(scheme, "http" | "https") {
            self.add_error(
                path,
                &format!("Endpoint scheme '{scheme}' is not supported (use http or https)"),
            );
        }
        if rest.is_empty() || rest.starts_with('/') {
            self.add_error(path, &format!("Endpoint '{url}' has no host"));
        }
        if rest.ends_with("/execute") {
            self.add_warning(
                path,
                "Endpoint already ends with '/execute'; the path is appended automatically",
            );
        }
    }

    fn validate_timing(&mut self, config: &AssessmentConfig) {
        if config.timeout.get().is_zero() {
            self.add_error("timeout", "Per-attempt timeout must be greater than zero");
        }
        if config.retry.backoff > config.retry.max_backoff {
            self.add_warning(
                "retry.backoff",
                "Backoff exceeds max_backoff; every retry will wait max_backoff",
            );
        }
        if config.retry.attempts > MAX_SENSIBLE_RETRIES {
            self.add_warning(
                "retry.attempts",
                &format!(
                    "{} retries per phase is unusually high",
                    config.retry.attempts
                ),
            );
        }
    }

    fn validate_execution(&mut self, config: &AssessmentConfig) {
        if config.execution.mode == ExecutionMode::Concurrent
            && !config.phases.iter().skip(1).any(|p| p.independent)
        {
            self.add_warning(
                "execution.mode",
                "Concurrent mode is set but no phase is marked independent; phases will run sequentially",
            );
        }
        if let Some(first) = config.phases.first() {
            if first.independent {
                self.add_warning(
                    "phases[0].independent",
                    "The first phase has no predecessor; 'independent' has no effect",
                );
            }
        }
    }

    fn validate_advisory(&mut self, config: &AssessmentConfig) {
        let advisory = &config.advisory;
        if !advisory.enabled {
            return;
        }
        if advisory.api_key_env.trim().is_empty() {
            self.add_error(
                "advisory.api_key_env",
                "Advisory is enabled but no API key variable is named",
            );
        } else if std::env::var_os(&advisory.api_key_env).is_none() {
            self.add_warning(
                "advisory.api_key_env",
                &format!(
                    "Environment variable '{}' is not set; advisory will be disabled",
                    advisory.api_key_env
                ),
            );
        }
        if advisory.timeout.get().is_zero() {
            self.add_error("advisory.timeout", "Advisory timeout must be greater than zero");
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
