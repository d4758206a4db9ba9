//! Error types for `Testudo`
//!
//! One enum per concern, aggregated into [`TestudoError`] for the CLI.
//! Only configuration and target errors escape an assessment run; every
//! per-phase failure is captured into that phase's outcome instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::phase::Phase;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `Testudo` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure, missing endpoint)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied, artifact write failure)
    pub const IO_ERROR: i32 = 3;

    /// The assessment ran but ended in the `Aborted` state
    pub const ABORTED: i32 = 4;

    /// The target validator refused the target
    pub const TARGET_REJECTED: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `Testudo` operations.
#[derive(Debug, Error)]
pub enum TestudoError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Target refused before dispatch
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Aggregation invariant broken
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Report or playbook could not be persisted
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Run finished in the aborted state; artifacts were still written
    #[error("assessment aborted: {0}")]
    Aborted(String),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TestudoError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Target(_) => ExitCode::TARGET_REJECTED,
            Self::Aggregate(_) => ExitCode::ERROR,
            Self::Artifact(_) | Self::Io(_) => ExitCode::IO_ERROR,
            Self::Aborted(_) => ExitCode::ABORTED,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// All of these are raised before the first phase is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// A phase selected for this run has no service endpoint
    #[error("no endpoint configured for phase '{phase}'")]
    MissingEndpoint {
        /// The unmapped phase
        phase: Phase,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message supplied with the `${VAR:?message}` reference
        location: String,
    },
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "phases[2].endpoint")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Reported but does not prevent loading
    Warning,
}

// ============================================================================
// Target Errors
// ============================================================================

/// Raised when the injected validator refuses a target.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The validator returned false
    #[error("target '{target}' rejected: {reason}")]
    Rejected {
        /// The raw target string
        target: String,
        /// Why it was refused
        reason: String,
    },
}

// ============================================================================
// Phase Client Errors
// ============================================================================

/// Failures of a single phase-service call.
///
/// Only [`ClientError::Transport`] is retried by the dispatcher.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connection refused, DNS failure or per-attempt timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx status or a body that is not the expected JSON shape
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The service accepted the request and reported a failure
    #[error("remote error: {0}")]
    Remote(String),
}

impl ClientError {
    /// Whether another attempt with the same request could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Short machine-readable kind, used in outcomes and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Remote(_) => "remote",
        }
    }
}

// ============================================================================
// Aggregation Errors
// ============================================================================

/// Programming-defect signals raised by the result aggregator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    /// A slot was written twice, or addressed out of range, or left empty
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

// ============================================================================
// Advisory Errors
// ============================================================================

/// Failures of the advisory collaborator. Never propagated out of a run.
#[derive(Debug, Error)]
pub enum AdvisoryError {
    /// No credential available
    #[error("advisory disabled: {0}")]
    Disabled(String),

    /// The request could not be sent or returned a non-2xx status
    #[error("advisory request failed: {0}")]
    Request(String),

    /// The call exceeded its timeout
    #[error("advisory timed out")]
    Timeout,

    /// The response body did not carry any recommendation text
    #[error("invalid advisory response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Artifact Errors
// ============================================================================

/// Errors while persisting reports and playbooks.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Directory creation or file write failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization failed
    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization failed
    #[error("playbook serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `Testudo` operations.
pub type Result<T> = std::result::Result<T, TestudoError>;

// ============================================================================
// Tests
// ============================================================================
