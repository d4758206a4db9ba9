//! Configuration schema types.
//!
//! Deserialized from `testudo.yaml`. Every section except `phases` has a
//! default; the loaded configuration is frozen in an `Arc` and read-only
//! for the rest of the process.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::phase::Phase;

// ============================================================================
// Root
// ============================================================================

/// Root configuration for an assessment deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssessmentConfig {
    /// Ordered phase sequence.
    pub phases: Vec<PhaseConfig>,

    /// Sequencing and failure policy.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Retry policy applied to transport failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-attempt timeout for phase service calls.
    #[serde(default = "default_timeout")]
    pub timeout: DurationValue,

    /// Command-template (cheatsheet) source.
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Advisory enrichment settings.
    #[serde(default)]
    pub advisory: AdvisoryConfig,

    /// Artifact output directories.
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for AssessmentConfig {
    /// The reference deployment: all four phases on their default endpoints.
    fn default() -> Self {
        Self {
            phases: Phase::ALL
                .iter()
                .map(|&phase| PhaseConfig {
                    phase,
                    endpoint: Some(phase.default_endpoint().to_string()),
                    independent: false,
                    options: serde_json::Map::new(),
                })
                .collect(),
            execution: ExecutionConfig::default(),
            retry: RetryPolicy::default(),
            timeout: default_timeout(),
            templates: TemplatesConfig::default(),
            advisory: AdvisoryConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl AssessmentConfig {
    /// Configured phases in order.
    #[must_use]
    pub fn phase_sequence(&self) -> Vec<Phase> {
        self.phases.iter().map(|p| p.phase).collect()
    }

    /// Looks up the entry for `phase`.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

fn default_timeout() -> DurationValue {
    DurationValue(Duration::from_secs(30))
}

// ============================================================================
// Phases
// ============================================================================

/// One entry of the phase sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Which phase this entry configures.
    pub phase: Phase,

    /// Base URL of the phase service; `/execute` is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// May run concurrently with the preceding batch in concurrent mode.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub independent: bool,

    /// Static options merged into every request for this phase.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Execution
// ============================================================================

/// How phases are sequenced and how failures are handled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Sequential or batched-concurrent execution.
    #[serde(default)]
    pub mode: ExecutionMode,

    /// What happens after a phase fails.
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// Phase scheduling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Strictly one phase at a time, in configured order.
    #[default]
    Sequential,
    /// Phases marked `independent` share a batch with their predecessor.
    Concurrent,
}

/// Reaction to a failed phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and proceed with the next phase.
    #[default]
    Continue,
    /// Stop; every remaining phase is recorded as skipped.
    Abort,
}

// ============================================================================
// Retry
// ============================================================================

/// Bounded retry for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay before the first retry; doubled for each later retry.
    #[serde(default = "default_backoff")]
    pub backoff: DurationValue,

    /// Upper bound on any single backoff delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: DurationValue,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            attempts: 0,
            backoff: DurationValue(Duration::ZERO),
            max_backoff: DurationValue(Duration::ZERO),
        }
    }

    /// Delay before retry number `retry` (0-based), capped at `max_backoff`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.backoff
            .0
            .saturating_mul(factor)
            .min(self.max_backoff.0)
    }

    /// Total attempts including the first one.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.attempts.saturating_add(1)
    }
}

const fn default_attempts() -> u32 {
    3
}

fn default_backoff() -> DurationValue {
    DurationValue(Duration::from_millis(500))
}

fn default_max_backoff() -> DurationValue {
    DurationValue(Duration::from_secs(10))
}

// ============================================================================
// Templates, Advisory, Output
// ============================================================================

/// Location of the per-phase markdown cheatsheets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplatesConfig {
    /// Directory holding `<phase>.md` files.
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
        }
    }
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("cheatsheets")
}

/// Advisory enrichment settings.
///
/// The API key is never stored in the file; only the name of the
/// environment variable that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvisoryConfig {
    /// Whether enrichment runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Chat-completions compatible endpoint.
    #[serde(default = "default_advisory_endpoint")]
    pub endpoint: String,

    /// Model name sent with each request.
    #[serde(default = "default_advisory_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for a single advisory call.
    #[serde(default = "default_advisory_timeout")]
    pub timeout: DurationValue,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_advisory_endpoint(),
            model: default_advisory_model(),
            api_key_env: default_api_key_env(),
            timeout: default_advisory_timeout(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_advisory_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_advisory_model() -> String {
    "gpt-4".to_string()
}

fn default_api_key_env() -> String {
    "TESTUDO_ADVISORY_API_KEY".to_string()
}

fn default_advisory_timeout() -> DurationValue {
    DurationValue(Duration::from_secs(60))
}

/// Where reports and playbooks are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory for JSON reports.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Directory for YAML playbooks.
    #[serde(default = "default_playbooks_dir")]
    pub playbooks_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
            playbooks_dir: default_playbooks_dir(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_playbooks_dir() -> PathBuf {
    PathBuf::from("playbooks")
}

// ============================================================================
// Durations
// ============================================================================

/// A duration written in humantime notation (`500ms`, `30s`, `2m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DurationValue(pub Duration);

impl DurationValue {
    /// The wrapped duration.
    #[must_use]
    pub const fn get(self) -> Duration {
        self.0
    }
}

impl From<Duration> for DurationValue {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl fmt::Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl Serialize for DurationValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DurationValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map(Self)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration '{raw}': {e}")))
    }
}
