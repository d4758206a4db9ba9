//! CLI argument definitions
//!
//! All Clap derive structs for `Testudo` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;
use crate::phase::Phase;
use crate::selection::{Mode, Selection};

// ============================================================================
// Root CLI
// ============================================================================

/// Multi-phase security assessment coordinator.
#[derive(Parser, Debug)]
#[command(name = "testudo", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "TESTUDO_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "TESTUDO_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an assessment against a target.
    Attack(AttackArgs),

    /// Validate configuration files without running anything.
    Validate(ValidateArgs),

    /// Write a starter configuration file.
    Init(InitArgs),

    /// List the assessment phases.
    Phases(PhasesArgs),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Attack
// ============================================================================

/// Arguments for `attack`.
#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("selection").multiple(false))]
pub struct AttackArgs {
    /// Host name, IP address or CIDR block to assess.
    pub target: String,

    /// Path to YAML configuration file.
    #[arg(short, long, env = "TESTUDO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Preset phase set.
    #[arg(short, long, group = "selection")]
    pub mode: Option<Mode>,

    /// Explicit comma-separated phase list.
    #[arg(long, value_delimiter = ',', group = "selection")]
    pub phases: Option<Vec<Phase>>,

    /// Force advisory enrichment on.
    #[arg(long, overrides_with = "no_advisory")]
    pub advisory: bool,

    /// Force advisory enrichment off.
    #[arg(long, overrides_with = "advisory")]
    pub no_advisory: bool,

    /// Stop at the first failed phase and skip the rest.
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Run phases marked independent concurrently.
    #[arg(long)]
    pub concurrent: bool,

    /// Override the report directory.
    #[arg(long, env = "TESTUDO_REPORTS_DIR")]
    pub reports_dir: Option<PathBuf>,

    /// Override the playbook directory.
    #[arg(long, env = "TESTUDO_PLAYBOOKS_DIR")]
    pub playbooks_dir: Option<PathBuf>,

    /// Write the JSONL event stream to this file.
    #[arg(long, env = "TESTUDO_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Expose Prometheus metrics on 127.0.0.1:<PORT>.
    #[arg(long, env = "TESTUDO_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl AttackArgs {
    /// The phase selection these arguments ask for.
    #[must_use]
    pub fn selection(&self) -> Selection {
        match (&self.phases, self.mode) {
            (Some(phases), _) => Selection::Phases(phases.clone()),
            (None, Some(mode)) => Selection::Mode(mode),
            (None, None) => Selection::default(),
        }
    }

    /// Advisory override: `Some(true)` / `Some(false)` when a flag was given.
    #[must_use]
    pub const fn advisory_override(&self) -> Option<bool> {
        match (self.advisory, self.no_advisory) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

// ============================================================================
// Validate / Init / Phases / Version
// ============================================================================

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the configuration.
    #[arg(short, long, default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub output: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `phases`.
#[derive(Args, Debug)]
pub struct PhasesArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}
