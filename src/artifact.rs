//! Report and playbook generation.
//!
//! Both artifacts are pure functions of the frozen [`Assessment`] and the
//! [`PathNamer`]; identical inputs produce byte-identical files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::ArtifactError;
use crate::observability::events::{Event, EventEmitter};
use crate::phase::Phase;
use crate::record::{Assessment, OutcomeStatus};

/// `strftime` pattern for the run-start component of artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

// ============================================================================
// Path naming
// ============================================================================

/// Chooses where artifacts for an assessment are written.
pub trait PathNamer: Send + Sync {
    /// Destination of the JSON report.
    fn report_path(&self, assessment: &Assessment) -> PathBuf;

    /// Destination of the YAML playbook.
    fn playbook_path(&self, assessment: &Assessment) -> PathBuf;
}

/// Names artifacts by target slug and run-start timestamp.
#[derive(Debug, Clone)]
pub struct TimestampNamer {
    reports_dir: PathBuf,
    playbooks_dir: PathBuf,
}

impl TimestampNamer {
    /// Creates a namer writing into the two directories.
    #[must_use]
    pub fn new(reports_dir: impl Into<PathBuf>, playbooks_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            playbooks_dir: playbooks_dir.into(),
        }
    }

    fn stem(assessment: &Assessment) -> String {
        format!(
            "assessment_{}_{}",
            assessment.target().slug(),
            assessment.started_at().format(TIMESTAMP_FORMAT)
        )
    }
}

impl PathNamer for TimestampNamer {
    fn report_path(&self, assessment: &Assessment) -> PathBuf {
        self.reports_dir
            .join(format!("{}.json", Self::stem(assessment)))
    }

    fn playbook_path(&self, assessment: &Assessment) -> PathBuf {
        self.playbooks_dir
            .join(format!("{}.yml", Self::stem(assessment)))
    }
}

// ============================================================================
// Playbook model
// ============================================================================

/// One play of the generated playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Play {
    /// Play name.
    pub name: String,
    /// Inventory pattern; the assessed target.
    pub hosts: String,
    /// Tasks in phase order, then step order.
    pub tasks: Vec<Task>,
}

/// One task per recorded step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// Display name.
    pub name: String,
    /// The originating command.
    pub command: String,
    /// Variable holding this task's result.
    pub register: String,
    /// Failures do not stop the play.
    pub ignore_errors: bool,
    /// Requires elevated privileges.
    #[serde(rename = "become")]
    pub escalate: bool,
    /// Runs only if the previous task succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Originating phase.
    pub tags: Vec<Phase>,
}

/// Derives the playbook for `assessment`.
///
/// Skipped phases contribute nothing; failed phases contribute their
/// steps, which is normally none.
#[must_use]
pub fn build_playbook(assessment: &Assessment) -> Vec<Play> {
    let steps = assessment
        .outcomes()
        .iter()
        .filter(|o| o.status() != OutcomeStatus::Skipped)
        .flat_map(|o| o.steps().iter().map(move |s| (o.phase(), s)));

    let tasks = steps
        .enumerate()
        .map(|(n, (phase, step))| Task {
            name: format!("Execute: {}", step.command),
            command: step.command.clone(),
            register: format!("step_{n}"),
            ignore_errors: true,
            escalate: true,
            when: n.checked_sub(1).map(|prev| format!("step_{prev} is success")),
            tags: vec![phase],
        })
        .collect();

    vec![Play {
        name: format!("Testudo security audit: {}", assessment.target()),
        hosts: assessment.target().to_string(),
        tasks,
    }]
}

// ============================================================================
// Generator
// ============================================================================

/// Persists reports and playbooks.
pub struct ArtifactGenerator {
    namer: Arc<dyn PathNamer>,
    events: Arc<EventEmitter>,
}

impl std::fmt::Debug for ArtifactGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactGenerator").finish_non_exhaustive()
    }
}

impl ArtifactGenerator {
    /// Creates a generator around a naming collaborator.
    #[must_use]
    pub fn new(namer: Arc<dyn PathNamer>) -> Self {
        Self {
            namer,
            events: Arc::new(EventEmitter::noop()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Writes the JSON report and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] on serialization or I/O failure.
    pub fn generate_report(&self, assessment: &Assessment) -> Result<PathBuf, ArtifactError> {
        let mut body = serde_json::to_vec_pretty(assessment)?;
        body.push(b'\n');
        let path = self.namer.report_path(assessment);
        self.write(&path, &body, "report")?;
        Ok(path)
    }

    /// Writes the YAML playbook and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] on serialization or I/O failure.
    pub fn generate_playbook(&self, assessment: &Assessment) -> Result<PathBuf, ArtifactError> {
        let body = serde_yaml::to_string(&build_playbook(assessment))?;
        let path = self.namer.playbook_path(assessment);
        self.write(&path, body.as_bytes(), "playbook")?;
        Ok(path)
    }

    fn write(&self, path: &Path, body: &[u8], kind: &str) -> Result<(), ArtifactError> {
        let io_err = |source| ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, body).map_err(io_err)?;

        info!(kind, path = %path.display(), "artifact written");
        self.events.emit(Event::ArtifactWritten {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }
}
