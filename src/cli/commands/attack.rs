//! `attack` command
//!
//! Wires configuration, collaborators and observability into a
//! [`PhaseOrchestrator`], runs it, persists both artifacts and prints a
//! per-phase summary.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::advisory::AdvisoryEnricher;
use crate::artifact::{ArtifactGenerator, TimestampNamer};
use crate::cli::args::AttackArgs;
use crate::client::HttpPhaseClient;
use crate::config::{AssessmentConfig, ConfigLoader, ExecutionMode, FailurePolicy};
use crate::dispatch::ServiceDispatcher;
use crate::error::TestudoError;
use crate::observability::{EventEmitter, init_metrics};
use crate::orchestrator::{PhaseOrchestrator, RunReport};
use crate::record::OutcomeStatus;
use crate::selection::select_phases;
use crate::templates::MarkdownCheatsheets;

/// Runs one assessment.
///
/// # Errors
///
/// Configuration, target and artifact errors, plus
/// [`TestudoError::Aborted`] after artifacts were written for an aborted
/// run.
pub async fn run(
    args: &AttackArgs,
    cancel: CancellationToken,
    quiet: bool,
) -> Result<(), TestudoError> {
    let loaded = ConfigLoader::default().load_or_default(args.config.as_deref())?;
    for warning in &loaded.warnings {
        warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    let mut config = (*loaded.config).clone();
    apply_overrides(&mut config, args);
    let config = Arc::new(config);

    if args.metrics_port.is_some() {
        init_metrics(args.metrics_port)?;
    }

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    });

    let phases = select_phases(&config, &args.selection())?;

    let client = HttpPhaseClient::new()
        .map_err(|e| TestudoError::Io(std::io::Error::other(e.to_string())))?;
    let dispatcher = ServiceDispatcher::from_config(&config, Arc::new(client))
        .with_templates(Arc::new(MarkdownCheatsheets::new(&config.templates.dir)))
        .with_events(Arc::clone(&events));

    let enricher =
        AdvisoryEnricher::from_config(&config.advisory).map(|e| e.with_events(Arc::clone(&events)));
    if args.advisory_override() == Some(true) && enricher.is_none() {
        warn!(
            variable = %config.advisory.api_key_env,
            "advisory requested but no API key is available; continuing without it"
        );
    }

    let orchestrator = PhaseOrchestrator::new(Arc::clone(&config), dispatcher)
        .with_enricher(enricher)
        .with_events(Arc::clone(&events))
        .with_cancellation(cancel);

    let report = orchestrator.run(&args.target, &phases).await?;

    let generator = ArtifactGenerator::new(Arc::new(TimestampNamer::new(
        &config.output.reports_dir,
        &config.output.playbooks_dir,
    )))
    .with_events(events);
    let report_path = generator.generate_report(&report.assessment)?;
    let playbook_path = generator.generate_playbook(&report.assessment)?;

    if !quiet {
        print!("{}", render_summary(&report, &report_path, &playbook_path));
    }

    if report.is_aborted() {
        return Err(TestudoError::Aborted(
            report
                .assessment
                .aborted()
                .unwrap_or("run aborted")
                .to_string(),
        ));
    }
    Ok(())
}

/// Applies command-line overrides on top of the loaded configuration.
pub fn apply_overrides(config: &mut AssessmentConfig, args: &AttackArgs) {
    if args.abort_on_failure {
        config.execution.on_failure = FailurePolicy::Abort;
    }
    if args.concurrent {
        config.execution.mode = ExecutionMode::Concurrent;
    }
    if let Some(enabled) = args.advisory_override() {
        config.advisory.enabled = enabled;
    }
    if let Some(dir) = &args.reports_dir {
        config.output.reports_dir.clone_from(dir);
    }
    if let Some(dir) = &args.playbooks_dir {
        config.output.playbooks_dir.clone_from(dir);
    }
}

/// Renders the human-readable run summary.
#[must_use]
pub fn render_summary(report: &RunReport, report_path: &Path, playbook_path: &Path) -> String {
    let assessment = &report.assessment;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Assessment of {} ({}): {}",
        assessment.target(),
        assessment.run_id(),
        report.state
    );

    for outcome in assessment.outcomes() {
        let detail = match outcome.status() {
            OutcomeStatus::Succeeded => format!(
                "{} finding(s), {} step(s), {} attempt(s)",
                outcome.findings().len(),
                outcome.steps().len(),
                outcome.attempts()
            ),
            OutcomeStatus::Failed => format!(
                "{} after {} attempt(s)",
                outcome.error().map_or("unknown error", |e| e.message.as_str()),
                outcome.attempts()
            ),
            OutcomeStatus::Skipped => "not attempted".to_string(),
        };
        let _ = writeln!(
            out,
            "  {:<14} {:<10} {detail}",
            outcome.phase().id(),
            outcome.status().as_str()
        );
        if let Some(lines) = assessment.recommendations(outcome.phase()) {
            for line in lines {
                let _ = writeln!(out, "      > {line}");
            }
        }
    }

    if let Some(reason) = assessment.aborted() {
        let _ = writeln!(out, "Aborted: {reason}");
    }
    let _ = writeln!(out, "Report:   {}", report_path.display());
    let _ = writeln!(out, "Playbook: {}", playbook_path.display());
    out
}
