mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    MockService, ScriptedClient, config_with_policy, ok_body, stub_dispatcher, stub_endpoint,
    unreachable_endpoint, write_file,
};
use proptest::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use testudo::artifact::{ArtifactGenerator, TimestampNamer};
use testudo::client::HttpPhaseClient;
use testudo::config::{
    AssessmentConfig, DurationValue, ExecutionMode, FailurePolicy, PhaseConfig, RetryPolicy,
};
use testudo::dispatch::ServiceDispatcher;
use testudo::error::{ClientError, TestudoError};
use testudo::orchestrator::{PhaseOrchestrator, RunState};
use testudo::phase::Phase;
use testudo::record::OutcomeStatus;
use testudo::templates::MarkdownCheatsheets;

fn phase_entry(phase: Phase, endpoint: &str) -> PhaseConfig {
    PhaseConfig {
        phase,
        endpoint: Some(endpoint.to_string()),
        independent: false,
        options: serde_json::Map::new(),
    }
}

// ============================================================================
// End-to-end over HTTP
// ============================================================================

/// Recon answers, scan is unreachable: the run completes with one success,
/// one transport failure, and a playbook built from recon alone.
#[tokio::test(flavor = "multi_thread")]
async fn partial_failure_still_produces_artifacts() {
    let recon = MockService::phase(ok_body()).await;
    let dir = tempfile::tempdir().unwrap();
    let cheatsheets = dir.path().join("cheatsheets");
    std::fs::create_dir_all(&cheatsheets).unwrap();
    write_file(&cheatsheets, "recon.md", "# DNS\n`whois {target}`\n`dig +short {target}`\n");
    write_file(&cheatsheets, "scan.md", "# Ports\n`nmap -sV {target}`\n");

    let mut config = AssessmentConfig::default();
    config.phases = vec![
        phase_entry(Phase::Recon, &recon.url),
        phase_entry(Phase::Scan, &unreachable_endpoint()),
    ];
    config.retry = RetryPolicy {
        attempts: 2,
        backoff: DurationValue(Duration::from_millis(10)),
        max_backoff: DurationValue(Duration::from_millis(20)),
    };
    config.advisory.enabled = false;
    let config = Arc::new(config);

    let dispatcher =
        ServiceDispatcher::from_config(&config, Arc::new(HttpPhaseClient::new().unwrap()))
            .with_templates(Arc::new(MarkdownCheatsheets::new(&cheatsheets)));
    let report = PhaseOrchestrator::new(Arc::clone(&config), dispatcher)
        .run("10.0.0.5", &[Phase::Recon, Phase::Scan])
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    let assessment = &report.assessment;

    let recon_outcome = assessment.outcome(Phase::Recon).unwrap();
    assert_eq!(recon_outcome.status(), OutcomeStatus::Succeeded);
    assert_eq!(recon_outcome.findings(), &[json!({"port": 22})]);
    assert_eq!(recon_outcome.remote_status(), Some("ok"));

    let scan_outcome = assessment.outcome(Phase::Scan).unwrap();
    assert_eq!(scan_outcome.status(), OutcomeStatus::Failed);
    assert_eq!(scan_outcome.error().unwrap().kind, "transport");
    assert_eq!(scan_outcome.attempts(), 3, "first attempt plus two retries");

    let request = &recon.requests()[0];
    assert_eq!(request["target"], "10.0.0.5");
    assert_eq!(
        request["options"]["commands"],
        json!(["whois 10.0.0.5", "dig +short 10.0.0.5"])
    );

    let generator = ArtifactGenerator::new(Arc::new(TimestampNamer::new(
        dir.path().join("reports"),
        dir.path().join("playbooks"),
    )));
    let report_path = generator.generate_report(assessment).unwrap();
    let playbook_path = generator.generate_playbook(assessment).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(json["target"], "10.0.0.5");
    assert_eq!(json["outcomes"][0]["status"], "Succeeded");
    assert_eq!(json["outcomes"][1]["status"], "Failed");
    assert_eq!(json["outcomes"][1]["error"]["kind"], "transport");

    let playbook = std::fs::read_to_string(playbook_path).unwrap();
    assert!(playbook.contains("whois 10.0.0.5"), "{playbook}");
    assert!(playbook.contains("dig +short 10.0.0.5"), "{playbook}");
    assert!(!playbook.contains("nmap"), "scan contributed tasks: {playbook}");
    assert!(!playbook.contains("- scan"), "{playbook}");
}

/// A failure status in the body is a remote error and is never retried.
#[tokio::test(flavor = "multi_thread")]
async fn remote_failure_status_is_not_retried() {
    let scan = MockService::phase(json!({
        "status": "error",
        "findings": [],
        "error": "nmap not installed"
    }))
    .await;

    let mut config = AssessmentConfig::default();
    config.phases = vec![phase_entry(Phase::Scan, &scan.url)];
    config.advisory.enabled = false;
    let config = Arc::new(config);

    let dispatcher =
        ServiceDispatcher::from_config(&config, Arc::new(HttpPhaseClient::new().unwrap()));
    let report = PhaseOrchestrator::new(Arc::clone(&config), dispatcher)
        .run("scanme.example.org", &[Phase::Scan])
        .await
        .unwrap();

    let outcome = report.assessment.outcome(Phase::Scan).unwrap();
    assert_eq!(outcome.status(), OutcomeStatus::Failed);
    let error = outcome.error().unwrap();
    assert_eq!(error.kind, "remote");
    assert!(error.message.contains("nmap not installed"), "{}", error.message);
    assert_eq!(scan.hits(), 1);
}

/// Non-2xx answers are protocol errors.
#[tokio::test(flavor = "multi_thread")]
async fn http_error_status_is_protocol_failure() {
    let recon =
        MockService::phase_with_status(axum::http::StatusCode::BAD_GATEWAY, json!({})).await;

    let mut config = AssessmentConfig::default();
    config.phases = vec![phase_entry(Phase::Recon, &recon.url)];
    config.advisory.enabled = false;
    let config = Arc::new(config);

    let dispatcher =
        ServiceDispatcher::from_config(&config, Arc::new(HttpPhaseClient::new().unwrap()));
    let report = PhaseOrchestrator::new(Arc::clone(&config), dispatcher)
        .run("10.0.0.5", &[Phase::Recon])
        .await
        .unwrap();

    let outcome = report.assessment.outcome(Phase::Recon).unwrap();
    assert_eq!(outcome.error().unwrap().kind, "protocol");
    assert_eq!(recon.hits(), 1);
}

// ============================================================================
// Failure policy
// ============================================================================

fn failing_scan() -> ScriptedClient {
    ScriptedClient::new()
        .ok(Phase::Recon, ok_body())
        .err(Phase::Scan, ClientError::Transport("connection refused".into()))
        .ok(Phase::Exploit, ok_body())
        .ok(Phase::PostExploit, ok_body())
}

#[tokio::test]
async fn abort_policy_skips_remaining_phases() {
    let client = Arc::new(failing_scan());
    let orchestrator = PhaseOrchestrator::new(
        config_with_policy(FailurePolicy::Abort),
        stub_dispatcher(client.clone()),
    );

    let report = orchestrator.run("10.0.0.5", &Phase::ALL).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert!(report.is_aborted());
    let statuses: Vec<_> = report
        .assessment
        .outcomes()
        .iter()
        .map(|o| o.status())
        .collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Succeeded,
            OutcomeStatus::Failed,
            OutcomeStatus::Skipped,
            OutcomeStatus::Skipped,
        ]
    );
    assert_eq!(
        client.calls(),
        vec![stub_endpoint(Phase::Recon), stub_endpoint(Phase::Scan)]
    );
    assert!(report.assessment.aborted().unwrap().contains("scan"));
}

#[tokio::test]
async fn continue_policy_attempts_every_phase() {
    let client = Arc::new(failing_scan());
    let orchestrator = PhaseOrchestrator::new(
        config_with_policy(FailurePolicy::Continue),
        stub_dispatcher(client.clone()),
    );

    let report = orchestrator.run("10.0.0.5", &Phase::ALL).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 0);
    assert_eq!(client.calls().len(), 4);
    assert!(report.assessment.aborted().is_none());
}

#[tokio::test]
async fn every_phase_failing_still_yields_complete_record() {
    let client = ScriptedClient::new();
    let orchestrator = PhaseOrchestrator::new(
        config_with_policy(FailurePolicy::Continue),
        stub_dispatcher(Arc::new(client)),
    );

    let report = orchestrator.run("10.0.0.5", &Phase::ALL).await.unwrap();

    assert_eq!(report.assessment.outcomes().len(), 4);
    assert_eq!(report.failed(), 4);
    assert_eq!(report.state, RunState::Completed);
}

// ============================================================================
// Pre-dispatch rejection
// ============================================================================

#[tokio::test]
async fn rejected_target_dispatches_nothing() {
    let client = Arc::new(ScriptedClient::new().ok(Phase::Recon, ok_body()));
    let orchestrator = PhaseOrchestrator::new(
        config_with_policy(FailurePolicy::Continue),
        stub_dispatcher(client.clone()),
    );

    let err = orchestrator
        .run("10.0.0.5; rm -rf /", &[Phase::Recon])
        .await
        .unwrap_err();

    assert!(matches!(err, TestudoError::Target(_)), "{err:?}");
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn missing_endpoint_fails_before_any_dispatch() {
    let client = Arc::new(ScriptedClient::new().ok(Phase::Recon, ok_body()));
    let config = Arc::new(AssessmentConfig {
        phases: vec![phase_entry(Phase::Recon, "stub://recon")],
        ..AssessmentConfig::default()
    });
    let dispatcher = ServiceDispatcher::from_config(&config, client.clone());

    let err = PhaseOrchestrator::new(config, dispatcher)
        .run("10.0.0.5", &[Phase::Recon, Phase::Scan])
        .await
        .unwrap_err();

    assert!(matches!(err, TestudoError::Config(_)), "{err:?}");
    assert!(err.to_string().contains("scan"), "{err}");
    assert!(client.calls().is_empty());
}

// ============================================================================
// Cancellation and concurrency
// ============================================================================

/// Cancelling mid-run lets the in-flight phase finish, then skips the rest.
#[tokio::test]
async fn cancellation_stops_at_phase_boundary() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let client = Arc::new(
        ScriptedClient::new()
            .ok(Phase::Recon, ok_body())
            .ok(Phase::Scan, ok_body())
            .on_call(move |_| trigger.cancel()),
    );
    let orchestrator = PhaseOrchestrator::new(
        config_with_policy(FailurePolicy::Continue),
        stub_dispatcher(client.clone()),
    )
    .with_cancellation(cancel);

    let report = orchestrator.run("10.0.0.5", &Phase::ALL).await.unwrap();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(client.calls().len(), 1);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.skipped(), 3);
    assert_eq!(report.assessment.aborted(), Some("cancelled by operator"));
}

#[tokio::test]
async fn independent_phases_share_a_batch() {
    let mut config = AssessmentConfig::default();
    config.execution.mode = ExecutionMode::Concurrent;
    config.advisory.enabled = false;
    for entry in &mut config.phases {
        entry.independent = entry.phase == Phase::Scan;
    }

    let client = Arc::new(
        ScriptedClient::new()
            .ok(Phase::Recon, ok_body())
            .ok(Phase::Scan, ok_body())
            .ok(Phase::Exploit, ok_body())
            .ok(Phase::PostExploit, ok_body()),
    );
    let report = PhaseOrchestrator::new(Arc::new(config), stub_dispatcher(client.clone()))
        .run("10.0.0.5", &Phase::ALL)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.succeeded(), 4);
    let phases: Vec<_> = report.assessment.outcomes().iter().map(|o| o.phase()).collect();
    assert_eq!(phases, Phase::ALL.to_vec(), "record keeps configured order");
}

/// Recon and scan run side by side; scan fails under abort. Both carry
/// real outcomes because abort is only checked once the batch is done.
#[tokio::test]
async fn abort_waits_for_the_whole_batch() {
    let mut config = AssessmentConfig::default();
    config.execution.mode = ExecutionMode::Concurrent;
    config.execution.on_failure = FailurePolicy::Abort;
    config.advisory.enabled = false;
    for entry in &mut config.phases {
        entry.independent = entry.phase == Phase::Scan;
    }

    let client = Arc::new(
        ScriptedClient::new()
            .ok(Phase::Recon, ok_body())
            .err(Phase::Scan, ClientError::Remote("scanner crashed".into()))
            .ok(Phase::Exploit, ok_body())
            .ok(Phase::PostExploit, ok_body())
            .rendezvous(&[Phase::Recon, Phase::Scan]),
    );
    let orchestrator = PhaseOrchestrator::new(Arc::new(config), stub_dispatcher(client.clone()));

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run("10.0.0.5", &Phase::ALL),
    )
    .await
    .expect("recon and scan overlap")
    .unwrap();

    assert_eq!(report.state, RunState::Aborted);
    let statuses: Vec<_> = report.assessment.outcomes().iter().map(|o| o.status()).collect();
    assert_eq!(
        statuses,
        [
            OutcomeStatus::Succeeded,
            OutcomeStatus::Failed,
            OutcomeStatus::Skipped,
            OutcomeStatus::Skipped,
        ]
    );
    assert_eq!(client.calls().len(), 2);
    assert!(report.assessment.aborted().is_some_and(|r| r.contains("scan")));
}

// ============================================================================
// Properties
// ============================================================================

fn phase_subset() -> impl Strategy<Value = Vec<Phase>> {
    proptest::sample::subsequence(Phase::ALL.to_vec(), 1..=Phase::ALL.len())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every selected phase gets exactly one outcome, in order, and under
    /// abort nothing after the first failure is attempted.
    #[test]
    fn one_outcome_per_selected_phase(
        phases in phase_subset(),
        failing in proptest::collection::vec(any::<bool>(), Phase::ALL.len()),
        abort in any::<bool>(),
    ) {
        let mut client = ScriptedClient::new();
        for (phase, fails) in Phase::ALL.iter().zip(&failing) {
            client = if *fails {
                client.err(*phase, ClientError::Protocol("bad".into()))
            } else {
                client.ok(*phase, ok_body())
            };
        }
        let policy = if abort { FailurePolicy::Abort } else { FailurePolicy::Continue };

        let report = tokio_test::block_on(
            PhaseOrchestrator::new(config_with_policy(policy), stub_dispatcher(Arc::new(client)))
                .run("10.0.0.5", &phases),
        ).unwrap();

        let outcomes = report.assessment.outcomes();
        prop_assert_eq!(outcomes.len(), phases.len());
        for (outcome, phase) in outcomes.iter().zip(&phases) {
            prop_assert_eq!(outcome.phase(), *phase);
        }

        let first_failure = outcomes.iter().position(|o| o.status() == OutcomeStatus::Failed);
        match (abort, first_failure) {
            (true, Some(idx)) => {
                prop_assert!(report.is_aborted());
                prop_assert!(outcomes[idx + 1..].iter().all(|o| o.status() == OutcomeStatus::Skipped));
            }
            _ => {
                prop_assert_eq!(report.state, RunState::Completed);
                prop_assert_eq!(report.skipped(), 0);
            }
        }
    }
}
