mod common;

use std::path::Path;

use common::{MockService, TestudoProcess, ok_body, unreachable_endpoint, write_file};

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn only_file(dir: &Path) -> std::path::PathBuf {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("{} unreadable: {e}", dir.display()))
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected one file in {}", dir.display());
    entries.remove(0)
}

// ============================================================================
// version / phases
// ============================================================================

#[test]
fn version_human() {
    let output = TestudoProcess::spawn_command(&["version"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.starts_with("testudo "), "{out}");
    assert!(out.contains('.'), "version output should contain a version number: {out}");
}

#[test]
fn version_json() {
    let output = TestudoProcess::spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let parsed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed["name"], "testudo");
    assert!(parsed["version"].is_string());
}

#[test]
fn phases_json_lists_all_in_order() {
    let output = TestudoProcess::spawn_command(&["phases", "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let parsed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let ids: Vec<_> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["recon", "scan", "exploit", "post_exploit"]);
}

#[test]
fn unknown_subcommand_is_usage_error() {
    let output = TestudoProcess::spawn_command(&["frobnicate"]);
    assert_eq!(output.status.code(), Some(2));
}

// ============================================================================
// init
// ============================================================================

#[tokio::test]
async fn init_writes_valid_config_and_refuses_overwrite() {
    let dir = tempfile::tempdir().unwrap();

    let first = TestudoProcess::run_in(dir.path(), &["init"]).await;
    assert!(first.status.success(), "{}", stderr(&first));
    assert!(dir.path().join("testudo.yaml").is_file());

    let validate = TestudoProcess::run_in(dir.path(), &["validate", "testudo.yaml"]).await;
    assert!(validate.status.success(), "{}", stdout(&validate));

    let second = TestudoProcess::run_in(dir.path(), &["init"]).await;
    assert_eq!(second.status.code(), Some(64), "{}", stderr(&second));
    assert!(stderr(&second).contains("--force"));

    let forced = TestudoProcess::run_in(dir.path(), &["init", "--force"]).await;
    assert!(forced.status.success(), "{}", stderr(&forced));
}

// ============================================================================
// attack
// ============================================================================

#[tokio::test]
async fn attack_rejects_bad_target_with_exit_5() {
    let dir = tempfile::tempdir().unwrap();
    let output = TestudoProcess::run_in(dir.path(), &["attack", "not a host!"]).await;

    assert_eq!(output.status.code(), Some(5), "{}", stderr(&output));
    assert!(!dir.path().join("reports").exists(), "no artifacts for a rejected target");
}

#[tokio::test]
async fn attack_with_unconfigured_phase_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "testudo.yaml",
        "phases:\n  - phase: recon\n    endpoint: http://127.0.0.1:1\nadvisory:\n  enabled: false\n",
    );
    let output =
        TestudoProcess::run_in(dir.path(), &["attack", "10.0.0.5", "--phases", "scan"]).await;

    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
}

fn attack_config(recon: &str, scan: &str, exploit: &str) -> String {
    format!(
        "phases:\n\
         \x20 - phase: recon\n    endpoint: {recon}\n\
         \x20 - phase: scan\n    endpoint: {scan}\n\
         \x20 - phase: exploit\n    endpoint: {exploit}\n\
         retry:\n  attempts: 0\n\
         timeout: 5s\n\
         advisory:\n  enabled: false\n\
         output:\n  reports_dir: out/reports\n  playbooks_dir: out/playbooks\n"
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn attack_continues_past_failure_and_writes_artifacts() {
    let recon = MockService::phase(ok_body()).await;
    let exploit = MockService::phase(serde_json::json!({
        "status": "completed",
        "findings": [],
        "steps": [{"command": "msfconsole -q -x 'use auxiliary/scanner/ssh'", "result": "no session"}]
    }))
    .await;
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "assessment.yaml",
        &attack_config(&recon.url, &unreachable_endpoint(), &exploit.url),
    );

    let output = TestudoProcess::run_in(
        dir.path(),
        &[
            "attack",
            "10.0.0.5",
            "--config",
            "assessment.yaml",
            "--events-file",
            "events.jsonl",
        ],
    )
    .await;

    assert!(output.status.success(), "{}", stderr(&output));
    let summary = stdout(&output);
    assert!(summary.contains("completed"), "{summary}");
    assert!(summary.contains("recon"), "{summary}");

    let report = only_file(&dir.path().join("out/reports"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["outcomes"][0]["status"], "Succeeded");
    assert_eq!(json["outcomes"][1]["status"], "Failed");
    assert_eq!(json["outcomes"][1]["error"]["kind"], "transport");
    assert_eq!(json["outcomes"][2]["status"], "Succeeded");

    let playbook = std::fs::read_to_string(only_file(&dir.path().join("out/playbooks"))).unwrap();
    assert!(playbook.contains("msfconsole"), "{playbook}");

    let events = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    let first: serde_json::Value = serde_json::from_str(events.lines().next().unwrap()).unwrap();
    assert_eq!(first["type"], "AssessmentStarted");
    assert_eq!(first["sequence"], 0);
    assert!(events.contains("AssessmentFinished"));
}

#[tokio::test(flavor = "multi_thread")]
async fn attack_abort_policy_exits_4_and_still_reports() {
    let recon = MockService::phase(ok_body()).await;
    let exploit = MockService::phase(ok_body()).await;
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "assessment.yaml",
        &attack_config(&recon.url, &unreachable_endpoint(), &exploit.url),
    );

    let output = TestudoProcess::run_in(
        dir.path(),
        &[
            "attack",
            "10.0.0.5",
            "-c",
            "assessment.yaml",
            "--abort-on-failure",
        ],
    )
    .await;

    assert_eq!(output.status.code(), Some(4), "{}", stderr(&output));
    assert_eq!(exploit.hits(), 0);

    let report = only_file(&dir.path().join("out/reports"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["outcomes"][2]["status"], "Skipped");
    assert!(json["aborted"].as_str().unwrap().contains("scan"));
}

#[tokio::test(flavor = "multi_thread")]
async fn attack_mode_limits_phases() {
    let recon = MockService::phase(ok_body()).await;
    let scan = MockService::phase(ok_body()).await;
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "assessment.yaml",
        &attack_config(&recon.url, &scan.url, &unreachable_endpoint()),
    );

    let output = TestudoProcess::run_in(
        dir.path(),
        &["attack", "10.0.0.5", "-c", "assessment.yaml", "--mode", "recon", "-q"],
    )
    .await;

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).is_empty(), "quiet run printed a summary");
    assert_eq!(recon.hits(), 1);
    assert_eq!(scan.hits(), 0);
}
