//! Integration tests for the split-replay command-line interface

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use splitcontrol::MeasurementSample;
use std::io::Write;
use tempfile::NamedTempFile;

/// Helper function to create a command instance for the split-replay binary
fn cli_command() -> Command {
    Command::cargo_bin("split-replay").expect("Failed to find split-replay binary")
}

fn write_scenario(value: &serde_json::Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    write!(file, "{}", value).expect("Failed to write scenario");
    file
}

fn congested_then_failed() -> serde_json::Value {
    let sample = MeasurementSample::new(&[0, 1])
        .with_packets(&[100, 300])
        .with_violations(&[10, 30]);
    json!({
        "name": "congested-then-failed",
        "description": "Heavy congestion followed by a link failure",
        "links": [0, 1],
        "config": {"mode": "congestion-aware-proportional", "granularity": 8},
        "steps": [
            {"at-ms": 0, "sample": sample},
            {"at-ms": 1000, "link-down": 1},
            {"at-ms": 1500, "link-up": 1}
        ]
    })
}

#[test]
fn test_cli_help() {
    let mut cmd = cli_command();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("options"));
}

#[test]
fn test_cli_options_lists_defaults() {
    let mut cmd = cli_command();
    cmd.arg("options");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Controller options:"))
        .stdout(predicate::str::contains("granularity"))
        .stdout(predicate::str::contains("rounding-bias"));
}

#[test]
fn test_cli_run_prints_decisions() {
    let scenario = write_scenario(&congested_then_failed());

    let mut cmd = cli_command();
    cmd.arg("run").arg(scenario.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""shares":[2,6]"#))
        .stdout(predicate::str::contains(r#""event":"link-down""#))
        .stdout(predicate::str::contains(r#""shares":[8,0]"#));
}

#[test]
fn test_cli_run_reports_step_errors() {
    // QoS admission needs a qos-steer controller.
    let mut value = congested_then_failed();
    value["steps"] = json!([{"at-ms": 500, "qos-request": 1}]);
    let scenario = write_scenario(&value);

    let mut cmd = cli_command();
    cmd.arg("run").arg(scenario.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Step 0 failed"));
}

#[test]
fn test_cli_run_only_updates() {
    let mut value = congested_then_failed();
    value["steps"] = json!([{"at-ms": 1500, "link-up": 1}]);
    let scenario = write_scenario(&value);

    let mut cmd = cli_command();
    cmd.args(["run", "--only-updates"]).arg(scenario.path());
    cmd.assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn test_cli_run_rejects_bad_override() {
    let scenario = write_scenario(&congested_then_failed());

    let mut cmd = cli_command();
    cmd.args(["run", "--set", "granularity=3"]).arg(scenario.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid option override"));
}

#[test]
fn test_cli_run_missing_file() {
    let mut cmd = cli_command();
    cmd.args(["run", "/nonexistent/scenario.json"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read scenario file"));
}
