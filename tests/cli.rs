//! CLI test cases.
//!
//! End-to-end OCR tests need `poppler-utils` and `tesseract` installed, so
//! they are ignored by default. The remaining tests exercise argument
//! handling and input validation only.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("ocr-offload").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_run_missing_input_fails() {
    cmd()
        .arg("run")
        .arg("tests/fixtures/no-such-file.pdf")
        .assert()
        .failure();
}

#[test]
fn test_run_rejects_non_pdf_input() {
    cmd()
        .arg("run")
        .arg("tests/cli.rs")
        .assert()
        .failure()
        .stderr(contains("PDF"));
}

#[test]
fn test_run_remote_requires_service_url() {
    cmd()
        .env_remove("OCR_SERVICE_URL")
        .arg("run")
        .arg("tests/fixtures/blank.pdf")
        .args(["--strategy", "remote"])
        .assert()
        .failure()
        .stderr(contains("--service-url"));
}

#[test]
fn test_run_rejects_zero_iterations() {
    cmd()
        .arg("run")
        .arg("tests/fixtures/blank.pdf")
        .args(["--iterations", "0"])
        .assert()
        .failure()
        .stderr(contains("--iterations"));
}

#[test]
#[ignore = "Requires poppler-utils and tesseract to be installed"]
fn test_run_local_writes_metrics() {
    let tmpdir = tempfile::TempDir::with_prefix("cli").unwrap();
    let metrics_path = tmpdir.path().join("offload-metrics.csv");

    cmd()
        .arg("run")
        .arg("tests/fixtures/blank.pdf")
        .args(["--strategy", "local"])
        .arg("--metrics-path")
        .arg(&metrics_path)
        .assert()
        .success();

    let metrics = std::fs::read_to_string(&metrics_path).unwrap();
    assert!(metrics.starts_with("mode,elapsed_ms,"));
    assert!(metrics.lines().any(|line| line.starts_with("local,")));
}
