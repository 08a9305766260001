//! CLI integration tests

use std::process::Command;

fn bufferctl(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "bufferctl", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = bufferctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("autoscaling buffer"),
        "Should show app description"
    );
    assert!(stdout.contains("ensure"), "Should show ensure command");
    assert!(stdout.contains("size"), "Should show size command");
    assert!(stdout.contains("status"), "Should show status command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = bufferctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("bufferctl"), "Should show binary name");
}

/// Test ensure subcommand help
#[test]
fn test_ensure_help() {
    let output = bufferctl(&["ensure", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Ensure help should succeed");
    assert!(
        stdout.contains("--namespace"),
        "Should show namespace option"
    );
    assert!(stdout.contains("--timeout"), "Should show timeout option");
}

/// Test status subcommand help
#[test]
fn test_status_help() {
    let output = bufferctl(&["status", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Status help should succeed");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test that an unknown subcommand is rejected
#[test]
fn test_unknown_command_fails() {
    let output = bufferctl(&["resize"]);
    assert!(!output.status.success(), "Unknown command should fail");
}
