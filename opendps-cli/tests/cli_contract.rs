//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("dpsctl")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dpsctl"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("dpsctl"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dpsctl"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn missing_subcommand_fails_with_usage() {
    let mut cmd = cli_cmd();
    cmd.assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn unknown_command_fails_with_usage_error() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("query")
        .arg("--jason") // typo for --json
        .assert()
        .failure()
        .stderr(predicate::str::contains("json").or(predicate::str::contains("did you mean")));
}

#[test]
fn voltage_requires_value() {
    let mut cmd = cli_cmd();
    cmd.arg("voltage")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty().not());
}

#[test]
fn voltage_rejects_non_numeric_value() {
    let mut cmd = cli_cmd();
    cmd.args(["voltage", "lots"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn brightness_rejects_out_of_range() {
    let mut cmd = cli_cmd();
    cmd.args(["brightness", "150"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("100"));
}

#[test]
fn upgrade_with_missing_file_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("no_such_firmware.bin");

    let mut cmd = cli_cmd();
    cmd.arg("--port")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("upgrade")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty().not());
}

#[test]
fn ping_with_invalid_port_fails() {
    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--port")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("ping")
        .output()
        .expect("command should execute");

    assert!(!output.status.success(), "invalid port should not succeed");
}

#[test]
fn list_ports_json_returns_valid_json() {
    // In environments without serial ports, this still exercises the JSON
    // output path.
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&stdout) {
        assert!(parsed.is_array(), "list-ports --json should return an array");
    }
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_dpsctl()"));
}

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd.arg("--help").assert().success().get_output().clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

#[test]
fn env_variable_sets_port() {
    // DPSCTL_PORT feeds --port; an invalid port must fail the same way the
    // flag does.
    let mut cmd = cli_cmd();
    let output = cmd
        .env("DPSCTL_PORT", "INVALID_PORT_NAME_XYZ")
        .arg("ping")
        .output()
        .expect("command should execute");
    assert!(!output.status.success());
}
