//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("caniap");
    cmd.env_remove("CANIAP_PORT")
        .env_remove("CANIAP_BAUD")
        .env_remove("CANIAP_BITRATE")
        .env_remove("CANIAP_NON_INTERACTIVE");
    cmd
}

fn write_image(dir: &std::path::Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..=250u8).cycle().take(len).collect();
    fs::write(&path, data).expect("write image");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("caniap"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("caniap"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_includes_usage_examples() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Examples:"))
        .stdout(predicate::str::contains("caniap flash app.bin"));
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_caniap()"));
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("definitely-not-a-command")
        .assert()
        .code(2);
}

#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--definitely-not-a-flag")
        .assert()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_image_argument() {
    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("IMAGE"));
}

#[test]
fn exit_code_two_for_unsupported_bitrate() {
    let mut cmd = cli_cmd();
    cmd.args(["--bitrate", "123456", "status"])
        .assert()
        .code(2);
}

#[test]
fn exit_code_one_for_missing_image() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("does_not_exist.bin");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg(&missing)
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn exit_code_three_for_explicit_invalid_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("broken.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("list-ports")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn invalid_local_config_only_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("caniap.toml"), "invalid toml [[[").expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(output.status.success(), "command should succeed despite config warning");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn exit_code_four_for_missing_adapter_port() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "app.bin", 64);

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "-p", "INVALID_PORT_NAME_XYZ", "flash"])
        .arg(&image)
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(4), "missing adapter port maps to exit 4");
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error"));
}

// ============================================================================
// Image info
// ============================================================================

#[test]
fn info_json_is_valid_envelope() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "app.bin", 16);

    let output = cli_cmd()
        .args(["info", "--json"])
        .arg(&image)
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["data"]["summary"]["frames"], 2);
    assert_eq!(parsed["data"]["summary"]["pages"], 1);
    assert_eq!(parsed["data"]["pages"][0]["frame_count"], 2);
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.args(["info", "--json"])
        .arg(&missing)
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn info_human_output_goes_to_stderr() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "app.bin", 2008);

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("251"));
}

#[test]
fn misaligned_image_needs_pad() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "odd.bin", 13);

    cli_cmd()
        .arg("info")
        .arg(&image)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("multiple of 8"));

    let output = cli_cmd()
        .args(["info", "--json", "--pad"])
        .arg(&image)
        .output()
        .expect("command should execute");
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["data"]["summary"]["padding"], 3);
    assert_eq!(parsed["data"]["summary"]["len"], 16);
}

#[test]
fn empty_image_is_rejected() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "empty.bin", 0);

    cli_cmd().arg("info").arg(&image).assert().code(1);
}

// ============================================================================
// Ports and flags
// ============================================================================

#[test]
fn list_ports_json_returns_valid_json() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    if output.status.success() {
        let parsed: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
        assert_eq!(parsed["ok"], true);
        assert!(parsed["data"]["ports"].is_array());
    }
}

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    write_image(dir.path(), "-app.bin", 8);

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["info", "--json", "--", "-app.bin"])
        .assert()
        .success();
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("CANIAP_NON_INTERACTIVE", "true")
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.args(["info", "--jsn", "app.bin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--json"));
}
