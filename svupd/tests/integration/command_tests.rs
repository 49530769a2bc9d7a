use std::process::Command;

use crate::common::{
    Device, assert_contains, assert_exit_code, assert_path_missing, init_test_logging,
};

#[test]
fn test_svupd_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_svupd_help_includes_description");

    let output = Command::new(env!("CARGO_BIN_EXE_svupd"))
        .arg("--help")
        .output()
        .expect("Failed to run svupd --help");

    assert!(output.status.success(), "svupd --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "Updater supervisor");
    assert_contains(&stdout, "approvals");
    crate::test_log!("TEST PASS: test_svupd_help_includes_description");
}

#[test]
fn test_status_json_when_idle() {
    init_test_logging();
    let device = Device::new("true");

    let output = device.run(&["--json", "status"]);
    assert_exit_code(&output, 0);

    let status: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status output is JSON");
    assert_eq!(status["running"], false);
    assert_eq!(status["pid"], serde_json::Value::Null);
    assert_eq!(status["opkg_locked"], false);
}

#[test]
fn test_run_returns_engine_exit_code() {
    init_test_logging();
    crate::test_log!("TEST START: test_run_returns_engine_exit_code");
    let device = Device::new("echo engine ran; exit 3");

    let output = device.run(&["run"]);
    assert_exit_code(&output, 3);
    assert_path_missing(&device.path("updater-supervisor.pid"));

    let log = std::fs::read_to_string(device.path("svupd.log")).unwrap_or_default();
    assert_contains(&log, "Update engine exited with: 3");
    crate::test_log!("TEST PASS: test_run_returns_engine_exit_code");
}

#[test]
fn test_run_rejects_multiline_hook() {
    init_test_logging();
    let device = Device::new("true");

    let output = device.run(&["run", "--hook", "echo a\necho b"]);
    assert_exit_code(&output, 1);
    assert_contains(
        &String::from_utf8_lossy(&output.stderr),
        "hook command has to be a single line",
    );
    assert_path_missing(&device.path("updater-supervisor.pid"));
}

#[test]
fn test_approvals_show_without_request() {
    init_test_logging();
    let device = Device::new("true");

    let output = device.run(&["approvals", "show"]);
    assert_exit_code(&output, 0);
    assert_contains(&String::from_utf8_lossy(&output.stdout), "No approval request");
}
