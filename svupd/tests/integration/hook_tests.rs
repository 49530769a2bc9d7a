use std::fs;

use crate::common::{Device, assert_exit_code, assert_path_missing, init_test_logging};

#[test]
fn test_hook_runs_immediately_without_supervisor() {
    init_test_logging();
    crate::test_log!("TEST START: test_hook_runs_immediately_without_supervisor");
    let device = Device::new("true");
    let marker = device.path("marker");

    let output = device.run(&["hook", &format!("echo hooked > {}", marker.display())]);
    assert_exit_code(&output, 0);
    assert_eq!(fs::read_to_string(&marker).unwrap(), "hooked\n");
    assert_path_missing(&device.path("updater-postrun-hook"));
    crate::test_log!("TEST PASS: test_hook_runs_immediately_without_supervisor");
}

#[test]
fn test_hook_exit_code_is_forwarded() {
    init_test_logging();
    let device = Device::new("true");
    let output = device.run(&["hook", "exit 4"]);
    assert_exit_code(&output, 4);
}

#[test]
fn test_run_hooks_execute_after_engine() {
    init_test_logging();
    let device = Device::new("true");
    let marker = device.path("marker");
    let hook = format!("echo after >> {}", marker.display());

    let output = device.run(&["run", "--hook", &hook, "--hook", &hook]);
    assert_exit_code(&output, 0);
    assert_eq!(fs::read_to_string(&marker).unwrap(), "after\nafter\n");
}
