use crate::common::{Device, assert_contains, assert_exit_code, init_test_logging};

#[test]
fn test_missing_explicit_config_is_fatal() {
    init_test_logging();
    let device = Device::new("true");
    let missing = device.path("nope.toml");

    let output = device
        .svupd()
        .arg("--config")
        .arg(&missing)
        .arg("status")
        .output()
        .expect("Failed to run svupd");
    assert_exit_code(&output, 1);
    assert_contains(&String::from_utf8_lossy(&output.stderr), "nope.toml");
}

#[test]
fn test_invalid_env_override_is_reported() {
    init_test_logging();
    let device = Device::new("true");

    let output = device
        .svupd()
        .env("SVUPD_ENGINE_TIMEOUT_SECS", "forever")
        .arg("status")
        .output()
        .expect("Failed to run svupd");
    assert_exit_code(&output, 1);
    assert_contains(
        &String::from_utf8_lossy(&output.stderr),
        "SVUPD_ENGINE_TIMEOUT_SECS",
    );
}

#[test]
fn test_lists_show_json_without_definitions() {
    init_test_logging();
    let device = Device::new("true");

    let output = device.run(&["--json", "lists", "show"]);
    assert_exit_code(&output, 0);
    let lists: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(lists, serde_json::json!({}));
}
