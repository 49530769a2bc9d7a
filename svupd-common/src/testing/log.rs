//! JSONL logging for test runs.
//!
//! Call [`init_global_test_logging`] once, typically from a `ctor` in the
//! integration test crate:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     svupd_common::testing::init_global_test_logging();
//! }
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;

use serde::Serialize;
use tracing_subscriber::prelude::*;

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install a subscriber writing JSON lines to
/// `target/test-logs/all_tests.jsonl` plus compact lines to the test writer.
///
/// `SVUPD_TEST_LOG_FILE` overrides the file, `SVUPD_TEST_LOG_LEVEL` the
/// filter. Safe to call repeatedly.
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let level = std::env::var("SVUPD_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("SVUPD_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

/// Outcome record emitted by [`TestLogger::finish`].
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub duration_ms: u64,
}

/// Emits start and finish events for one test.
#[derive(Debug)]
pub struct TestLogger {
    test_name: String,
    started: Instant,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        tracing::info!(test = test_name, "TEST START");
        Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        tracing::info!(test = %self.test_name, "{}", message.as_ref());
    }

    pub fn finish(self, passed: bool) -> TestResult {
        let result = TestResult {
            test_name: self.test_name,
            passed,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            test = %result.test_name,
            passed = result.passed,
            duration_ms = result.duration_ms,
            "TEST END"
        );
        result
    }
}
