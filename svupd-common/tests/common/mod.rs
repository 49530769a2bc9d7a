#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use svupd_common::testing::RecordingNotifier;
use svupd_common::{ConfigStore, MemoryStore, Supervisor, SupervisorConfig};
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = fmt()
            .with_test_writer()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .try_init();
    });
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}

/// Supervisor over a throwaway directory, an in-memory store and a recording
/// notifier.
pub struct Sandbox {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: SupervisorConfig,
}

impl Sandbox {
    /// `engine` is a shell script standing in for the update engine.
    pub fn new(engine: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = SupervisorConfig::rooted_at(dir.path());
        config.engine.command = vec!["sh".to_string(), "-c".to_string(), engine.to_string()];
        let store = Arc::new(MemoryStore::new());
        store
            .set("updater", "override", "disable", "0")
            .expect("Failed to enable autorun");
        Self {
            dir,
            store,
            notifier: Arc::new(RecordingNotifier::new()),
            config,
        }
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            self.config.clone(),
            self.store.clone(),
            self.notifier.clone(),
        )
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn read(&self, path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }
}
