//! Device configuration store.
//!
//! The supervisor never owns the device configuration. It reads and writes
//! individual options addressed by `(package, section, option)` through the
//! [`ConfigStore`] trait; on a device that is the `uci` command line.

use std::collections::BTreeMap;
use std::process::{Command, Output, Stdio};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, SupervisorError};

/// Key-value access to the device configuration.
pub trait ConfigStore: Send + Sync {
    /// Single option value, `None` when unset.
    fn get(&self, package: &str, section: &str, option: &str) -> Result<Option<String>>;

    /// List option values, empty when unset.
    fn get_list(&self, package: &str, section: &str, option: &str) -> Result<Vec<String>>;

    /// Set an option, creating its section (typed after its name) if needed.
    fn set(&self, package: &str, section: &str, option: &str, value: &str) -> Result<()>;

    /// Replace a list option with `values`.
    fn set_list(&self, package: &str, section: &str, option: &str, values: &[String])
    -> Result<()>;

    /// Remove an option. Removing an unset option is not an error.
    fn delete(&self, package: &str, section: &str, option: &str) -> Result<()>;
}

/// [`ConfigStore`] backed by the `uci` command line tool.
#[derive(Debug, Clone)]
pub struct UciStore {
    binary: String,
}

impl UciStore {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn uci(&self, args: &[&str]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "Calling uci");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SupervisorError::Spawn {
                program: self.binary.clone(),
                source,
            })
    }

    fn uci_checked(&self, args: &[&str]) -> Result<()> {
        let output = self.uci(args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SupervisorError::ConfigStore(format!(
                "{} {} failed: {}",
                self.binary,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn commit(&self, package: &str) -> Result<()> {
        self.uci_checked(&["commit", package])
    }

    fn ensure_section(&self, package: &str, section: &str) -> Result<()> {
        self.uci_checked(&["set", &format!("{package}.{section}={section}")])
    }
}

impl Default for UciStore {
    fn default() -> Self {
        Self::new("uci")
    }
}

impl ConfigStore for UciStore {
    fn get(&self, package: &str, section: &str, option: &str) -> Result<Option<String>> {
        let output = self.uci(&["-q", "get", &format!("{package}.{section}.{option}")])?;
        // uci exits non-zero for missing entries; with -q it prints nothing.
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        Ok(Some(value))
    }

    fn get_list(&self, package: &str, section: &str, option: &str) -> Result<Vec<String>> {
        Ok(self
            .get(package, section, option)?
            .map(|value| value.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default())
    }

    fn set(&self, package: &str, section: &str, option: &str, value: &str) -> Result<()> {
        self.ensure_section(package, section)?;
        self.uci_checked(&["set", &format!("{package}.{section}.{option}={value}")])?;
        self.commit(package)
    }

    fn set_list(
        &self,
        package: &str,
        section: &str,
        option: &str,
        values: &[String],
    ) -> Result<()> {
        self.ensure_section(package, section)?;
        let key = format!("{package}.{section}.{option}");
        // Missing option is fine here.
        let _ = self.uci(&["-q", "delete", &key])?;
        for value in values {
            self.uci_checked(&["add_list", &format!("{key}={value}")])?;
        }
        self.commit(package)
    }

    fn delete(&self, package: &str, section: &str, option: &str) -> Result<()> {
        let _ = self.uci(&["-q", "delete", &format!("{package}.{section}.{option}")])?;
        self.commit(package)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StoredValue {
    Single(String),
    List(Vec<String>),
}

type Key = (String, String, String);

fn key(package: &str, section: &str, option: &str) -> Key {
    (package.to_string(), section.to_string(), option.to_string())
}

/// In-process [`ConfigStore`], used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<Key, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut BTreeMap<Key, StoredValue>) -> T) -> Result<T> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| SupervisorError::ConfigStore("memory store poisoned".to_string()))?;
        Ok(f(&mut values))
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, package: &str, section: &str, option: &str) -> Result<Option<String>> {
        self.with_values(|values| {
            values
                .get(&key(package, section, option))
                .map(|value| match value {
                    StoredValue::Single(value) => value.clone(),
                    StoredValue::List(items) => items.join(" "),
                })
        })
    }

    fn get_list(&self, package: &str, section: &str, option: &str) -> Result<Vec<String>> {
        self.with_values(|values| match values.get(&key(package, section, option)) {
            Some(StoredValue::List(items)) => items.clone(),
            Some(StoredValue::Single(value)) => vec![value.clone()],
            None => Vec::new(),
        })
    }

    fn set(&self, package: &str, section: &str, option: &str, value: &str) -> Result<()> {
        self.with_values(|values| {
            values.insert(
                key(package, section, option),
                StoredValue::Single(value.to_string()),
            );
        })
    }

    fn set_list(
        &self,
        package: &str,
        section: &str,
        option: &str,
        items: &[String],
    ) -> Result<()> {
        self.with_values(|values| {
            values.insert(
                key(package, section, option),
                StoredValue::List(items.to_vec()),
            );
        })
    }

    fn delete(&self, package: &str, section: &str, option: &str) -> Result<()> {
        self.with_values(|values| {
            values.remove(&key(package, section, option));
        })
    }
}
