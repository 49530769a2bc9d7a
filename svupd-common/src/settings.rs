//! Typed access to the updater options in the device configuration store.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::store::ConfigStore;

const PACKAGE: &str = "updater";

/// Branch used when none is configured.
pub const DEFAULT_BRANCH: &str = "deploy";

/// Updater switches stored in the `updater` configuration package.
#[derive(Clone)]
pub struct UpdaterSettings {
    store: Arc<dyn ConfigStore>,
}

impl UpdaterSettings {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Whether the updater may be started automatically.
    ///
    /// Stored inverted as `updater.override.disable`. A device that never
    /// set the option is disabled.
    pub fn enabled(&self) -> Result<bool> {
        Ok(self
            .flag("override", "disable")?
            .is_some_and(|disabled| !disabled))
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .set(PACKAGE, "override", "disable", bool_value(!enabled))
    }

    /// Whether plans need explicit approval (`updater.approvals.need`).
    pub fn approvals_needed(&self) -> Result<bool> {
        Ok(self.flag("approvals", "need")?.unwrap_or(false))
    }

    pub fn set_approvals_needed(&self, needed: bool) -> Result<()> {
        self.store
            .set(PACKAGE, "approvals", "need", bool_value(needed))
    }

    /// Time after which a pending approval counts as granted.
    pub fn auto_grant_window(&self) -> Result<Option<Duration>> {
        let Some(raw) = self.store.get(PACKAGE, "approvals", "auto_grant_seconds")? else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs as u64))),
            Ok(_) => Ok(None),
            Err(_) => {
                warn!("Ignoring invalid auto_grant_seconds value: {}", raw);
                Ok(None)
            }
        }
    }

    /// Set the auto-grant window; `None` (or a zero window) disables it.
    pub fn set_auto_grant_window(&self, window: Option<Duration>) -> Result<()> {
        match window.filter(|w| w.as_secs() > 0) {
            Some(window) => self.store.set(
                PACKAGE,
                "approvals",
                "auto_grant_seconds",
                &window.as_secs().to_string(),
            ),
            None => self.store.delete(PACKAGE, "approvals", "auto_grant_seconds"),
        }
    }

    /// Configured OS branch, [`DEFAULT_BRANCH`] when unset or empty.
    pub fn branch(&self) -> Result<String> {
        Ok(self
            .store
            .get(PACKAGE, "override", "branch")?
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()))
    }

    /// Override the branch; `None` returns to the default.
    pub fn set_branch(&self, branch: Option<&str>) -> Result<()> {
        match branch.map(str::trim).filter(|b| !b.is_empty()) {
            Some(branch) => self.store.set(PACKAGE, "override", "branch", branch),
            None => self.store.delete(PACKAGE, "override", "branch"),
        }
    }

    pub fn enabled_userlists(&self) -> Result<Vec<String>> {
        self.store.get_list(PACKAGE, "pkglists", "lists")
    }

    pub fn set_enabled_userlists(&self, lists: &[String]) -> Result<()> {
        self.store.set_list(PACKAGE, "pkglists", "lists", lists)
    }

    pub fn enabled_languages(&self) -> Result<Vec<String>> {
        self.store.get_list(PACKAGE, "l10n", "langs")
    }

    pub fn set_enabled_languages(&self, langs: &[String]) -> Result<()> {
        self.store.set_list(PACKAGE, "l10n", "langs", langs)
    }

    fn flag(&self, section: &str, option: &str) -> Result<Option<bool>> {
        let Some(raw) = self.store.get(PACKAGE, section, option)? else {
            return Ok(None);
        };
        let parsed = match raw.trim() {
            "1" | "true" | "yes" | "on" | "enabled" => Some(true),
            "0" | "false" | "no" | "off" | "disabled" => Some(false),
            other => {
                warn!("Ignoring invalid {}.{}.{} value: {}", PACKAGE, section, option, other);
                None
            }
        };
        Ok(parsed)
    }
}

impl std::fmt::Debug for UpdaterSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterSettings").finish_non_exhaustive()
    }
}

fn bool_value(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn settings() -> (Arc<MemoryStore>, UpdaterSettings) {
        let store = Arc::new(MemoryStore::new());
        let settings = UpdaterSettings::new(store.clone());
        (store, settings)
    }

    #[test]
    fn test_enabled_requires_explicit_option() {
        let (store, settings) = settings();
        assert!(!settings.enabled().unwrap());

        settings.set_enabled(false).unwrap();
        assert_eq!(
            store.get("updater", "override", "disable").unwrap().as_deref(),
            Some("1")
        );
        assert!(!settings.enabled().unwrap());

        settings.set_enabled(true).unwrap();
        assert!(settings.enabled().unwrap());
    }

    #[test]
    fn test_invalid_flag_reads_as_unset() {
        let (store, settings) = settings();
        store.set("updater", "override", "disable", "maybe").unwrap();
        assert!(!settings.enabled().unwrap());
        store.set("updater", "approvals", "need", "maybe").unwrap();
        assert!(!settings.approvals_needed().unwrap());
    }

    #[test]
    fn test_approvals_needed() {
        let (_, settings) = settings();
        assert!(!settings.approvals_needed().unwrap());
        settings.set_approvals_needed(true).unwrap();
        assert!(settings.approvals_needed().unwrap());
    }

    #[test]
    fn test_auto_grant_window() {
        let (store, settings) = settings();
        assert_eq!(settings.auto_grant_window().unwrap(), None);

        settings
            .set_auto_grant_window(Some(Duration::from_secs(7200)))
            .unwrap();
        assert_eq!(
            settings.auto_grant_window().unwrap(),
            Some(Duration::from_secs(7200))
        );

        settings.set_auto_grant_window(None).unwrap();
        assert_eq!(
            store.get("updater", "approvals", "auto_grant_seconds").unwrap(),
            None
        );

        store
            .set("updater", "approvals", "auto_grant_seconds", "-5")
            .unwrap();
        assert_eq!(settings.auto_grant_window().unwrap(), None);
        store
            .set("updater", "approvals", "auto_grant_seconds", "soon")
            .unwrap();
        assert_eq!(settings.auto_grant_window().unwrap(), None);
    }

    #[test]
    fn test_branch_default_and_override() {
        let (store, settings) = settings();
        assert_eq!(settings.branch().unwrap(), "deploy");

        store.set("updater", "override", "branch", "").unwrap();
        assert_eq!(settings.branch().unwrap(), "deploy");

        settings.set_branch(Some("hbk")).unwrap();
        assert_eq!(settings.branch().unwrap(), "hbk");

        settings.set_branch(None).unwrap();
        assert_eq!(settings.branch().unwrap(), "deploy");
    }

    #[test]
    fn test_lists_and_languages() {
        let (_, settings) = settings();
        assert!(settings.enabled_userlists().unwrap().is_empty());

        settings
            .set_enabled_userlists(&["nas".to_string()])
            .unwrap();
        settings
            .set_enabled_languages(&["cs".to_string(), "de".to_string()])
            .unwrap();
        assert_eq!(settings.enabled_userlists().unwrap(), vec!["nas"]);
        assert_eq!(settings.enabled_languages().unwrap(), vec!["cs", "de"]);
    }
}
