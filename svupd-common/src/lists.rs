//! Optional package lists the user can enable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};
use crate::fsutil::{ReadOutcome, read_text};
use crate::settings::UpdaterSettings;

/// Definition of one list as shipped in the definitions file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListDefinition {
    pub visible: bool,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// A list joined with its enabled state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserList {
    pub enabled: bool,
    pub hidden: bool,
    pub title: Option<String>,
    pub message: Option<String>,
}

/// Read the definitions file. A missing file means no lists.
pub fn load_definitions(path: &Path) -> Result<BTreeMap<String, ListDefinition>> {
    match read_text(path) {
        ReadOutcome::Found(content) => Ok(serde_json::from_str(&content)?),
        ReadOutcome::Absent => Ok(BTreeMap::new()),
        ReadOutcome::IoFailure(err) => Err(SupervisorError::io(
            format!("failed to read {}", path.display()),
            err,
        )),
    }
}

/// All defined lists keyed by name. Enabled names without a definition are
/// ignored.
pub fn userlists(definitions: &Path, settings: &UpdaterSettings) -> Result<BTreeMap<String, UserList>> {
    let mut result: BTreeMap<String, UserList> = load_definitions(definitions)?
        .into_iter()
        .map(|(name, def)| {
            let list = UserList {
                enabled: false,
                hidden: !def.visible,
                title: def.title,
                message: def.description,
            };
            (name, list)
        })
        .collect();

    for name in settings.enabled_userlists()? {
        if let Some(list) = result.get_mut(&name) {
            list.enabled = true;
        }
    }
    Ok(result)
}

/// Enable exactly `names`; every other list is disabled.
pub fn update_userlists(
    definitions: &Path,
    settings: &UpdaterSettings,
    names: &[String],
) -> Result<()> {
    let known: BTreeSet<String> = load_definitions(definitions)?.into_keys().collect();
    if let Some(unknown) = names.iter().find(|name| !known.contains(*name)) {
        return Err(SupervisorError::NoSuchList(unknown.clone()));
    }
    settings.set_enabled_userlists(names)
}
