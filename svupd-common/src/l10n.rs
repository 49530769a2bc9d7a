//! Localisation packages for system packages.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{Result, SupervisorError};
use crate::fsutil::{ReadOutcome, read_text};
use crate::settings::UpdaterSettings;

/// Language codes listed in the supported-languages file, one per line.
pub fn supported_languages(path: &Path) -> Result<BTreeSet<String>> {
    match read_text(path) {
        ReadOutcome::Found(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        ReadOutcome::Absent => Ok(BTreeSet::new()),
        ReadOutcome::IoFailure(err) => Err(SupervisorError::io(
            format!("failed to read {}", path.display()),
            err,
        )),
    }
}

/// Every known language code with its enabled state.
///
/// Enabled codes missing from the supported file are still reported.
pub fn languages(supported: &Path, settings: &UpdaterSettings) -> Result<BTreeMap<String, bool>> {
    let mut result: BTreeMap<String, bool> = supported_languages(supported)?
        .into_iter()
        .map(|code| (code, false))
        .collect();
    for code in settings.enabled_languages()? {
        result.insert(code, true);
    }
    Ok(result)
}

/// Enable exactly `codes`. Unsupported codes are rejected.
pub fn update_languages(supported: &Path, settings: &UpdaterSettings, codes: &[String]) -> Result<()> {
    let known = supported_languages(supported)?;
    if let Some(unknown) = codes.iter().find(|code| !known.contains(*code)) {
        return Err(SupervisorError::NoSuchLanguage(unknown.clone()));
    }
    settings.set_enabled_languages(codes)
}
