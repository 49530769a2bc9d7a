//! Older entry point names, kept for callers written against them.
//!
//! Each one forwards to the current API unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use crate::approvals::{ApprovalGate, ApprovalRequest};
use crate::error::Result;
use crate::lists::{self, UserList};
use crate::settings::UpdaterSettings;

/// Same as [`lists::userlists`].
pub fn pkglists(definitions: &Path, settings: &UpdaterSettings) -> Result<BTreeMap<String, UserList>> {
    lists::userlists(definitions, settings)
}

/// Same as [`lists::update_userlists`].
pub fn update_pkglists(definitions: &Path, settings: &UpdaterSettings, names: &[String]) -> Result<()> {
    lists::update_userlists(definitions, settings, names)
}

/// Same as [`ApprovalGate::current`].
pub fn approvals_current(gate: &ApprovalGate) -> Result<Option<ApprovalRequest>> {
    gate.current()
}
