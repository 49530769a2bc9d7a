//! Approval gate for update plans.
//!
//! When approvals are enabled the engine does not apply a plan by itself.
//! It writes the plan to the *ask* file (plan hash on the first line, then
//! one tab-separated operation per line) and exits. The supervisor keeps a
//! *stat* record (`hash status timestamp`) for that plan, notifies the user,
//! and on later runs passes the hash back to the engine once the plan is
//! granted, either explicitly or by the auto-grant timeout.
//!
//! A stat record is only meaningful while its hash matches the ask file.
//! Unreadable or inconsistent files read as "no request"; they never fail a
//! run.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{IoContext, Result, SupervisorError};
use crate::fsutil::{ReadOutcome, atomic_write, lock_sidecar, read_text, remove_if_exists};
use crate::notify::{Notifier, approval_notification, create_logged};
use crate::settings::UpdaterSettings;

/// Kind of change the engine plans for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOperation {
    /// Also used by older engines for upgrades and downgrades.
    Install,
    Upgrade,
    Downgrade,
    Remove,
}

impl FromStr for PlanOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(Self::Install),
            "upgrade" => Ok(Self::Upgrade),
            "downgrade" => Ok(Self::Downgrade),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown plan operation: {other}")),
        }
    }
}

/// When a change needs the device rebooted (fourth ask file column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebootMode {
    #[default]
    None,
    /// Some time after the update, at the user's convenience.
    Delayed,
    /// Right after the whole update finished.
    Finished,
    /// In the middle of the update.
    Immediate,
}

impl RebootMode {
    /// Unknown or missing modes read as [`RebootMode::None`].
    pub fn parse(column: Option<&str>) -> Self {
        match column {
            Some("delayed") => Self::Delayed,
            Some("finished") => Self::Finished,
            Some("immediate") => Self::Immediate,
            _ => Self::None,
        }
    }
}

/// One planned package change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub op: PlanOperation,
    pub name: String,
    /// Not provided by the ask file format; kept for API consumers.
    pub current_version: Option<String>,
    pub new_version: Option<String>,
    #[serde(default)]
    pub reboot: RebootMode,
}

impl PlannedChange {
    pub fn forces_reboot(&self) -> bool {
        self.reboot == RebootMode::Immediate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Asked,
    Granted,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asked => "asked",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "asked" => Ok(Self::Asked),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(format!("unknown approval status: {other}")),
        }
    }
}

/// Content of the stat file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub hash: String,
    pub status: ApprovalStatus,
    /// Unix time the request was created.
    pub time: i64,
}

impl StatRecord {
    pub fn parse(content: &str) -> Option<Self> {
        let mut cols = content.lines().next()?.split_whitespace();
        let hash = cols.next()?.to_string();
        let status = cols.next()?.parse().ok()?;
        let time = cols.next()?.parse().ok()?;
        Some(Self { hash, status, time })
    }

    pub fn render(&self) -> String {
        format!("{} {} {}\n", self.hash, self.status, self.time)
    }

    /// Whether the plan may be applied at `now`.
    ///
    /// Denied plans are never auto-granted.
    pub fn is_granted_at(&self, now: i64, auto_grant: Option<Duration>) -> bool {
        match self.status {
            ApprovalStatus::Granted => true,
            ApprovalStatus::Denied => false,
            ApprovalStatus::Asked => auto_grant.is_some_and(|window| {
                let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
                now.saturating_sub(self.time) > window
            }),
        }
    }
}

/// Parsed ask file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskFile {
    pub hash: String,
    pub plan: Vec<PlannedChange>,
    /// Some change forces an immediate reboot.
    pub reboot: bool,
}

impl AskFile {
    pub fn parse(content: &str) -> Option<Self> {
        let mut lines = content.lines();
        let hash = lines.next()?.trim();
        if hash.is_empty() || hash.contains(char::is_whitespace) {
            return None;
        }

        let mut plan = Vec::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
            if cols.len() < 3 {
                return None;
            }
            let op = cols[0].parse().ok()?;
            let new_version = match cols[1] {
                "-" | "" => None,
                version => Some(version.to_string()),
            };
            plan.push(PlannedChange {
                op,
                name: cols[2].to_string(),
                current_version: None,
                new_version,
                reboot: RebootMode::parse(cols.get(3).copied()),
            });
        }

        let reboot = plan.iter().any(PlannedChange::forces_reboot);
        Some(Self {
            hash: hash.to_string(),
            plan,
            reboot,
        })
    }
}

/// A pending or decided approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub hash: String,
    pub status: ApprovalStatus,
    pub time: i64,
    pub plan: Vec<PlannedChange>,
    pub reboot: bool,
}

impl ApprovalRequest {
    fn from_parts(ask: AskFile, stat: StatRecord) -> Self {
        Self {
            hash: stat.hash,
            status: stat.status,
            time: stat.time,
            plan: ask.plan,
            reboot: ask.reboot,
        }
    }
}

/// What [`ApprovalGate::refresh`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Approvals are off or there is no plan; any stat record was removed.
    Cleared,
    /// The stat record already tracks this plan.
    Unchanged,
    /// A fresh request was recorded and announced.
    NewRequest(String),
}

/// The ask/stat file pair plus the device switches governing it.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    ask: PathBuf,
    stat: PathBuf,
    settings: UpdaterSettings,
}

impl ApprovalGate {
    pub fn new(ask: impl Into<PathBuf>, stat: impl Into<PathBuf>, settings: UpdaterSettings) -> Self {
        Self {
            ask: ask.into(),
            stat: stat.into(),
            settings,
        }
    }

    pub fn ask_path(&self) -> &Path {
        &self.ask
    }

    pub fn stat_path(&self) -> &Path {
        &self.stat
    }

    fn sidecar(&self) -> PathBuf {
        let mut name = OsString::from(self.stat.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn lock(&self) -> Result<std::fs::File> {
        let path = self.sidecar();
        lock_sidecar(&path).io_context(|| format!("failed to lock {}", path.display()))
    }

    /// Current request, or `None` when approvals are off or there is no
    /// consistent ask/stat pair.
    pub fn current(&self) -> Result<Option<ApprovalRequest>> {
        if !self.settings.approvals_needed()? {
            return Ok(None);
        }
        Ok(self
            .load_pair()
            .map(|(ask, stat)| ApprovalRequest::from_parts(ask, stat)))
    }

    /// Grant the current plan. With `hash` set it must match the plan.
    pub fn approve(&self, hash: Option<&str>) -> Result<()> {
        self.set_status(ApprovalStatus::Granted, hash)
    }

    /// Deny the current plan. A denied plan is never auto-granted.
    pub fn deny(&self, hash: Option<&str>) -> Result<()> {
        self.set_status(ApprovalStatus::Denied, hash)
    }

    fn set_status(&self, status: ApprovalStatus, hash: Option<&str>) -> Result<()> {
        if !self.settings.approvals_needed()? {
            warn!("Approvals are not enabled, nothing to {}", verb(status));
            return Ok(());
        }
        let _lock = self.lock()?;
        let Some((_, mut stat)) = self.load_pair() else {
            warn!("There is no approval request to {}", verb(status));
            return Ok(());
        };
        if let Some(given) = hash
            && given != stat.hash
        {
            return Err(SupervisorError::ApprovalMismatch {
                current: stat.hash,
                given: given.to_string(),
            });
        }
        stat.status = status;
        self.write_stat(&stat)?;
        info!(hash = %stat.hash, %status, "Approval request updated");
        Ok(())
    }

    /// Hash the engine may treat as pre-approved right now.
    pub fn resolved_hash(&self) -> Result<Option<String>> {
        self.resolved_hash_at(chrono::Utc::now().timestamp())
    }

    pub fn resolved_hash_at(&self, now: i64) -> Result<Option<String>> {
        if !self.settings.approvals_needed()? {
            return Ok(None);
        }
        let window = self.settings.auto_grant_window()?;
        Ok(self
            .load_pair()
            .map(|(_, stat)| stat)
            .filter(|stat| stat.is_granted_at(now, window))
            .map(|stat| stat.hash))
    }

    /// Sync the stat record with the ask file the engine just produced.
    ///
    /// A new or changed plan gets a fresh `asked` record and one
    /// notification; an unchanged plan keeps its record as is.
    pub fn refresh(&self, notifier: &dyn Notifier) -> Result<RefreshOutcome> {
        self.refresh_at(notifier, chrono::Utc::now().timestamp())
    }

    pub fn refresh_at(&self, notifier: &dyn Notifier, now: i64) -> Result<RefreshOutcome> {
        let _lock = self.lock()?;

        let ask = if self.settings.approvals_needed()? {
            read_parsed(&self.ask, AskFile::parse)
        } else {
            None
        };
        let Some(ask) = ask else {
            if remove_if_exists(&self.stat)
                .io_context(|| format!("failed to remove {}", self.stat.display()))?
            {
                info!("Dropped stale approval record");
            }
            return Ok(RefreshOutcome::Cleared);
        };

        if let Some(stat) = read_parsed(&self.stat, StatRecord::parse)
            && stat.hash == ask.hash
        {
            return Ok(RefreshOutcome::Unchanged);
        }

        info!("Generating new approval request");
        let stat = StatRecord {
            hash: ask.hash.clone(),
            status: ApprovalStatus::Asked,
            time: now,
        };
        self.write_stat(&stat)?;
        let hash = stat.hash.clone();
        let request = ApprovalRequest::from_parts(ask, stat);
        create_logged(notifier, &approval_notification(&request));
        Ok(RefreshOutcome::NewRequest(hash))
    }

    fn load_pair(&self) -> Option<(AskFile, StatRecord)> {
        let stat = read_parsed(&self.stat, StatRecord::parse)?;
        let ask = read_parsed(&self.ask, AskFile::parse)?;
        (ask.hash == stat.hash).then_some((ask, stat))
    }

    fn write_stat(&self, stat: &StatRecord) -> Result<()> {
        atomic_write(&self.stat, stat.render().as_bytes())
            .io_context(|| format!("failed to write {}", self.stat.display()))
    }
}

fn read_parsed<T>(path: &Path, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    match read_text(path) {
        ReadOutcome::Found(content) => {
            let parsed = parse(&content);
            if parsed.is_none() {
                warn!("Ignoring malformed {}", path.display());
            }
            parsed
        }
        ReadOutcome::Absent => None,
        ReadOutcome::IoFailure(err) => {
            warn!("Failed to read {}: {}", path.display(), err);
            None
        }
    }
}

fn verb(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Granted => "approve",
        ApprovalStatus::Denied => "deny",
        ApprovalStatus::Asked => "ask",
    }
}
