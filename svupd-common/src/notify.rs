//! User notifications about update results.
//!
//! Messages are created with an external tool and delivered later in one
//! batch by another one; this module only builds the texts and calls them.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::approvals::{ApprovalRequest, PlanOperation};
use crate::error::{IoContext, Result, SupervisorError};
use crate::fsutil::{ReadOutcome, read_text, remove_if_exists};

/// Notification severity as understood by the notification tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Update,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Sink for notifications.
pub trait Notifier: Send + Sync {
    /// Queue one notification.
    fn create(&self, notification: &Notification) -> Result<()>;

    /// Send everything queued so far.
    fn deliver(&self) -> Result<()>;
}

/// [`Notifier`] calling the device's notification commands.
///
/// The create command is called as `<cmd> -s <severity> <message> <message>`;
/// the tool takes a localized and an English body and both get the same
/// text.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    create_command: Vec<String>,
    deliver_command: Vec<String>,
}

impl CommandNotifier {
    pub fn new(create_command: Vec<String>, deliver_command: Vec<String>) -> Self {
        Self {
            create_command,
            deliver_command,
        }
    }

    fn call(command: &[String], extra: &[&str]) -> Result<bool> {
        let Some((program, args)) = command.split_first() else {
            return Err(SupervisorError::Config(
                "notification command is empty".to_string(),
            ));
        };
        let status = Command::new(program)
            .args(args)
            .args(extra)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;
        Ok(status.success())
    }
}

impl Notifier for CommandNotifier {
    fn create(&self, notification: &Notification) -> Result<()> {
        let message = notification.message.as_str();
        let ok = Self::call(
            &self.create_command,
            &["-s", notification.severity.as_str(), message, message],
        )?;
        if !ok {
            warn!("Notification creation failed.");
        }
        Ok(())
    }

    fn deliver(&self) -> Result<()> {
        if !Self::call(&self.deliver_command, &[])? {
            warn!("Notifier failed");
        }
        Ok(())
    }
}

/// One line of the engine's change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEntry {
    Installed { name: String, version: String },
    Removed { name: String },
    Downloaded,
}

/// Parse the change log. Lines that are not understood are logged and
/// skipped.
pub fn parse_change_log(content: &str) -> Vec<ChangeEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let mut cols = line.split_whitespace();
        let entry = match (cols.next(), cols.next(), cols.next()) {
            (None, _, _) => continue,
            (Some("I"), Some(name), Some(version)) => ChangeEntry::Installed {
                name: name.to_string(),
                version: version.to_string(),
            },
            (Some("R"), Some(name), _) => ChangeEntry::Removed {
                name: name.to_string(),
            },
            (Some("D"), _, _) => ChangeEntry::Downloaded,
            _ => {
                warn!("Unknown log entry: {}", line.trim());
                continue;
            }
        };
        entries.push(entry);
    }
    entries
}

/// Summary of applied changes; `None` when nothing was installed or removed.
pub fn changes_message(entries: &[ChangeEntry]) -> Option<String> {
    let text: String = entries
        .iter()
        .filter_map(|entry| match entry {
            ChangeEntry::Installed { name, version } => {
                Some(format!(" • Installed {name} {version}\n"))
            }
            ChangeEntry::Removed { name } => Some(format!(" • Removed {name}\n")),
            ChangeEntry::Downloaded => None,
        })
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Consume the engine's change log: build the changes notification and
/// delete the log. A missing log yields `None`.
pub fn take_changes(change_log: &Path) -> Result<Option<Notification>> {
    let content = match read_text(change_log) {
        ReadOutcome::Found(content) => content,
        ReadOutcome::Absent => return Ok(None),
        ReadOutcome::IoFailure(err) => {
            return Err(SupervisorError::io(
                format!("failed to read {}", change_log.display()),
                err,
            ));
        }
    };
    let notification =
        changes_message(&parse_change_log(&content)).map(|m| Notification::new(Severity::Update, m));
    remove_if_exists(change_log)
        .io_context(|| format!("failed to remove {}", change_log.display()))?;
    Ok(notification)
}

/// Failure report for an engine run; `None` for a successful run.
///
/// The body is the engine's error dump if it left one, else its crash
/// trace, else the captured output with the exit code. Both dump files are
/// removed afterwards.
pub fn take_failure(
    exit_code: i32,
    trace: Option<&str>,
    error_log: &Path,
    crash_log: &Path,
) -> Option<Notification> {
    if exit_code == 0 {
        return None;
    }

    let detail = match (read_dump(error_log), read_dump(crash_log), trace) {
        (Some(dump), _, _) | (None, Some(dump), _) => dump,
        (None, None, Some(trace)) => format!("{trace}\n\nExit code: {exit_code}"),
        (None, None, None) => "Unknown error".to_string(),
    };
    clear_dumps(error_log, crash_log);
    Some(Notification::new(
        Severity::Error,
        format!("Updater failed: {detail}"),
    ))
}

fn read_dump(path: &Path) -> Option<String> {
    match read_text(path) {
        ReadOutcome::Found(content) => Some(content),
        ReadOutcome::Absent => None,
        ReadOutcome::IoFailure(err) => {
            warn!("Failed to read {}: {}", path.display(), err);
            None
        }
    }
}

/// Remove the files the engine dumps when it fails.
pub fn clear_dumps(error_log: &Path, crash_log: &Path) {
    for path in [error_log, crash_log] {
        if let Err(err) = remove_if_exists(path) {
            warn!("Failed to remove {}: {}", path.display(), err);
        }
    }
}

/// Notification asking the user to approve a plan.
pub fn approval_notification(request: &ApprovalRequest) -> Notification {
    let mut text = String::from("Your approval is required to apply the following changes:");
    for change in &request.plan {
        text.push_str("\n • ");
        text.push_str(operation_title(change.op));
        text.push(' ');
        text.push_str(&change.name);
        if let Some(version) = &change.new_version {
            text.push(' ');
            text.push_str(version);
        }
    }
    if request.reboot {
        text.push_str("\nThe device will be rebooted as part of this update.");
    }
    Notification::new(Severity::Update, text)
}

fn operation_title(op: PlanOperation) -> &'static str {
    match op {
        PlanOperation::Install => "Install",
        PlanOperation::Upgrade => "Upgrade",
        PlanOperation::Downgrade => "Downgrade",
        PlanOperation::Remove => "Remove",
    }
}

/// Create `notification`, logging instead of failing.
pub fn create_logged(notifier: &dyn Notifier, notification: &Notification) {
    debug!(severity = %notification.severity, "Creating notification");
    if let Err(err) = notifier.create(notification) {
        warn!("Notification creation failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::{ApprovalStatus, PlannedChange, RebootMode};
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_change_log() {
        let entries = parse_change_log("I nano 2.1\nD curl 7.0\nR vim\n\nX what\n");
        assert_eq!(
            entries,
            vec![
                ChangeEntry::Installed {
                    name: "nano".to_string(),
                    version: "2.1".to_string()
                },
                ChangeEntry::Downloaded,
                ChangeEntry::Removed {
                    name: "vim".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_changes_message_skips_downloads() {
        assert_eq!(changes_message(&[ChangeEntry::Downloaded]), None);
        let message = changes_message(&parse_change_log("I nano 2.1\nR vim\n")).unwrap();
        assert!(message.contains("Installed nano 2.1"));
        assert!(message.contains("Removed vim"));
    }

    #[test]
    fn test_take_changes_removes_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("updater-log");
        assert_eq!(take_changes(&log).unwrap(), None);

        fs::write(&log, "I nano 2.1\n").unwrap();
        let notification = take_changes(&log).unwrap().unwrap();
        assert_eq!(notification.severity, Severity::Update);
        assert!(notification.message.contains("nano 2.1"));
        assert!(!log.exists());

        fs::write(&log, "D nano 2.1\n").unwrap();
        assert_eq!(take_changes(&log).unwrap(), None);
        assert!(!log.exists());
    }

    struct Dumps {
        dir: TempDir,
    }

    impl Dumps {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }
        fn error_log(&self) -> std::path::PathBuf {
            self.dir.path().join("last_error")
        }
        fn crash_log(&self) -> std::path::PathBuf {
            self.dir.path().join("crash.log")
        }
        fn take(&self, code: i32, trace: Option<&str>) -> Option<Notification> {
            take_failure(code, trace, &self.error_log(), &self.crash_log())
        }
    }

    #[test]
    fn test_failure_nothing_to_report() {
        let dumps = Dumps::new();
        assert_eq!(dumps.take(0, Some("all good")), None);
    }

    #[test]
    fn test_failure_prefers_error_dump() {
        let dumps = Dumps::new();
        fs::write(dumps.error_log(), "disk full").unwrap();
        fs::write(dumps.crash_log(), "segfault").unwrap();

        let notification = dumps.take(1, Some("trace")).unwrap();
        assert_eq!(notification.severity, Severity::Error);
        assert_eq!(notification.message, "Updater failed: disk full");
        assert!(!dumps.error_log().exists());
        assert!(!dumps.crash_log().exists());
    }

    #[test]
    fn test_failure_not_reported_on_success() {
        let dumps = Dumps::new();
        fs::write(dumps.error_log(), "stale dump").unwrap();
        assert_eq!(dumps.take(0, None), None);
        assert!(dumps.error_log().exists());
    }

    #[test]
    fn test_failure_falls_back_to_crash_then_trace() {
        let dumps = Dumps::new();
        fs::write(dumps.crash_log(), "segfault").unwrap();
        assert_eq!(
            dumps.take(2, Some("trace")).unwrap().message,
            "Updater failed: segfault"
        );

        let message = dumps.take(2, Some("line one")).unwrap().message;
        assert_eq!(message, "Updater failed: line one\n\nExit code: 2");

        assert_eq!(
            dumps.take(3, None).unwrap().message,
            "Updater failed: Unknown error"
        );
    }

    #[test]
    fn test_approval_notification() {
        let request = ApprovalRequest {
            hash: "abc".to_string(),
            status: ApprovalStatus::Asked,
            time: 0,
            plan: vec![
                PlannedChange {
                    op: PlanOperation::Install,
                    name: "nano".to_string(),
                    current_version: None,
                    new_version: Some("2.1".to_string()),
                    reboot: RebootMode::None,
                },
                PlannedChange {
                    op: PlanOperation::Remove,
                    name: "vim".to_string(),
                    current_version: None,
                    new_version: None,
                    reboot: RebootMode::Immediate,
                },
            ],
            reboot: true,
        };
        let notification = approval_notification(&request);
        assert!(notification.message.contains("\n • Install nano 2.1"));
        assert!(notification.message.contains("\n • Remove vim\n"));
        assert!(notification.message.contains("rebooted"));
    }

    proptest! {
        #[test]
        fn prop_parse_change_log_never_panics(content in "\\PC*") {
            let _ = parse_change_log(&content);
        }
    }
}
