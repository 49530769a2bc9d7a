//! Test doubles and logging helpers shared by unit and integration tests.

mod log;

use std::sync::Mutex;

use nix::errno::Errno;
use nix::sys::signal::Signal;

pub use log::{TestLogger, TestResult, init_global_test_logging};

use crate::error::Result;
use crate::notify::{Notification, Notifier};
use crate::pidlock::SignalSender;

/// [`Notifier`] that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    created: Mutex<Vec<Notification>>,
    delivered: Mutex<u32>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<Notification> {
        self.created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn deliveries(&self) -> u32 {
        *self
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Notifier for RecordingNotifier {
    fn create(&self, notification: &Notification) -> Result<()> {
        self.created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
        Ok(())
    }

    fn deliver(&self) -> Result<()> {
        *self
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        Ok(())
    }
}

/// [`SignalSender`] that records every call and answers with a fixed reply.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(i32, Option<Signal>)>>,
    reply: Option<Errno>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with `errno`; `ESRCH` makes the target look dead.
    pub fn failing_with(errno: Errno) -> Self {
        Self {
            sent: Mutex::default(),
            reply: Some(errno),
        }
    }

    pub fn sent(&self) -> Vec<(i32, Option<Signal>)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SignalSender for RecordingSender {
    fn send(&self, pid: i32, signal: Option<Signal>) -> std::result::Result<(), Errno> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((pid, signal));
        match self.reply {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}
