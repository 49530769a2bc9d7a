//! The pid lock under concurrent acquisition.

mod common;

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use nix::errno::Errno;
use svupd_common::pidlock::RERUN_SIGNAL;
use svupd_common::testing::RecordingSender;
use svupd_common::{PidLock, updater_supervised};
use tempfile::TempDir;

use crate::common::init_test_logging;

const CONTENDERS: usize = 8;

#[test]
fn test_exactly_one_contender_wins() {
    init_test_logging();
    test_log!("TEST START: test_exactly_one_contender_wins");

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("updater-supervisor.pid");
    let sender = Arc::new(RecordingSender::new());
    let start = Arc::new(Barrier::new(CONTENDERS));
    let done = Arc::new(Barrier::new(CONTENDERS));

    let handles: Vec<_> = (0..CONTENDERS)
        .map(|_| {
            let path = path.clone();
            let sender = Arc::clone(&sender);
            let start = Arc::clone(&start);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut lock = PidLock::with_sender(&path, sender).unwrap();
                start.wait();
                let won = lock.acquire(true).unwrap();
                if won {
                    lock.allow_shared_reads().unwrap();
                }
                // Keep the winner holding until every loser gave up.
                done.wait();
                won
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    let sent = sender.sent();
    assert_eq!(sent.len(), CONTENDERS - 1, "signals: {sent:?}");
    assert!(sent.iter().all(|(pid, signal)| {
        *pid == std::process::id() as i32 && *signal == Some(RERUN_SIGNAL)
    }));
    assert!(!path.exists());
    test_log!("TEST PASS: test_exactly_one_contender_wins");
}

#[test]
fn test_stale_lock_file_is_overtaken() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("updater-supervisor.pid");
    fs::write(&path, "999999").unwrap();
    assert!(!updater_supervised(&path).unwrap());

    let sender = Arc::new(RecordingSender::failing_with(Errno::ESRCH));
    let mut lock = PidLock::with_sender(&path, sender.clone()).unwrap();
    assert!(lock.acquire(true).unwrap());
    assert_eq!(sender.sent(), vec![(999999, Some(RERUN_SIGNAL))]);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        std::process::id().to_string()
    );
    assert!(updater_supervised(&path).unwrap());

    lock.release().unwrap();
    assert!(!updater_supervised(&path).unwrap());
}
