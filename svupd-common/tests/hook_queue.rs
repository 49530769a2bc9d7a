//! Hooks registered while a supervisor runs are executed exactly once.

mod common;

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use svupd_common::{HookRegistration, RunOptions, RunOutcome, updater_supervised};

use crate::common::{Sandbox, init_test_logging};

#[test]
fn test_hook_registered_during_run_runs_once() {
    init_test_logging();
    test_log!("TEST START: test_hook_registered_during_run_runs_once");

    let sandbox = Sandbox::new("sleep 1");
    let marker = sandbox.path("hook-marker");
    let supervisor = sandbox.supervisor();
    let queue = supervisor.hooks();
    let lock_file = sandbox.config.paths.lock_file.clone();
    let hook = format!("echo ran >> {}", marker.display());

    let outcome = thread::scope(|scope| {
        let run = scope.spawn(|| supervisor.run(&RunOptions::default()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !updater_supervised(&lock_file).unwrap() {
            assert!(Instant::now() < deadline, "supervisor never took the lock");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(queue.register(&hook).unwrap(), HookRegistration::Queued);
        assert_eq!(queue.register(&hook).unwrap(), HookRegistration::Queued);
        assert!(!marker.exists());

        run.join().unwrap()
    });

    assert_eq!(outcome.unwrap(), RunOutcome::Finished(0));
    assert_eq!(fs::read_to_string(&marker).unwrap(), "ran\nran\n");
    assert!(!queue.path().exists());

    assert_eq!(queue.drain_and_run().unwrap(), 0);
    assert_eq!(fs::read_to_string(&marker).unwrap(), "ran\nran\n");
    test_log!("TEST PASS: test_hook_registered_during_run_runs_once");
}

#[test]
fn test_hook_without_supervisor_runs_immediately() {
    init_test_logging();
    let sandbox = Sandbox::new("true");
    let marker = sandbox.path("hook-marker");
    let queue = sandbox.supervisor().hooks();

    let registration = queue
        .register(&format!("echo now > {}", marker.display()))
        .unwrap();
    assert_eq!(registration, HookRegistration::RanImmediately(0));
    assert_eq!(fs::read_to_string(&marker).unwrap(), "now\n");
    assert!(!queue.path().exists());
}
