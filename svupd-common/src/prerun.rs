//! Delays applied before a run starts.

use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Sleep a uniformly random number of whole seconds in `[0, max)`.
///
/// Spreads the load of many devices started by the same schedule. Returns
/// the delay actually used.
pub fn random_sleep(max: Duration) -> Duration {
    let max_secs = max.as_secs();
    if max_secs == 0 {
        return Duration::ZERO;
    }
    let suspend = Duration::from_secs(fastrand::u64(0..max_secs));
    if !suspend.is_zero() {
        info!("Suspending updater start for {} seconds", suspend.as_secs());
    }
    thread::sleep(suspend);
    suspend
}

/// Probe used by [`wait_for_network`]; returns whether the target answered.
pub trait ReachabilityProbe: Send + 'static {
    fn probe(&mut self) -> bool;
}

/// One `ping -c 1 -w 1 <address>` per probe.
#[derive(Debug, Clone)]
pub struct PingProbe {
    address: String,
}

impl PingProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl ReachabilityProbe for PingProbe {
    fn probe(&mut self) -> bool {
        Command::new("ping")
            .args(["-c", "1", "-w", "1", &self.address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Wait until `address` answers a ping, at most `max_stall`.
pub fn wait_for_network(max_stall: Duration, address: &str) -> bool {
    wait_for(max_stall, PingProbe::new(address))
}

/// Repeat `probe` on a worker thread until it succeeds or `max_stall`
/// elapses. Returns whether it succeeded in time.
///
/// The caller never waits past `max_stall`, even on a stuck probe; the
/// worker is told to stop and left to finish its current probe.
pub fn wait_for<P: ReachabilityProbe>(max_stall: Duration, mut probe: P) -> bool {
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let worker_stop = Arc::clone(&stop);
    let spawned = thread::Builder::new()
        .name("network-wait".to_string())
        .spawn(move || {
            let mut reported = false;
            while !worker_stop.load(Ordering::SeqCst) {
                if probe.probe() {
                    let _ = tx.send(());
                    return;
                }
                if !reported {
                    info!("Waiting for network connection");
                    reported = true;
                }
            }
        });
    if let Err(err) = spawned {
        warn!("Failed to start network wait: {}", err);
        return false;
    }

    let reachable = rx.recv_timeout(max_stall).is_ok();
    stop.store(true, Ordering::SeqCst);
    if !reachable {
        debug!("Network wait timed out after {:?}", max_stall);
    }
    reachable
}
