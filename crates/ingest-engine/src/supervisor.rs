// crates/ingest-engine/src/supervisor.rs
//
// Reconnect Supervisor (§4.5): one background thread, started by
// `Registry::initialize` when `auto_reconnect` is set, that periodically
// scans for cameras stuck in DISCONNECTED (or explicitly reported stuck via
// `report_stuck`) and re-arms them. This is what makes reconnection a
// system-level property rather than something the caller has to poll for —
// the same "one thread, cooperative cancellation" shape as `CameraWorker`
// (`worker.rs`), scaled down to a single loop instead of one per camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::registry::Registry;

/// How often the supervisor wakes up to check slot statuses. Independent of
/// `reconnect_interval` (which instead gates how often any one camera is
/// actually re-armed, via `last_attempt`) — a short tick keeps cancellation
/// latency low without making every camera eligible on every tick.
const SCAN_TICK: Duration = Duration::from_secs(1);

pub struct Supervisor {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawns the scan thread. `interval` is the minimum time between two
    /// re-arm attempts for the same camera_id (§4.5: "whose last_attempt +
    /// interval ≤ now").
    pub fn start(registry: Registry, interval: Duration) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("reconnect-supervisor".into())
            .spawn(move || Self::run(registry, interval, worker_cancel))
            .expect("failed to spawn reconnect supervisor thread");

        Self { cancel, handle: Some(handle) }
    }

    fn run(registry: Registry, interval: Duration, cancel: Arc<AtomicBool>) {
        let mut last_attempt: std::collections::HashMap<i32, Instant> = std::collections::HashMap::new();

        while !cancel.load(Ordering::Relaxed) {
            if !interruptible_sleep(SCAN_TICK, &cancel) {
                break;
            }

            let now = Instant::now();
            for camera_id in registry.eligible_for_reconnect() {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let due = last_attempt.get(&camera_id).map(|t| now >= *t + interval).unwrap_or(true);
                if !due {
                    continue;
                }
                last_attempt.insert(camera_id, now);
                log::info!("supervisor: re-arming camera {camera_id}");
                registry.supervisor_reconnect(camera_id);
            }

            // Slots that disappeared (explicit stop) don't need their
            // last_attempt entry kept around forever.
            let live: std::collections::HashSet<i32> =
                registry.eligible_for_reconnect().into_iter().collect();
            last_attempt.retain(|id, _| live.contains(id));
        }
    }

    /// Cancels the scan thread and joins it within `timeout`, logging
    /// (never panicking) if it doesn't exit in time — same discipline as
    /// `CameraWorker`'s own shutdown path.
    pub fn stop(mut self, timeout: Duration) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let _ = handle.join();
                let _ = tx.send(());
            });
            if rx.recv_timeout(timeout).is_err() {
                log::warn!("reconnect supervisor did not exit within {timeout:?}; considered leaked");
            }
        }
    }
}

fn interruptible_sleep(total: Duration, cancel: &AtomicBool) -> bool {
    const POLL: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        thread::sleep(POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    !cancel.load(Ordering::Relaxed)
}
