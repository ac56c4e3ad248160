// crates/ingest-engine/src/registry.rs
//
// Processor Registry (§4.4): the process-wide singleton owning the fixed-
// size camera slot table, the pool, and add/stop/shutdown synchronization.
// All mutations happen under one state lock; callbacks are never invoked
// while it's held (§4.4, §5) — every method that needs to call into a
// worker or a user callback copies what it needs out of the lock first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex as PLMutex;

use ingest_core::{CameraStatus, EngineConfig, FramePool, PoolStats, RegistryError, StatusEvent};
use ingest_media::{FfmpegSource, FrameSource};

use crate::callbacks::{FrameCallback, StatusCallback};
use crate::supervisor::Supervisor;
use crate::worker::{self, WorkerParams};

/// One entry in the slot table. `frame_cb`/`status_cb` are the caller's
/// original closures — kept so the Reconnect Supervisor can re-arm a
/// camera with the exact same parameters it was added with (§4.5).
struct SlotEntry {
    url: String,
    target_fps: u32,
    frame_cb: FrameCallback,
    status_cb: StatusCallback,
    status: CameraStatus,
    technically_failed: bool,
    cancel: Arc<AtomicBool>,
    last_frame_at: Arc<Mutex<Option<Instant>>>,
    handle: Option<thread::JoinHandle<()>>,
}

struct RegistryState {
    initialized: bool,
    slots: HashMap<i32, SlotEntry>,
    pool: Option<FramePool>,
    config: EngineConfig,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            initialized: false,
            slots: HashMap::new(),
            pool: None,
            config: EngineConfig::default(),
        }
    }
}

struct RegistryInner {
    state: PLMutex<RegistryState>,
    supervisor: PLMutex<Option<Supervisor>>,
    source_factory: Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>,
}

/// Point-in-time view of one camera, for `Registry::stats()`.
#[derive(Debug, Clone)]
pub struct CameraSnapshot {
    pub camera_id: i32,
    pub url: String,
    pub status: CameraStatus,
    pub technically_failed: bool,
}

/// A narrow, clonable handle to the process-wide registry. §9 prefers a
/// lazily-initialized singleton behind the facade in languages with strong
/// init ordering; this crate instead hands the caller an explicit
/// `Registry` value (constructed once, typically held in a `OnceLock` by
/// the facade — see `facade.rs`) since Rust has no implicit global state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Builds a registry that opens real network streams via
    /// `ffmpeg-the-third`. Tests use `with_source_factory` instead to
    /// inject `ingest_media::testsupport::MockSource`.
    pub fn new() -> Self {
        Self::with_source_factory(Arc::new(|| Box::new(FfmpegSource::new()) as Box<dyn FrameSource>))
    }

    pub fn with_source_factory(source_factory: Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: PLMutex::new(RegistryState::default()),
                supervisor: PLMutex::new(None),
                source_factory,
            }),
        }
    }

    /// Idempotent per-process (§4.4): a second call logs a warning and
    /// returns `Ok` rather than `AlreadyInitialized` — the caller's
    /// perspective is "the processor is ready", which stays true.
    pub fn initialize(&self, config: EngineConfig) -> Result<(), RegistryError> {
        let mut state = self.inner.state.lock();
        if state.initialized {
            log::warn!("processor already initialized; ignoring");
            return Ok(());
        }
        ingest_media::init().map_err(|e| RegistryError::Unspecified(e.to_string()))?;

        state.pool = Some(FramePool::new(config.pool_capacity));
        let auto_reconnect = config.auto_reconnect;
        let reconnect_interval = Duration::from_secs(config.reconnect_interval_secs.max(1));
        state.config = config;
        state.initialized = true;
        drop(state);

        if auto_reconnect {
            let mut sup = self.inner.supervisor.lock();
            *sup = Some(Supervisor::start(self.clone(), reconnect_interval));
        }
        Ok(())
    }

    pub fn add_camera(
        &self,
        camera_id: i32,
        url: impl Into<String>,
        frame_cb: FrameCallback,
        status_cb: StatusCallback,
        target_fps: u32,
    ) -> Result<(), RegistryError> {
        let url = url.into();
        if url.is_empty() || !has_recognized_scheme(&url) {
            return Err(RegistryError::InvalidUrl(url));
        }

        let (pool, config) = {
            let state = self.inner.state.lock();
            if !state.initialized {
                return Err(RegistryError::NotInitialized);
            }
            if state.slots.contains_key(&camera_id) {
                return Err(RegistryError::IdInUse(camera_id));
            }
            if state.slots.len() >= state.config.max_slots {
                return Err(RegistryError::NoFreeSlot);
            }
            (state.pool.clone().expect("initialized implies pool exists"), state.config.clone())
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let last_frame_at = Arc::new(Mutex::new(None));
        let wrapped_status_cb = self.wrap_status_cb(camera_id, status_cb.clone());

        let params = WorkerParams {
            camera_id,
            url: url.clone(),
            target_fps,
            pool,
            frame_cb: frame_cb.clone(),
            status_cb: wrapped_status_cb,
            cancel: cancel.clone(),
            last_frame_at: last_frame_at.clone(),
            config,
            source_factory: self.inner.source_factory.clone(),
        };

        let handle = worker::spawn(params);

        let mut state = self.inner.state.lock();
        if state.slots.contains_key(&camera_id) {
            // Lost a race with a concurrent add_camera(same id) — the
            // worker we just spawned is a duplicate; cancel and discard it.
            cancel.store(true, Ordering::Relaxed);
            drop(state);
            join_with_timeout(handle, Duration::from_millis(500));
            return Err(RegistryError::IdInUse(camera_id));
        }
        state.slots.insert(
            camera_id,
            SlotEntry {
                url,
                target_fps,
                frame_cb,
                status_cb,
                status: CameraStatus::Connecting,
                technically_failed: false,
                cancel,
                last_frame_at,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    /// Explicit user stop (§9: distinct from supervisor-driven reconnect).
    /// Always removes the slot, even if the join times out — stopping is a
    /// user action, not a technical-failure recovery.
    pub fn stop_camera(&self, camera_id: i32) -> Result<(), RegistryError> {
        let (cancel, handle, join_timeout_ms) = {
            let mut state = self.inner.state.lock();
            let slot = state.slots.remove(&camera_id).ok_or(RegistryError::InvalidId(camera_id))?;
            (slot.cancel, slot.handle, state.config.stop_join_timeout_ms)
        };
        cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = handle {
            join_with_timeout(handle, Duration::from_millis(join_timeout_ms));
        }
        Ok(())
    }

    /// Consumer-reported "technically failed" hook (§4.5, §3.1): the
    /// worker itself still thinks it's `CONNECTED`, but no frames have
    /// arrived recently. Marks the slot so the next supervisor sweep
    /// includes it even though no transport error was ever observed.
    pub fn report_stuck(&self, camera_id: i32) -> Result<(), RegistryError> {
        let mut state = self.inner.state.lock();
        let slot = state.slots.get_mut(&camera_id).ok_or(RegistryError::InvalidId(camera_id))?;
        slot.technically_failed = true;
        Ok(())
    }

    pub fn stats(&self) -> Vec<CameraSnapshot> {
        let state = self.inner.state.lock();
        state
            .slots
            .iter()
            .map(|(id, slot)| CameraSnapshot {
                camera_id: *id,
                url: slot.url.clone(),
                status: slot.status,
                technically_failed: slot.technically_failed,
            })
            .collect()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.inner.state.lock().pool.as_ref().map(|p| p.stats())
    }

    /// Cancels every worker, joins all of them within one global budget
    /// (`shutdown_grace`), stops the supervisor, then tears down the pool.
    /// Idempotent: a second call with nothing initialized is a no-op.
    pub fn shutdown(&self) {
        let (drained, grace_ms) = {
            let mut state = self.inner.state.lock();
            if !state.initialized {
                return;
            }
            state.initialized = false;
            let grace = state.config.shutdown_grace_ms;
            let drained: Vec<SlotEntry> = state.slots.drain().map(|(_, v)| v).collect();
            (drained, grace)
        };

        if let Some(sup) = self.inner.supervisor.lock().take() {
            sup.stop(Duration::from_millis(grace_ms));
        }

        for slot in &drained {
            slot.cancel.store(true, Ordering::Relaxed);
        }

        let (tx, rx) = mpsc::channel();
        let mut pending = 0usize;
        for mut slot in drained {
            if let Some(handle) = slot.handle.take() {
                pending += 1;
                let tx = tx.clone();
                thread::spawn(move || {
                    let _ = handle.join();
                    let _ = tx.send(());
                });
            }
        }
        drop(tx);

        let deadline = Instant::now() + Duration::from_millis(grace_ms);
        let mut done = 0usize;
        while done < pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("shutdown: {} worker(s) did not exit within the grace period", pending - done);
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(()) => done += 1,
                Err(_) => {
                    log::warn!("shutdown: {} worker(s) did not exit within the grace period", pending - done);
                    break;
                }
            }
        }

        self.inner.state.lock().pool = None;
    }

    // ── Supervisor support ────────────────────────────────────────────

    pub(crate) fn eligible_for_reconnect(&self) -> Vec<i32> {
        let state = self.inner.state.lock();
        state
            .slots
            .iter()
            .filter(|(_, slot)| slot.status == CameraStatus::Disconnected || slot.technically_failed)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Re-arms one camera: stop + re-add under the same id and parameters
    /// (§4.5). The state lock serializes this against a concurrent user
    /// `stop_camera` (§9's Open Question resolution) — we re-check under
    /// the lock that the slot still exists and is still eligible before
    /// doing anything.
    pub(crate) fn supervisor_reconnect(&self, camera_id: i32) {
        let params = {
            let state = self.inner.state.lock();
            state.slots.get(&camera_id).and_then(|slot| {
                if slot.status == CameraStatus::Disconnected || slot.technically_failed {
                    Some((slot.url.clone(), slot.target_fps, slot.frame_cb.clone(), slot.status_cb.clone()))
                } else {
                    None
                }
            })
        };
        let Some((url, target_fps, frame_cb, status_cb)) = params else {
            return;
        };
        if self.stop_camera(camera_id).is_err() {
            // Already gone — a racing explicit stop_camera won.
            return;
        }
        if let Err(e) = self.add_camera(camera_id, url, frame_cb, status_cb, target_fps) {
            log::warn!("supervisor: failed to re-arm camera {camera_id}: {e}");
        }
    }

    fn wrap_status_cb(&self, camera_id: i32, user_cb: StatusCallback) -> StatusCallback {
        let inner = self.inner.clone();
        Arc::new(move |ev: StatusEvent| {
            {
                let mut state = inner.state.lock();
                if let Some(slot) = state.slots.get_mut(&camera_id) {
                    slot.status = ev.status;
                    if ev.status == CameraStatus::Connected {
                        slot.technically_failed = false;
                    }
                }
            }
            user_cb(ev);
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn has_recognized_scheme(url: &str) -> bool {
    const SCHEMES: &[&str] = &["rtsp://", "rtmp://", "http://", "https://"];
    SCHEMES.iter().any(|s| url.starts_with(s))
}

/// Joins `handle`, logging a warning rather than blocking forever if it
/// doesn't exit within `timeout` (§4.3: "the thread is considered leaked;
/// this is the documented failure mode of an uncooperative native
/// decoder"). The watcher thread itself is left running if the join never
/// completes — a second-order leak, but a lightweight one.
fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(timeout).is_err() {
        log::warn!("worker thread did not exit within {timeout:?}; considered leaked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_media::testsupport::MockSource;
    use std::sync::Mutex as StdMutex;

    fn noop_frame_cb() -> FrameCallback {
        Arc::new(|_, _| {})
    }
    fn noop_status_cb() -> StatusCallback {
        Arc::new(|_| {})
    }

    fn mock_registry(sources: Vec<MockSource>) -> Registry {
        let sources = Arc::new(StdMutex::new(sources.into_iter()));
        Registry::with_source_factory(Arc::new(move || {
            Box::new(sources.lock().unwrap().next().unwrap_or_else(MockSource::never_connects)) as Box<dyn FrameSource>
        }))
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            max_slots: 2,
            pool_capacity: 4,
            connect_timeout_ms: 50,
            read_timeout_ms: 50,
            reconnect_interval_secs: 1,
            stop_join_timeout_ms: 500,
            shutdown_grace_ms: 1000,
            auto_reconnect: false,
        }
    }

    #[test]
    fn initialize_then_shutdown_then_initialize_succeeds() {
        let reg = mock_registry(vec![]);
        assert!(reg.initialize(fast_config()).is_ok());
        reg.shutdown();
        assert!(reg.initialize(fast_config()).is_ok());
        reg.shutdown();
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let reg = mock_registry(vec![MockSource::always_connects(10), MockSource::always_connects(10)]);
        reg.initialize(fast_config()).unwrap();
        reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).unwrap();
        let err = reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).unwrap_err();
        assert!(matches!(err, RegistryError::IdInUse(1)));
        reg.shutdown();
    }

    #[test]
    fn stop_twice_second_call_is_invalid_id() {
        let reg = mock_registry(vec![MockSource::always_connects(10)]);
        reg.initialize(fast_config()).unwrap();
        reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).unwrap();
        assert!(reg.stop_camera(1).is_ok());
        assert!(matches!(reg.stop_camera(1).unwrap_err(), RegistryError::InvalidId(1)));
        reg.shutdown();
    }

    #[test]
    fn add_immediately_after_stop_succeeds() {
        let reg = mock_registry(vec![MockSource::always_connects(10), MockSource::always_connects(10)]);
        reg.initialize(fast_config()).unwrap();
        reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).unwrap();
        reg.stop_camera(1).unwrap();
        assert!(reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).is_ok());
        reg.shutdown();
    }

    #[test]
    fn no_free_slot_once_max_slots_reached() {
        let reg = mock_registry(vec![MockSource::always_connects(10), MockSource::always_connects(10)]);
        let mut cfg = fast_config();
        cfg.max_slots = 1;
        reg.initialize(cfg).unwrap();
        reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).unwrap();
        let err = reg.add_camera(2, "rtsp://y", noop_frame_cb(), noop_status_cb(), 0).unwrap_err();
        assert!(matches!(err, RegistryError::NoFreeSlot));
        reg.shutdown();
    }

    #[test]
    fn invalid_url_is_rejected_before_touching_slots() {
        let reg = mock_registry(vec![]);
        reg.initialize(fast_config()).unwrap();
        assert!(matches!(
            reg.add_camera(1, "", noop_frame_cb(), noop_status_cb(), 0).unwrap_err(),
            RegistryError::InvalidUrl(_)
        ));
        assert!(matches!(
            reg.add_camera(1, "not-a-url", noop_frame_cb(), noop_status_cb(), 0).unwrap_err(),
            RegistryError::InvalidUrl(_)
        ));
        reg.shutdown();
    }

    #[test]
    fn shutdown_leaks_no_pool_references_after_stops() {
        let reg = mock_registry(vec![MockSource::always_connects(100), MockSource::always_connects(100)]);
        reg.initialize(fast_config()).unwrap();
        reg.add_camera(1, "rtsp://x", noop_frame_cb(), noop_status_cb(), 0).unwrap();
        reg.add_camera(2, "rtsp://y", noop_frame_cb(), noop_status_cb(), 0).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        reg.shutdown();
        // pool is torn down; nothing left to report.
        assert!(reg.pool_stats().is_none());
    }
}
