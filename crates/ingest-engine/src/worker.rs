// crates/ingest-engine/src/worker.rs
//
// Camera Worker (§4.3): one dedicated thread per active camera. Owns the
// open `FrameSource`, a cancellation flag, and the reconnect backoff timer.
// Publishes every state transition through the status callback and delivers
// frames through the frame callback. Holds no reference back to the
// registry or the processor (§9) — only a `FramePool` handle (cheap `Arc`
// clone) and the two callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ingest_core::{CameraStatus, EngineConfig, PixelFormat, PoolError, StatusEvent};
use ingest_media::{FrameSource, PipelineError};

use crate::callbacks::{FrameCallback, StatusCallback};

/// Parameters a `CameraSlot` hands to a freshly spawned worker thread.
/// Consumed by value — nothing is shared back except through `pool`,
/// `cancel` and `last_frame_at`, all cheaply-cloned handles.
pub struct WorkerParams {
    pub camera_id: i32,
    pub url: String,
    pub target_fps: u32,
    pub pool: ingest_core::FramePool,
    pub frame_cb: FrameCallback,
    pub status_cb: StatusCallback,
    pub cancel: Arc<AtomicBool>,
    /// Set by the worker on every successful deliver; read by a consumer
    /// (or the registry's `report_stuck`) to detect a technically-stuck
    /// stream (§3.1, added from `original_source/`).
    pub last_frame_at: Arc<Mutex<Option<Instant>>>,
    pub config: EngineConfig,
    /// Produces a fresh `FrameSource` once per worker lifetime. A factory
    /// rather than a concrete type so tests can inject
    /// `ingest_media::testsupport::MockSource` without the worker knowing
    /// it isn't talking to ffmpeg.
    pub source_factory: Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>,
}

pub fn spawn(params: WorkerParams) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("camera-worker-{}", params.camera_id))
        .spawn(move || run(params))
        .expect("failed to spawn camera worker thread")
}

fn publish(cb: &StatusCallback, camera_id: i32, status: CameraStatus, message: impl Into<String>) {
    let message = message.into();
    log::debug!("camera {camera_id}: {status} — {message}");
    cb(StatusEvent { camera_id, status, message });
}

/// Sleeps up to `total`, checking `cancel` every `POLL` so the sleep is
/// interruptible at sub-second granularity (§4.3 cancellation: "a single
/// flag polled ... during sleeps via interruptible wait").
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

fn run(p: WorkerParams) {
    let WorkerParams {
        camera_id,
        url,
        target_fps,
        pool,
        frame_cb,
        status_cb,
        cancel,
        last_frame_at,
        config,
        source_factory,
    } = p;

    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let read_timeout = Duration::from_millis(config.read_timeout_ms);
    let reconnect_interval = Duration::from_secs(config.reconnect_interval_secs);
    let mut source = source_factory();
    let mut next_allowed = Instant::now();

    'reconnect: loop {
        if cancel.load(Ordering::Relaxed) {
            publish(&status_cb, camera_id, CameraStatus::Stopped, "cancelled before connect");
            return;
        }

        // Step 1: CONNECTING.
        publish(&status_cb, camera_id, CameraStatus::Connecting, format!("opening {url}"));

        // Step 2: open-input.
        if let Err(e) = source.open(&url, connect_timeout, read_timeout) {
            publish(&status_cb, camera_id, CameraStatus::Disconnected, e.to_string());
            source.close();
            if !wait_and_rearm(&status_cb, camera_id, &cancel, reconnect_interval) {
                publish(&status_cb, camera_id, CameraStatus::Stopped, "cancelled during backoff");
                return;
            }
            continue 'reconnect;
        }

        // Step 3: CONNECTED, query stream parameters.
        publish(&status_cb, camera_id, CameraStatus::Connected, "stream opened");
        let (src_w, src_h) = source.dimensions().unwrap_or((0, 0));
        if src_w <= 0 || src_h <= 0 {
            publish(&status_cb, camera_id, CameraStatus::Disconnected, "no usable video dimensions");
            source.close();
            if !wait_and_rearm(&status_cb, camera_id, &cancel, reconnect_interval) {
                publish(&status_cb, camera_id, CameraStatus::Stopped, "cancelled during backoff");
                return;
            }
            continue 'reconnect;
        }

        // Steps 4-6: read / decode / throttle / deliver, looped until the
        // connection itself fails or we're cancelled.
        loop {
            if cancel.load(Ordering::Relaxed) {
                source.close();
                publish(&status_cb, camera_id, CameraStatus::Stopped, "cancelled while connected");
                return;
            }

            match source.read_frame(src_w, src_h) {
                Ok(None) => continue,
                Ok(Some(frame)) => {
                    if target_fps > 0 {
                        let now = Instant::now();
                        if now < next_allowed {
                            continue; // not due yet — drop (approximate throttle, §4.3)
                        }
                        next_allowed = now + Duration::from_secs_f64(1.0 / target_fps as f64);
                    }

                    match pool.acquire(camera_id, frame.width, frame.height, PixelFormat::Bgr24) {
                        Ok(buf) => {
                            buf.with_plane_mut(0, |plane| {
                                let n = frame.data.len().min(plane.len());
                                plane[..n].copy_from_slice(&frame.data[..n]);
                            });
                            buf.set_pts(frame.pts);
                            // Callback borrows `buf`; the worker always
                            // releases its own reference once it returns
                            // (§3 invariant) — `buf` drops at end of scope
                            // unless the callback retained a clone.
                            frame_cb(camera_id, &buf);
                            // Stamped only once the frame was actually
                            // delivered (§3.1) — a throttled or
                            // pool-exhausted drop must not look like a
                            // live frame to `report_stuck`'s staleness check.
                            *last_frame_at.lock().unwrap() = Some(Instant::now());
                        }
                        Err(PoolError::Exhausted) => {
                            log::warn!("camera {camera_id}: pool exhausted, dropping frame");
                        }
                    }
                }
                Err(PipelineError::CorruptPacket) => {
                    log::debug!("camera {camera_id}: corrupt packet, continuing");
                    continue;
                }
                Err(e @ (PipelineError::Timeout | PipelineError::EndOfStream | PipelineError::DecoderError(_) | PipelineError::OpenFailed(_))) => {
                    publish(&status_cb, camera_id, CameraStatus::Disconnected, e.to_string());
                    source.close();
                    break;
                }
            }
        }

        // Step 7/8: not cancelled (checked at top of each loop) — wait then
        // reconnect, no retry cap (§4.3: "no retry cap ... supervisor
        // enforces scan cadence, not give-up").
        if !wait_and_rearm(&status_cb, camera_id, &cancel, reconnect_interval) {
            publish(&status_cb, camera_id, CameraStatus::Stopped, "cancelled during backoff");
            return;
        }
    }
}

/// WAITING_RECONNECT → (interruptible sleep) → RECONNECTING.
/// Returns `false` if cancelled during the wait.
fn wait_and_rearm(status_cb: &StatusCallback, camera_id: i32, cancel: &AtomicBool, interval: Duration) -> bool {
    publish(status_cb, camera_id, CameraStatus::WaitingReconnect, "backing off before reconnect");
    if !interruptible_sleep(interval, cancel) {
        return false;
    }
    publish(status_cb, camera_id, CameraStatus::Reconnecting, "retrying connection");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::FramePool;
    use ingest_media::testsupport::MockSource;
    use std::sync::mpsc;

    fn spawn_for_test(
        source: MockSource,
        target_fps: u32,
        reconnect_interval: Duration,
    ) -> (JoinHandle<()>, Arc<AtomicBool>, mpsc::Receiver<StatusEvent>, mpsc::Receiver<(i32, i64)>) {
        let pool = FramePool::new(4);
        let (status_tx, status_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let status_cb: StatusCallback = Arc::new(move |ev: StatusEvent| {
            let _ = status_tx.send(ev);
        });
        let frame_cb: FrameCallback = Arc::new(move |camera_id, buf| {
            let _ = frame_tx.send((camera_id, buf.pts()));
        });

        let source = Mutex::new(Some(source));
        let source_factory: Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync> =
            Arc::new(move || Box::new(source.lock().unwrap().take().expect("factory called once in tests")) as Box<dyn FrameSource>);

        let mut config = EngineConfig::default();
        config.reconnect_interval_secs = reconnect_interval.as_secs().max(1);

        let params = WorkerParams {
            camera_id: 1,
            url: "mock://camera".into(),
            target_fps,
            pool,
            frame_cb,
            status_cb,
            cancel: cancel.clone(),
            last_frame_at: Arc::new(Mutex::new(None)),
            config,
            source_factory,
        };
        (spawn(params), cancel, status_rx, frame_rx)
    }

    #[test]
    fn delivers_frames_with_nondecreasing_pts_then_stops_on_cancel() {
        let source = MockSource::always_connects(5).with_dimensions(8, 6);
        let (handle, cancel, status_rx, frame_rx) = spawn_for_test(source, 0, Duration::from_millis(50));

        // Let the mock source exhaust its five frames; it'll then fail to
        // open forever (no more scripted opens) and sit in WAITING_RECONNECT.
        let mut last_pts = -1;
        let mut received = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while received < 5 && Instant::now() < deadline {
            if let Ok((_, pts)) = frame_rx.recv_timeout(Duration::from_millis(200)) {
                assert!(pts >= last_pts);
                last_pts = pts;
                received += 1;
            }
        }
        assert_eq!(received, 5);

        cancel.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let statuses: Vec<_> = std::iter::from_fn(|| status_rx.try_recv().ok()).collect();
        assert!(statuses.iter().any(|e| e.status == CameraStatus::Connecting));
        assert!(statuses.iter().any(|e| e.status == CameraStatus::Connected));
        assert_eq!(statuses.last().unwrap().status, CameraStatus::Stopped);
    }

    #[test]
    fn never_connects_cycles_disconnected_until_cancelled() {
        let source = MockSource::never_connects();
        let (handle, cancel, status_rx, _frame_rx) = spawn_for_test(source, 1, Duration::from_millis(20));

        // Observe at least two DISCONNECTED transitions before cancelling.
        let mut disconnected = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while disconnected < 2 && Instant::now() < deadline {
            if let Ok(ev) = status_rx.recv_timeout(Duration::from_millis(200)) {
                if ev.status == CameraStatus::Disconnected {
                    disconnected += 1;
                }
            }
        }
        assert!(disconnected >= 2);

        cancel.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
