// crates/ingest-engine/tests/lifecycle.rs
//
// Integration-level tests for the registry + worker + pool wired together
// (SPEC_FULL §8): scenarios that need more than one module to observe,
// driven against the in-process mock pipeline rather than a live network
// endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ingest_core::{CameraStatus, EngineConfig, StatusEvent};
use ingest_engine::{BufferHandle, FrameCallback, Registry, StatusCallback};
use ingest_media::testsupport::MockSource;
use ingest_media::FrameSource;

fn registry_with(sources: Vec<MockSource>) -> Registry {
    let sources = Arc::new(Mutex::new(sources.into_iter()));
    Registry::with_source_factory(Arc::new(move || {
        Box::new(sources.lock().unwrap().next().unwrap_or_else(MockSource::never_connects)) as Box<dyn FrameSource>
    }))
}

fn fast_config(max_slots: usize, pool_capacity: usize) -> EngineConfig {
    EngineConfig {
        max_slots,
        pool_capacity,
        connect_timeout_ms: 50,
        read_timeout_ms: 50,
        reconnect_interval_secs: 1,
        stop_join_timeout_ms: 500,
        shutdown_grace_ms: 1000,
        auto_reconnect: false,
    }
}

fn counting_callbacks() -> (FrameCallback, StatusCallback, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let frames = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    let f = frames.clone();
    let frame_cb: FrameCallback = Arc::new(move |_camera_id: i32, _buf: &BufferHandle| {
        f.fetch_add(1, Ordering::Relaxed);
    });
    let s = stops.clone();
    let status_cb: StatusCallback = Arc::new(move |ev: StatusEvent| {
        if ev.status == CameraStatus::Stopped {
            s.fetch_add(1, Ordering::Relaxed);
        }
    });
    (frame_cb, status_cb, frames, stops)
}

#[test]
fn add_stop_add_never_loses_or_duplicates_a_slot() {
    let registry = registry_with(vec![
        MockSource::always_connects(1000),
        MockSource::always_connects(1000),
        MockSource::always_connects(1000),
    ]);
    registry.initialize(fast_config(4, 8)).unwrap();

    let (frame_cb, status_cb, _frames, stops) = counting_callbacks();
    registry.add_camera(1, "rtsp://a", frame_cb.clone(), status_cb.clone(), 0).unwrap();
    assert_eq!(registry.stats().len(), 1);

    registry.stop_camera(1).unwrap();
    assert_eq!(stops.load(Ordering::Relaxed), 1);
    assert_eq!(registry.stats().len(), 0);

    registry.add_camera(1, "rtsp://a", frame_cb, status_cb, 0).unwrap();
    assert_eq!(registry.stats().len(), 1);

    registry.shutdown();
}

#[test]
fn shutdown_produces_exactly_one_stopped_per_active_camera() {
    let registry = registry_with(vec![
        MockSource::always_connects(1000),
        MockSource::always_connects(1000),
        MockSource::always_connects(1000),
    ]);
    registry.initialize(fast_config(4, 8)).unwrap();

    let mut stop_counters = Vec::new();
    for id in 1..=3 {
        let (frame_cb, status_cb, _frames, stops) = counting_callbacks();
        registry.add_camera(id, format!("rtsp://cam-{id}"), frame_cb, status_cb, 0).unwrap();
        stop_counters.push(stops);
    }

    // Let every worker reach CONNECTED before tearing down.
    std::thread::sleep(Duration::from_millis(150));
    registry.shutdown();

    for stops in stop_counters {
        assert_eq!(stops.load(Ordering::Relaxed), 1);
    }
}

#[test]
fn pool_exhaustion_drops_frames_without_leaking_slots() {
    // One pool slot, two cameras competing for it — the second acquire on
    // any given tick must fail closed (dropped frame) rather than block or
    // panic, and the pool must fully recover once both cameras stop.
    let registry = registry_with(vec![
        MockSource::always_connects(50),
        MockSource::always_connects(50),
    ]);
    registry.initialize(fast_config(4, 1)).unwrap();

    let (frame_cb_a, status_cb_a, frames_a, _) = counting_callbacks();
    let (frame_cb_b, status_cb_b, frames_b, _) = counting_callbacks();
    registry.add_camera(1, "rtsp://a", frame_cb_a, status_cb_a, 0).unwrap();
    registry.add_camera(2, "rtsp://b", frame_cb_b, status_cb_b, 0).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline
        && frames_a.load(Ordering::Relaxed) + frames_b.load(Ordering::Relaxed) == 0
    {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(frames_a.load(Ordering::Relaxed) + frames_b.load(Ordering::Relaxed) > 0);

    registry.shutdown();
    // after shutdown, nothing is tracked — the pool itself is gone.
    assert!(registry.pool_stats().is_none());
}

#[test]
fn id_in_use_and_no_free_slot_are_reported_and_do_not_corrupt_state() {
    let registry = registry_with(vec![MockSource::always_connects(1000), MockSource::always_connects(1000)]);
    registry.initialize(fast_config(1, 4)).unwrap();

    let (frame_cb, status_cb, _, _) = counting_callbacks();
    registry.add_camera(1, "rtsp://a", frame_cb.clone(), status_cb.clone(), 0).unwrap();

    let dup = registry.add_camera(1, "rtsp://a-again", frame_cb.clone(), status_cb.clone(), 0);
    assert!(dup.is_err());
    let full = registry.add_camera(2, "rtsp://b", frame_cb, status_cb, 0);
    assert!(full.is_err());

    // Exactly the one originally-added camera is present.
    let stats = registry.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].camera_id, 1);

    registry.shutdown();
}

#[test]
fn report_stuck_makes_a_connected_camera_eligible_for_the_next_sweep() {
    let registry = registry_with(vec![MockSource::always_connects(1000)]);
    registry.initialize(fast_config(2, 4)).unwrap();

    let (frame_cb, status_cb, frames, _) = counting_callbacks();
    registry.add_camera(1, "rtsp://a", frame_cb, status_cb, 0).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while frames.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(frames.load(Ordering::Relaxed) > 0);

    registry.report_stuck(1).unwrap();
    let stats = registry.stats();
    assert!(stats.iter().any(|s| s.camera_id == 1 && s.technically_failed));

    registry.shutdown();
}
