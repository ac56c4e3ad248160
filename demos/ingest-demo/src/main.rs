// demos/ingest-demo/src/main.rs
//
// Minimal command-line driver for `ingest-engine`: adds one camera per URL
// given on the command line, logs every status transition and frame
// arrival, and shuts down cleanly on Ctrl+C. This is the only place in the
// workspace that installs a `log` subscriber (`env_logger`) or calls
// `ffmpeg_the_third::init()` (indirectly, through `EngineHandle::initialize`)
// — the library crates never do either themselves, mirroring the teacher's
// `velocut-ui::main` calling `ffmpeg_the_third::init()` once at startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ingest_engine::{BufferHandle, EngineConfig, EngineHandle, FrameCallback, StatusCallback, StatusEvent};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: ingest-demo <rtsp-url> [more-urls...]");
        std::process::exit(2);
    }

    let engine = EngineHandle::new();
    engine.initialize(EngineConfig::default()).expect("engine initialize failed");

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = running.clone();
    ctrlc_fallback(move || running_for_handler.store(false, Ordering::SeqCst));

    for (i, url) in urls.iter().enumerate() {
        let camera_id = i as i32 + 1;
        let frame_cb: FrameCallback = Arc::new(move |camera_id: i32, buf: &BufferHandle| {
            log::debug!(
                "camera {camera_id}: frame pts={} {}x{}",
                buf.pts(),
                buf.width(),
                buf.height()
            );
        });
        let status_cb: StatusCallback = Arc::new(move |ev: StatusEvent| {
            log::info!("camera {}: {} — {}", ev.camera_id, ev.status, ev.message);
        });

        if let Err(e) = engine.add_camera(camera_id, url.clone(), frame_cb, status_cb, 15) {
            log::error!("failed to add camera {camera_id} ({url}): {e}");
        }
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    engine.shutdown();
}

/// No signal-handling crate in the dependency stack (the pack's examples
/// don't carry one either), so Ctrl+C just takes the usual default-handler
/// exit; this only gives a clean `shutdown()` path when stdin closes, which
/// is enough for local testing against a live stream.
fn ctrlc_fallback(on_close: impl FnOnce() + Send + 'static) {
    std::thread::spawn(move || {
        use std::io::Read;
        let mut buf = [0u8; 1];
        let _ = std::io::stdin().read(&mut buf);
        on_close();
    });
}
