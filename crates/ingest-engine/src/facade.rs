// crates/ingest-engine/src/facade.rs
//
// Public API Facade (§4.6): a safe Rust-native `EngineHandle` wrapping the
// registry, plus the `extern "C"` shim layer the crate builds a `cdylib`
// for. The shim is deliberately thin — it marshals C types into the Rust
// API's closures and structs and calls straight through to `EngineHandle`;
// none of the component logic lives here, matching the original C
// library's `camera_pipeline/core/c_interface.py` boundary in spirit.
//
// `EngineHandle` is what this crate's own tests and the demo binary use
// directly — the `extern "C"` functions below are a second, narrower door
// into the same object, not a second implementation.

use std::ffi::{c_char, c_void, CStr};
use std::sync::{Arc, OnceLock};

use ingest_core::{BufferHandle, CameraStatus, EngineConfig, LogLevel, RegistryError, StatusEvent};

use crate::callbacks::{FrameCallback, StatusCallback};
use crate::registry::{CameraSnapshot, Registry};

/// Safe Rust-native facade. Cheap to clone (wraps one `Registry`, itself an
/// `Arc`). Construct one with `EngineHandle::new()` and call `initialize`
/// before adding cameras — mirrors the registry's own lifecycle, this type
/// adds nothing but the public entry points named in §4.6.
#[derive(Clone)]
pub struct EngineHandle {
    registry: Registry,
}

impl EngineHandle {
    pub fn new() -> Self {
        Self { registry: Registry::new() }
    }

    pub fn initialize(&self, config: EngineConfig) -> Result<(), RegistryError> {
        self.registry.initialize(config)
    }

    pub fn add_camera(
        &self,
        camera_id: i32,
        url: impl Into<String>,
        frame_cb: FrameCallback,
        status_cb: StatusCallback,
        target_fps: u32,
    ) -> Result<(), RegistryError> {
        self.registry.add_camera(camera_id, url, frame_cb, status_cb, target_fps)
    }

    pub fn stop_camera(&self, camera_id: i32) -> Result<(), RegistryError> {
        self.registry.stop_camera(camera_id)
    }

    pub fn report_stuck(&self, camera_id: i32) -> Result<(), RegistryError> {
        self.registry.report_stuck(camera_id)
    }

    pub fn stats(&self) -> Vec<CameraSnapshot> {
        self.registry.stats()
    }

    pub fn shutdown(&self) {
        self.registry.shutdown()
    }

    /// Drives both the engine's own `log` filter and ffmpeg's internal
    /// chattiness from one `LogLevel` value (§6).
    pub fn set_log_level(&self, level: LogLevel) {
        log::set_max_level(level.to_log_filter());
        ingest_media::set_ffmpeg_log_level(level);
    }
}

impl Default for EngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ── extern "C" boundary ──────────────────────────────────────────────
//
// The original library is a process-wide singleton (no handle threaded
// through every call) — `processor_initialize` lazily creates the one
// `EngineHandle` this process will ever use.

static SINGLETON: OnceLock<EngineHandle> = OnceLock::new();

fn singleton() -> &'static EngineHandle {
    SINGLETON.get_or_init(EngineHandle::new)
}

/// C layout mirror of `EngineConfig` (§6). `auto_reconnect` is an `i32`
/// (0/1) rather than `bool` — `bool`'s ABI is technically defined but
/// spelling it as `i32` matches the rest of the facade's boolean-as-int
/// convention and the original's ctypes structure.
#[repr(C)]
pub struct FfiEngineConfig {
    pub max_slots: usize,
    pub pool_capacity: usize,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub reconnect_interval_secs: u64,
    pub stop_join_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub auto_reconnect: i32,
}

impl From<&FfiEngineConfig> for EngineConfig {
    fn from(c: &FfiEngineConfig) -> Self {
        Self {
            max_slots: c.max_slots,
            pool_capacity: c.pool_capacity,
            connect_timeout_ms: c.connect_timeout_ms,
            read_timeout_ms: c.read_timeout_ms,
            reconnect_interval_secs: c.reconnect_interval_secs,
            stop_join_timeout_ms: c.stop_join_timeout_ms,
            shutdown_grace_ms: c.shutdown_grace_ms,
            auto_reconnect: c.auto_reconnect != 0,
        }
    }
}

/// Raw function pointer shape for the frame callback (§6 outbound frame
/// payload): one tightly-packed BGR24 plane, its linesize, the originating
/// camera id, the pixel format code, and the source's PTS. `format` is
/// always the library's BGR24 code today, but is carried across the ABI
/// boundary (as the original's `CallbackFrameData` does) since a C caller
/// has no other way to confirm what layout `data` is in. `handle` is an
/// opaque owned reference the C side may hold onto past the callback's
/// return by NOT calling `callback_pool_return_data` immediately — but it
/// must call it exactly once, eventually, or the slot leaks (§4.1
/// retain/release, spelled out explicitly at this boundary since C has no
/// `Drop`).
pub type FfiFrameCallback = extern "C" fn(
    camera_id: i32,
    data: *const u8,
    len: usize,
    width: i32,
    height: i32,
    format: i32,
    linesize: i32,
    pts: i64,
    handle: *mut c_void,
    user_data: *mut c_void,
);

pub type FfiStatusCallback =
    extern "C" fn(camera_id: i32, status: i32, message: *const c_char, user_data: *mut c_void);

/// Wraps a raw pointer so it can be captured by a `Send + Sync` closure.
/// Sound only because the facade never dereferences it itself — it is
/// handed straight back to the C caller, which owns its own thread-safety
/// contract for `user_data`.
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

fn build_frame_callback(cb: FfiFrameCallback, user_data: *mut c_void) -> FrameCallback {
    let user_data = SendPtr(user_data);
    Arc::new(move |camera_id: i32, buf: &BufferHandle| {
        let linesize = buf.linesize()[0];
        let retained = buf.retain();
        let boxed = Box::into_raw(Box::new(retained)) as *mut c_void;
        buf.with_plane(0, |plane| {
            cb(
                camera_id,
                plane.as_ptr(),
                plane.len(),
                buf.width(),
                buf.height(),
                buf.format() as i32,
                linesize,
                buf.pts(),
                boxed,
                user_data.0,
            );
        });
    })
}

fn build_status_callback(cb: FfiStatusCallback, user_data: *mut c_void) -> StatusCallback {
    let user_data = SendPtr(user_data);
    Arc::new(move |ev: StatusEvent| {
        let message = match std::ffi::CString::new(ev.message) {
            Ok(c) => c,
            Err(_) => std::ffi::CString::new("<message contained NUL>").unwrap(),
        };
        cb(ev.camera_id, ev.status as i32, message.as_ptr(), user_data.0);
    })
}

/// # Safety
/// `config` must be null or point to a valid, initialized `FfiEngineConfig`.
#[no_mangle]
pub unsafe extern "C" fn processor_initialize(config: *const FfiEngineConfig) -> i32 {
    let cfg = if config.is_null() { EngineConfig::default() } else { EngineConfig::from(&*config) };
    match singleton().initialize(cfg) {
        Ok(()) => ingest_core::codes::OK,
        Err(e) => e.as_code(),
    }
}

/// # Safety
/// `url` must be a valid, NUL-terminated UTF-8 C string. The callback
/// pointers must remain valid for as long as the camera is running —
/// typically the process lifetime.
#[no_mangle]
pub unsafe extern "C" fn processor_add_camera(
    camera_id: i32,
    url: *const c_char,
    target_fps: u32,
    frame_cb: FfiFrameCallback,
    frame_user_data: *mut c_void,
    status_cb: FfiStatusCallback,
    status_user_data: *mut c_void,
) -> i32 {
    if url.is_null() {
        return ingest_core::codes::INVALID_ARGUMENT;
    }
    let url = match CStr::from_ptr(url).to_str() {
        Ok(s) => s.to_owned(),
        Err(_) => return ingest_core::codes::INVALID_ARGUMENT,
    };
    let frame_cb = build_frame_callback(frame_cb, frame_user_data);
    let status_cb = build_status_callback(status_cb, status_user_data);
    match singleton().add_camera(camera_id, url, frame_cb, status_cb, target_fps) {
        Ok(()) => ingest_core::codes::OK,
        Err(e) => e.as_code(),
    }
}

#[no_mangle]
pub extern "C" fn processor_stop_camera(camera_id: i32) -> i32 {
    match singleton().stop_camera(camera_id) {
        Ok(()) => ingest_core::codes::OK,
        Err(e) => e.as_code(),
    }
}

#[no_mangle]
pub extern "C" fn processor_report_stuck(camera_id: i32) -> i32 {
    match singleton().report_stuck(camera_id) {
        Ok(()) => ingest_core::codes::OK,
        Err(e) => e.as_code(),
    }
}

#[no_mangle]
pub extern "C" fn processor_shutdown() {
    singleton().shutdown();
}

/// Releases one retained reference handed out through a frame callback's
/// `handle` parameter (§4.1 `release`, the explicit FFI-facing form).
///
/// # Safety
/// `handle` must be a pointer previously returned to a frame callback by
/// this library, not yet passed to this function before.
#[no_mangle]
pub unsafe extern "C" fn callback_pool_return_data(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }
    drop(Box::from_raw(handle as *mut BufferHandle));
}

#[no_mangle]
pub extern "C" fn logger_set_level(level: i32) {
    let level = match level {
        -8 => LogLevel::Quiet,
        0 => LogLevel::Panic,
        8 => LogLevel::Fatal,
        16 => LogLevel::Error,
        24 => LogLevel::Warning,
        32 => LogLevel::Info,
        40 => LogLevel::Verbose,
        48 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    singleton().set_log_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_media::testsupport::MockSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn handle_with_mock(sources: Vec<MockSource>) -> EngineHandle {
        let sources = Arc::new(StdMutex::new(sources.into_iter()));
        EngineHandle {
            registry: Registry::with_source_factory(Arc::new(move || {
                Box::new(sources.lock().unwrap().next().unwrap_or_else(MockSource::never_connects))
                    as Box<dyn ingest_media::FrameSource>
            })),
        }
    }

    #[test]
    fn safe_facade_reports_connected_status() {
        let engine = handle_with_mock(vec![MockSource::always_connects(3)]);
        let mut cfg = EngineConfig::default();
        cfg.auto_reconnect = false;
        engine.initialize(cfg).unwrap();

        let seen_connected = Arc::new(AtomicUsize::new(0));
        let flag = seen_connected.clone();
        let status_cb: StatusCallback = Arc::new(move |ev: StatusEvent| {
            if ev.status == CameraStatus::Connected {
                flag.fetch_add(1, Ordering::Relaxed);
            }
        });
        let frame_cb: FrameCallback = Arc::new(|_, _| {});

        engine.add_camera(1, "rtsp://x", frame_cb, status_cb, 0).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while seen_connected.load(Ordering::Relaxed) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(seen_connected.load(Ordering::Relaxed), 1);
        engine.shutdown();
    }
}
