// crates/ingest-core/src/types.rs
//
// Plain wire-level types shared between ingest-media and ingest-engine.
// No ffmpeg here — just the enums and structs that cross thread and
// (eventually) FFI boundaries.

use std::fmt;

/// Pixel format codes. Mirrors the `AV_PIX_FMT_*` constants the original
/// C library exposed to its ctypes binding — only the values this engine
/// actually produces or accepts are named; everything else decodes to
/// `None`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    None = -1,
    Yuv420p = 0,
    Yuyv422 = 1,
    Rgb24 = 2,
    Bgr24 = 3,
}

impl PixelFormat {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Yuv420p,
            1 => Self::Yuyv422,
            2 => Self::Rgb24,
            3 => Self::Bgr24,
            _ => Self::None,
        }
    }
}

/// Camera lifecycle status, delivered through the status callback.
/// Numeric values match the facade's documented wire codes exactly.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Stopped = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
    WaitingReconnect = 4,
    Reconnecting = 5,
    /// Reserved — no worker currently emits this, kept for facade stability.
    Buffering = 6,
    NoFreeSlot = 7,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::WaitingReconnect => "WAITING_RECONNECT",
            Self::Reconnecting => "RECONNECTING",
            Self::Buffering => "BUFFERING",
            Self::NoFreeSlot => "NO_FREE_SLOT",
        };
        f.write_str(s)
    }
}

/// A status-callback event: one state transition for one camera.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub camera_id: i32,
    pub status: CameraStatus,
    pub message: String,
}

/// Log verbosity, shared by the engine's own `log` records and by the
/// ffmpeg decoding library's internal logger. Values match FFmpeg's
/// `AV_LOG_*` levels (and, in turn, the original C library's
/// `LOG_LEVEL_*` mirror constants) so `set_log_level` can drive both with
/// one number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Quiet = -8,
    Panic = 0,
    Fatal = 8,
    Error = 16,
    Warning = 24,
    Info = 32,
    Verbose = 40,
    Debug = 48,
    Trace = 56,
}

impl LogLevel {
    /// Maps onto the `log` crate's level filter for this engine's own
    /// structured logging. `Quiet` and `Panic` both collapse to `Off`
    /// since neither has a sensible `log::Level` counterpart.
    pub fn to_log_filter(self) -> log::LevelFilter {
        match self {
            Self::Quiet | Self::Panic => log::LevelFilter::Off,
            Self::Fatal | Self::Error => log::LevelFilter::Error,
            Self::Warning => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Verbose | Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Facade-level error return codes, as documented for binding authors.
/// `RegistryError` (see `error.rs`) is the typed Rust-side source of truth;
/// this is only the numeric projection of it.
pub mod codes {
    pub const OK: i32 = 0;
    pub const NOT_INITIALIZED: i32 = -1;
    pub const INVALID_ID: i32 = -2;
    pub const INVALID_ARGUMENT: i32 = -3;
    pub const ID_IN_USE: i32 = -4;
    pub const WORKER_START_FAILED: i32 = -5;
    pub const UNSPECIFIED: i32 = -99;
}
