// crates/ingest-engine/src/lib.rs
//
// Multi-camera ingest engine: per-camera worker threads, the processor
// registry that owns the slot table, the reconnect supervisor, and the
// public facade (both the safe Rust-native `EngineHandle` and the
// `extern "C"` shim built alongside it — see `facade.rs`). `ingest-core`
// carries the plain data types and `ingest-media` the ffmpeg adapter; this
// crate wires them together into the running system.

pub mod callbacks;
pub mod facade;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use callbacks::{FrameCallback, StatusCallback};
pub use facade::EngineHandle;
pub use registry::{CameraSnapshot, Registry};

pub use ingest_core::{
    codes, BufferHandle, CameraStatus, EngineConfig, LogLevel, PixelFormat, PoolError, PoolStats,
    RegistryError, StatusEvent,
};
