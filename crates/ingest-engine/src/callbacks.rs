// crates/ingest-engine/src/callbacks.rs
//
// Callback types shared by the registry, the worker and the facade. Kept as
// plain `Arc<dyn Fn>` closures in the safe Rust-native API — user_data is
// just whatever the closure captures. The `extern "C"` facade (`facade.rs`)
// is the only place that deals with raw function pointers and opaque
// `*mut c_void` user-data, wrapping them into one of these before handing
// them to the registry (§9: no back-pointer, no second implementation).

use std::sync::Arc;

use ingest_core::{BufferHandle, StatusEvent};

pub type FrameCallback = Arc<dyn Fn(i32, &BufferHandle) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(StatusEvent) + Send + Sync>;
