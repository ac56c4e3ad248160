// crates/ingest-media/src/lib.rs
//
// Media Pipeline Primitives (§4.2): a thin, stateless-beyond-the-open-context
// adapter over `ffmpeg-the-third`. `ingest-engine`'s `CameraWorker` never
// touches ffmpeg types directly — it drives a `FrameSource` trait object,
// which is either the real `FfmpegSource` here or, in tests, the in-process
// mock in `testsupport` (SPEC_FULL §8: invariant tests run against a mock
// pipeline, not a live network endpoint).

pub mod pipeline;
pub mod testsupport;

use std::sync::Once;

pub use pipeline::{DecodedFrame, FfmpegSource, FrameSource, PipelineError};

static FFMPEG_INIT: Once = Once::new();

/// Initializes the ffmpeg-the-third global state exactly once per process
/// (§9: "ffmpeg's own global init must run exactly once, guarded, before
/// any camera worker opens a stream"). Safe to call from every
/// `Registry::initialize` — the `Once` makes repeats free.
pub fn init() -> Result<(), PipelineError> {
    let mut result = Ok(());
    FFMPEG_INIT.call_once(|| {
        result = ffmpeg_the_third::init().map_err(|e| PipelineError::OpenFailed(e.to_string()));
    });
    result
}

/// Tunes ffmpeg's own log chattiness. Independent of the engine's `log`
/// records — the facade's `set_log_level` drives both from one
/// `ingest_core::LogLevel` value (§6).
pub fn set_ffmpeg_log_level(level: ingest_core::LogLevel) {
    use ffmpeg_the_third::util::log::level::Level as FfmpegLevel;
    use ingest_core::LogLevel;
    let mapped = match level {
        LogLevel::Quiet => FfmpegLevel::Quiet,
        LogLevel::Panic => FfmpegLevel::Panic,
        LogLevel::Fatal => FfmpegLevel::Fatal,
        LogLevel::Error => FfmpegLevel::Error,
        LogLevel::Warning => FfmpegLevel::Warning,
        LogLevel::Info => FfmpegLevel::Info,
        LogLevel::Verbose => FfmpegLevel::Verbose,
        LogLevel::Debug => FfmpegLevel::Debug,
        LogLevel::Trace => FfmpegLevel::Trace,
    };
    ffmpeg_the_third::util::log::set_level(mapped);
}
