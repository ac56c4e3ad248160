// crates/ingest-media/src/testsupport.rs
//
// In-process mock `FrameSource` used by `ingest-engine`'s invariant and
// lifecycle tests (SPEC_FULL §8). Exercises the worker state machine
// (connect → read → decode → reconnect) deterministically, without a real
// network endpoint or an ffmpeg dependency on the other end.

use std::collections::VecDeque;
use std::time::Duration;

use crate::pipeline::{DecodedFrame, FrameSource, PipelineError};

/// Scripted behavior for one `MockSource::open` / stream lifetime.
#[derive(Clone)]
pub enum MockStep {
    Frame { pts: i64 },
    /// A decoded-but-discarded packet (§4.3 step 5 — corrupt frame).
    CorruptPacket,
    /// Simulates pool exhaustion upstream — not produced by the source
    /// itself, kept only for completeness of the scripting vocabulary.
    EndOfStream,
}

/// A `FrameSource` whose `open()` and `read_frame()` results are scripted
/// ahead of time. `open_results` is consumed one entry per `open()` call,
/// so a test can make the Nth connection attempt fail to exercise the
/// reconnect loop, then let a later attempt succeed.
pub struct MockSource {
    open_results: VecDeque<Result<(), PipelineError>>,
    steps: VecDeque<MockStep>,
    opened: bool,
    dims: (i32, i32),
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            open_results: VecDeque::new(),
            steps: VecDeque::new(),
            opened: false,
            dims: (64, 48),
        }
    }

    pub fn with_dimensions(mut self, width: i32, height: i32) -> Self {
        self.dims = (width, height);
        self
    }

    /// Always connects successfully and yields `frame_count` frames with
    /// strictly increasing PTS before reporting end-of-stream.
    pub fn always_connects(frame_count: i64) -> Self {
        let mut s = Self::new();
        s.open_results.push_back(Ok(()));
        for pts in 0..frame_count {
            s.steps.push_back(MockStep::Frame { pts });
        }
        s
    }

    /// Never connects — every `open()` call fails, forever. Used to drive
    /// the "unreachable URL" reconnect-cycle scenario.
    pub fn never_connects() -> Self {
        Self::new()
    }

    pub fn queue_open(&mut self, result: Result<(), PipelineError>) {
        self.open_results.push_back(result);
    }

    pub fn queue_frame(&mut self, pts: i64) {
        self.steps.push_back(MockStep::Frame { pts });
    }

    pub fn queue_corrupt(&mut self) {
        self.steps.push_back(MockStep::CorruptPacket);
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for MockSource {
    fn open(&mut self, _url: &str, _connect_timeout: Duration, _read_timeout: Duration) -> Result<(), PipelineError> {
        self.opened = true;
        match self.open_results.pop_front() {
            Some(result) => result,
            // Exhausted script: default to "open failed" so a test that
            // forgets to queue enough attempts fails loudly via DISCONNECTED
            // transitions rather than looping forever on phantom frames.
            None => Err(PipelineError::OpenFailed("mock source: no more scripted opens".into())),
        }
    }

    fn read_frame(&mut self, target_w: i32, target_h: i32) -> Result<Option<DecodedFrame>, PipelineError> {
        if !self.opened {
            return Err(PipelineError::OpenFailed("read before open".into()));
        }
        match self.steps.pop_front() {
            Some(MockStep::Frame { pts }) => {
                let data = vec![0u8; (target_w * target_h * 3) as usize];
                Ok(Some(DecodedFrame {
                    width: target_w,
                    height: target_h,
                    pts,
                    data,
                }))
            }
            Some(MockStep::CorruptPacket) => Err(PipelineError::CorruptPacket),
            Some(MockStep::EndOfStream) | None => Err(PipelineError::EndOfStream),
        }
    }

    fn dimensions(&self) -> Option<(i32, i32)> {
        self.opened.then_some(self.dims)
    }

    fn close(&mut self) {
        self.opened = false;
    }
}
