// crates/ingest-core/src/pool.rs
//
// Fixed-capacity pool of reusable pixel buffers (§4.1). This is the only
// path pixel data takes from a decoder thread to a consumer: every
// `CameraWorker` acquires a buffer here, rescales into it, hands it to the
// frame callback, and releases it — no per-frame heap allocation in the
// steady state once every slot has grown to its working size.
//
// `BufferHandle` models retain/release as Rust ownership: cloning a handle
// is `retain`, dropping the last clone is `release`. This is the "idiomatic
// Rust" rendering of the original's separate retain()/release() calls —
// bindings that need the explicit calls (e.g. an `extern "C"` facade) get
// them back via `BufferHandle::retain` and `BufferHandle::release`, which
// just wrap clone/drop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::PixelFormat;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("frame buffer pool exhausted")]
    Exhausted,
}

/// Point-in-time pool occupancy, for the registry's `stats()` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub free: usize,
    pub high_water: usize,
}

/// Owned pixel storage plus the metadata the frame callback payload needs.
/// Never touched directly by callers — reached through `BufferHandle`.
struct SlotData {
    width: i32,
    height: i32,
    format: PixelFormat,
    pts: i64,
    camera_id: i32,
    linesize: [i32; 4],
    buffer_capacity: [usize; 4],
    data: [Vec<u8>; 4],
}

impl SlotData {
    fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::None,
            pts: 0,
            camera_id: -1,
            linesize: [0; 4],
            buffer_capacity: [0; 4],
            data: Default::default(),
        }
    }

    /// Grows plane storage in place if the requested dimensions need more
    /// than the buffer currently carries. Never shrinks — a buffer that
    /// once served a 1080p camera keeps that capacity even if later reused
    /// by a 480p one (§4.1: "the pool does not shrink").
    fn ensure_capacity(&mut self, width: i32, height: i32, format: PixelFormat) {
        let required = plane_sizes(width, height, format);
        for i in 0..4 {
            if self.data[i].len() < required[i] {
                self.data[i].resize(required[i], 0);
                self.buffer_capacity[i] = required[i];
            }
        }
        self.width = width;
        self.height = height;
        self.format = format;
        self.linesize = plane_linesize(width, format);
    }
}

/// Bytes required per plane for a tightly-packed (no stride padding) buffer
/// of the given dimensions and format. The pool owns its allocation, so it
/// chooses a packed layout itself — the media pipeline is responsible for
/// stripping any padding FFmpeg's scaler introduces when it copies into
/// this storage (the same row-stripping `ingest-media`'s rescale step does
/// on every platform, mirroring the teacher's `decode.rs`).
fn plane_sizes(width: i32, height: i32, format: PixelFormat) -> [usize; 4] {
    let w = width.max(0) as usize;
    let h = height.max(0) as usize;
    match format {
        PixelFormat::Bgr24 | PixelFormat::Rgb24 => [w * h * 3, 0, 0, 0],
        PixelFormat::Yuyv422 => [w * h * 2, 0, 0, 0],
        PixelFormat::Yuv420p => {
            let cw = (w + 1) / 2;
            let ch = (h + 1) / 2;
            [w * h, cw * ch, cw * ch, 0]
        }
        PixelFormat::None => [0, 0, 0, 0],
    }
}

fn plane_linesize(width: i32, format: PixelFormat) -> [i32; 4] {
    match format {
        PixelFormat::Bgr24 | PixelFormat::Rgb24 => [width * 3, 0, 0, 0],
        PixelFormat::Yuyv422 => [width * 2, 0, 0, 0],
        PixelFormat::Yuv420p => [width, (width + 1) / 2, (width + 1) / 2, 0],
        PixelFormat::None => [0, 0, 0, 0],
    }
}

struct Slot {
    data: Mutex<SlotData>,
    ref_count: AtomicI32,
}

struct PoolInner {
    slots: Vec<Arc<Slot>>,
    free: Mutex<VecDeque<usize>>,
    high_water: AtomicUsize,
}

/// Fixed-capacity frame buffer pool. Cheap to clone — internally an `Arc`.
#[derive(Clone)]
pub struct FramePool(Arc<PoolInner>);

impl FramePool {
    /// Allocates `capacity` empty slots. No pixel storage is reserved yet —
    /// each slot grows to its working size on first `acquire` (§4.1).
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| {
                Arc::new(Slot {
                    data: Mutex::new(SlotData::empty()),
                    ref_count: AtomicI32::new(0),
                })
            })
            .collect();
        let free = (0..capacity).collect();
        Self(Arc::new(PoolInner {
            slots,
            free: Mutex::new(free),
            high_water: AtomicUsize::new(0),
        }))
    }

    /// Non-blocking. Returns `Exhausted` if every buffer currently has a
    /// positive ref count — the worker's cue to drop the frame (§4.1, the
    /// pool's only backpressure mechanism).
    pub fn acquire(
        &self,
        camera_id: i32,
        width: i32,
        height: i32,
        format: PixelFormat,
    ) -> Result<BufferHandle, PoolError> {
        let index = {
            let mut free = self.0.free.lock();
            free.pop_front().ok_or(PoolError::Exhausted)?
        };
        let slot = self.0.slots[index].clone();
        {
            let mut data = slot.data.lock();
            data.ensure_capacity(width, height, format);
            data.pts = 0;
            data.camera_id = camera_id;
        }
        slot.ref_count.store(1, Ordering::Release);

        let in_use = self.0.slots.len() - self.0.free.lock().len();
        self.0.high_water.fetch_max(in_use, Ordering::Relaxed);

        Ok(BufferHandle {
            pool: self.0.clone(),
            index,
            slot,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let free = self.0.free.lock().len();
        let total = self.0.slots.len();
        PoolStats {
            in_use: total - free,
            free,
            high_water: self.0.high_water.load(Ordering::Relaxed),
        }
    }

    fn release(&self, index: usize) {
        let mut free = self.0.free.lock();
        debug_assert!(!free.contains(&index), "double release of pool slot {index}");
        free.push_back(index);
    }
}

/// A reference to an in-use `FrameBuffer`. Clone to `retain`, drop to
/// `release` — the last clone dropped returns the slot to the pool's free
/// list. Plane pointers stay stable across release/reacquire; only the
/// ref count and logical metadata (`pts`, `camera_id`, dimensions) reset.
pub struct BufferHandle {
    pool: Arc<PoolInner>,
    index: usize,
    slot: Arc<Slot>,
}

impl BufferHandle {
    pub fn camera_id(&self) -> i32 {
        self.slot.data.lock().camera_id
    }

    pub fn width(&self) -> i32 {
        self.slot.data.lock().width
    }

    pub fn height(&self) -> i32 {
        self.slot.data.lock().height
    }

    pub fn format(&self) -> PixelFormat {
        self.slot.data.lock().format
    }

    pub fn pts(&self) -> i64 {
        self.slot.data.lock().pts
    }

    pub fn set_pts(&self, pts: i64) {
        self.slot.data.lock().pts = pts;
    }

    pub fn linesize(&self) -> [i32; 4] {
        self.slot.data.lock().linesize
    }

    pub fn buffer_capacity(&self) -> [usize; 4] {
        self.slot.data.lock().buffer_capacity
    }

    /// Atomic read, per §5's "reference counts are atomic".
    pub fn ref_count(&self) -> i32 {
        self.slot.ref_count.load(Ordering::Acquire)
    }

    /// Exclusive access to one plane's backing storage, for the rescale
    /// step to copy decoded pixels into. Held only for the duration of the
    /// copy — never across a callback invocation.
    pub fn with_plane_mut<R>(&self, plane: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.slot.data.lock();
        f(&mut data.data[plane])
    }

    /// Borrowed read access to one plane — what the frame callback sees.
    /// The lock is held only for the duration of `f`; a consumer that wants
    /// the data after the callback returns must `retain()` first.
    pub fn with_plane<R>(&self, plane: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.slot.data.lock();
        f(&data.data[plane])
    }

    /// Atomic increment (§4.1 `retain`). Returns an owned handle to the same
    /// slot; the slot is not returned to the free list until every clone
    /// (the original plus every `retain`) has been dropped.
    pub fn retain(&self) -> BufferHandle {
        self.slot.ref_count.fetch_add(1, Ordering::AcqRel);
        BufferHandle {
            pool: self.pool.clone(),
            index: self.index,
            slot: self.slot.clone(),
        }
    }

    /// Atomic decrement (§4.1 `release`). Equivalent to `drop(handle)` —
    /// spelled out for callers (and the FFI facade) that prefer an explicit
    /// call over relying on scope exit.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if self.slot.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.pool.release(self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_sets_ref_count_one_and_fills_camera_id() {
        let pool = FramePool::new(2);
        let buf = pool.acquire(7, 4, 2, PixelFormat::Bgr24).unwrap();
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(buf.camera_id(), 7);
        assert_eq!(buf.buffer_capacity()[0], 4 * 2 * 3);
    }

    #[test]
    fn exhaustion_when_every_buffer_is_in_use() {
        let pool = FramePool::new(1);
        let _a = pool.acquire(1, 4, 4, PixelFormat::Bgr24).unwrap();
        assert_eq!(
            pool.acquire(2, 4, 4, PixelFormat::Bgr24).unwrap_err(),
            PoolError::Exhausted
        );
    }

    #[test]
    fn release_returns_buffer_to_free_list() {
        let pool = FramePool::new(1);
        let a = pool.acquire(1, 4, 4, PixelFormat::Bgr24).unwrap();
        drop(a);
        let b = pool.acquire(2, 4, 4, PixelFormat::Bgr24);
        assert!(b.is_ok());
    }

    #[test]
    fn retain_keeps_buffer_alive_past_first_drop() {
        let pool = FramePool::new(1);
        let a = pool.acquire(1, 4, 4, PixelFormat::Bgr24).unwrap();
        let retained = a.retain();
        assert_eq!(a.ref_count(), 2);
        drop(a);
        // still held by `retained` — pool must still report exhausted.
        assert_eq!(
            pool.acquire(2, 4, 4, PixelFormat::Bgr24).unwrap_err(),
            PoolError::Exhausted
        );
        drop(retained);
        assert!(pool.acquire(2, 4, 4, PixelFormat::Bgr24).is_ok());
    }

    #[test]
    fn never_shrinks_buffer_capacity() {
        let pool = FramePool::new(1);
        let big = pool.acquire(1, 1920, 1080, PixelFormat::Bgr24).unwrap();
        let big_cap = big.buffer_capacity()[0];
        drop(big);
        let small = pool.acquire(2, 320, 240, PixelFormat::Bgr24).unwrap();
        assert_eq!(small.buffer_capacity()[0], big_cap);
    }

    #[test]
    fn stats_reports_in_use_free_and_high_water() {
        let pool = FramePool::new(3);
        let a = pool.acquire(1, 4, 4, PixelFormat::Bgr24).unwrap();
        let b = pool.acquire(2, 4, 4, PixelFormat::Bgr24).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.free, 1);
        assert_eq!(stats.high_water, 2);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.stats().high_water, 2);
    }
}
