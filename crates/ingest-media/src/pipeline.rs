// crates/ingest-media/src/pipeline.rs
//
// Stateless façade over ffmpeg-the-third (§4.2): open-input, read-packet,
// decode, rescale. No retries live here — retry is `CameraWorker`'s job
// (§4.3). The four operations are composed into one `FrameSource::read_frame`
// call so the worker doesn't have to juggle packet/frame bookkeeping itself,
// the same shape as the teacher's `LiveDecoder::next_frame` in
// `velocut-media/src/decode.rs`, generalized from "decode the next frame of
// one open file" to "decode the next frame of one open network stream".

use std::collections::VecDeque;
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("open failed: {0}")]
    OpenFailed(String),
    #[error("connect/read timed out")]
    Timeout,
    #[error("end of stream")]
    EndOfStream,
    #[error("decoder error: {0}")]
    DecoderError(String),
    #[error("corrupt packet")]
    CorruptPacket,
}

/// One decoded, rescaled frame: tightly-packed BGR24, ready to copy into a
/// pool buffer. `pts` is the source's time base, passed through untouched
/// (§ GLOSSARY — opaque to the core).
pub struct DecodedFrame {
    pub width: i32,
    pub height: i32,
    pub pts: i64,
    pub data: Vec<u8>,
}

/// A source of decoded frames for one camera connection. `CameraWorker`
/// depends only on this trait, never on `ffmpeg-the-third` directly — the
/// same "no back-pointer, borrow only what's needed" discipline §9 asks of
/// the worker's relationship to the processor applies here to its
/// relationship with the decoding library.
pub trait FrameSource: Send {
    /// Open the stream. Bounded by `connect_timeout` where the underlying
    /// transport supports it (rtsp/rtmp/tcp `stimeout`/`rw_timeout` options).
    fn open(&mut self, url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<(), PipelineError>;

    /// Pull the next video frame, rescaled to `target_w`x`target_h` BGR24.
    /// Returns `Ok(None)` for a read that yielded no video frame (e.g. an
    /// audio packet, or a packet that decoded to nothing yet) without that
    /// being treated as end-of-stream; the worker just loops again.
    fn read_frame(&mut self, target_w: i32, target_h: i32) -> Result<Option<DecodedFrame>, PipelineError>;

    /// Native video dimensions, known once `open()` has succeeded. The
    /// worker rescales (color-space convert, not resize) to these — this
    /// engine never resizes for delivery, only BGR24-converts.
    fn dimensions(&self) -> Option<(i32, i32)>;

    fn close(&mut self);
}

/// Real implementation backed by ffmpeg-the-third.
pub struct FfmpegSource {
    ictx: Option<ffmpeg::format::context::Input>,
    decoder: Option<ffmpeg::decoder::video::Video>,
    video_stream_index: usize,
    scaler: Option<(i32, i32, SwsContext)>,
    /// Decoded frames the decoder has already emitted for the current
    /// packet but that `read_frame` hasn't handed out yet. Drained fully on
    /// every `send_packet` before the next packet is read, so the decoder's
    /// internal output queue is never left holding frames across calls —
    /// otherwise a later `send_packet` can fail with the decoder's own
    /// "buffer full" error, which looks identical to a corrupt packet.
    pending: VecDeque<ffmpeg::util::frame::video::Video>,
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self {
            ictx: None,
            decoder: None,
            video_stream_index: 0,
            scaler: None,
            pending: VecDeque::new(),
        }
    }
}

impl FfmpegSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn scaler_for(&mut self, target_w: i32, target_h: i32) -> Result<&mut SwsContext, PipelineError> {
        let decoder = self.decoder.as_ref().expect("open() called before read_frame()");
        let needs_rebuild = match &self.scaler {
            Some((w, h, _)) => *w != target_w || *h != target_h,
            None => true,
        };
        if needs_rebuild {
            let sws = SwsContext::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                Pixel::BGR24,
                target_w as u32,
                target_h as u32,
                Flags::BILINEAR,
            )
            .map_err(|e| PipelineError::DecoderError(e.to_string()))?;
            self.scaler = Some((target_w, target_h, sws));
        }
        Ok(&mut self.scaler.as_mut().unwrap().2)
    }

    /// Rescales one already-decoded frame into tightly-packed BGR24 bytes.
    fn to_decoded_frame(
        &mut self,
        decoded: &ffmpeg::util::frame::video::Video,
        target_w: i32,
        target_h: i32,
    ) -> Result<DecodedFrame, PipelineError> {
        let pts = decoded.pts().unwrap_or(0);
        let scaler = self.scaler_for(target_w, target_h)?;
        let mut out = ffmpeg::util::frame::video::Video::empty();
        scaler
            .run(decoded, &mut out)
            .map_err(|e| PipelineError::DecoderError(e.to_string()))?;

        let stride = out.stride(0);
        let row_bytes = target_w as usize * 3;
        let raw = out.data(0);
        let mut data = Vec::with_capacity(row_bytes * target_h as usize);
        for row in 0..target_h as usize {
            let s = row * stride;
            data.extend_from_slice(&raw[s..s + row_bytes]);
        }

        Ok(DecodedFrame { width: target_w, height: target_h, pts, data })
    }
}

/// Classifies an error surfaced while reading the next demuxer packet. A
/// live stream never cleanly reaches EOF the way a local file does — most
/// non-`Eof` errors here are the `rw_timeout`/`stimeout` dictionary options
/// firing, a reset connection, or some other transport failure, not a
/// corrupt bitstream. Only `InvalidData` is a genuinely corrupt-but-
/// survivable packet; everything else must drive the worker's reconnect
/// path (§4.3 step 4) rather than be swallowed as `CorruptPacket`.
fn classify_read_error(e: ffmpeg::Error) -> PipelineError {
    match e {
        ffmpeg::Error::Eof => PipelineError::EndOfStream,
        ffmpeg::Error::InvalidData => PipelineError::CorruptPacket,
        other => {
            log::debug!("packet read failed, treating as a transport/timeout error: {other}");
            PipelineError::Timeout
        }
    }
}

impl FrameSource for FfmpegSource {
    fn open(&mut self, url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<(), PipelineError> {
        // `stimeout`/`rw_timeout` bound the RTSP/TCP connect+read phases
        // natively inside ffmpeg's demuxer — no watchdog thread needed, and
        // no need to hand an ffmpeg context (not `Send`-friendly to pass
        // around mid-open) across threads to implement the timeout.
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("stimeout", &connect_timeout.as_micros().to_string());
        opts.set("rw_timeout", &read_timeout.as_micros().to_string());
        opts.set("rtsp_transport", "tcp");

        let ictx = ffmpeg::format::input_with_dictionary(url, opts).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("timed out") || msg.to_lowercase().contains("timeout") {
                PipelineError::Timeout
            } else {
                PipelineError::OpenFailed(msg)
            }
        })?;

        let video_stream_index = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| PipelineError::OpenFailed("no video stream".into()))?
            .index();

        let stream = ictx.stream(video_stream_index).unwrap();
        let codec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PipelineError::OpenFailed(e.to_string()))?;
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| PipelineError::OpenFailed(e.to_string()))?;

        self.ictx = Some(ictx);
        self.decoder = Some(decoder);
        self.video_stream_index = video_stream_index;
        self.scaler = None;
        Ok(())
    }

    fn read_frame(&mut self, target_w: i32, target_h: i32) -> Result<Option<DecodedFrame>, PipelineError> {
        // Hand out a frame the decoder already emitted for an earlier packet
        // before reading anything new off the wire.
        if let Some(decoded) = self.pending.pop_front() {
            return self.to_decoded_frame(&decoded, target_w, target_h).map(Some);
        }

        let ictx = self.ictx.as_mut().expect("open() called before read_frame()");

        let (stream, packet) = match ictx.packets().next() {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => return Err(classify_read_error(e)),
            None => return Err(PipelineError::EndOfStream),
        };
        let stream_index = stream.index();

        if stream_index != self.video_stream_index {
            return Ok(None);
        }

        let decoder = self.decoder.as_mut().unwrap();
        if let Err(e) = decoder.send_packet(&packet) {
            log::debug!("decoder rejected packet: {e}");
            return Err(PipelineError::CorruptPacket);
        }

        // Drain every frame the decoder is ready to emit for this packet
        // right away and queue all of them — never leave output sitting in
        // the decoder across calls, or a later `send_packet` can fail with
        // the decoder's own buffer-full error, indistinguishable from a
        // corrupt packet (the bug this replaces).
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            self.pending.push_back(decoded.clone());
            decoded = ffmpeg::util::frame::video::Video::empty();
        }

        match self.pending.pop_front() {
            Some(first) => self.to_decoded_frame(&first, target_w, target_h).map(Some),
            // Decoder needs more packets before it can emit a frame — not an
            // error, just "nothing this iteration" (e.g. B-frame reordering).
            None => Ok(None),
        }
    }

    fn dimensions(&self) -> Option<(i32, i32)> {
        self.decoder.as_ref().map(|d| (d.width() as i32, d.height() as i32))
    }

    fn close(&mut self) {
        self.ictx = None;
        self.decoder = None;
        self.scaler = None;
        self.pending.clear();
    }
}
