//! MJPEG stream demultiplexer.
//!
//! Cuts a continuously growing byte stream into JPEG frames using only the
//! start-of-image (`FF D8`) and end-of-image (`FF D9`) markers. There is no
//! other framing: multipart boundaries and headers are treated as garbage
//! between frames.
//!
//! The buffer is an arena with a scan cursor. Every byte is examined once
//! while looking for markers, consumed prefixes are dropped after each frame,
//! and the buffer is capped so a stream that never closes a frame cannot grow
//! memory without bound.

use serde::Deserialize;

use crate::frame::Frame;

pub const START_MARKER: [u8; 2] = [0xFF, 0xD8];
pub const END_MARKER: [u8; 2] = [0xFF, 0xD9];

/// Default cap on buffered bytes (two maximum-size JPEGs).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Which start marker an end marker is paired with when several start
/// markers arrive before any end marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMarkerPolicy {
    /// Pair with the most recent start marker; everything before it is stale.
    #[default]
    Latest,
    /// Pair with the first unconsumed start marker, even if it is stale.
    /// A stale start produces a corrupt frame which the decoder rejects.
    Earliest,
}

/// Counters for the demultiplexer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub frames_emitted: u64,
    /// Bytes dropped as preamble, multipart headers or stale partial frames.
    pub discarded_bytes: u64,
    /// Times the buffer cap forced a resynchronisation.
    pub resyncs: u64,
    pub buffered_bytes: usize,
}

pub struct StreamDemux {
    buffer: Vec<u8>,
    /// Absolute stream offset of `buffer[0]`.
    base_offset: u64,
    /// First index not yet examined for markers.
    scan_pos: usize,
    /// Start marker of the frame currently being assembled.
    start: Option<usize>,
    policy: StartMarkerPolicy,
    max_buffer_bytes: usize,
    stats: DemuxStats,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::with_limits(StartMarkerPolicy::default(), DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_limits(policy: StartMarkerPolicy, max_buffer_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            base_offset: 0,
            scan_pos: 0,
            start: None,
            policy,
            max_buffer_bytes: max_buffer_bytes.max(END_MARKER.len()),
            stats: DemuxStats::default(),
        }
    }

    /// Append newly received bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, if the buffer holds one.
    ///
    /// Returns `None` when more data is needed; call `feed` and retry.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let len = self.buffer.len();
        let mut i = self.scan_pos;
        while i + 1 < len {
            if self.buffer[i] != 0xFF {
                i += 1;
                continue;
            }
            match self.buffer[i + 1] {
                0xD8 => {
                    if self.start.is_none() || self.policy == StartMarkerPolicy::Latest {
                        self.start = Some(i);
                    }
                    i += 2;
                }
                0xD9 => {
                    if let Some(start) = self.start {
                        return Some(self.emit(start, i + 2));
                    }
                    // End marker with no open frame.
                    i += 2;
                }
                _ => i += 1,
            }
        }
        self.scan_pos = i;
        self.discard_garbage();
        self.enforce_cap();
        None
    }

    /// Absolute stream offset of the next byte to be fed.
    pub fn stream_position(&self) -> u64 {
        self.base_offset + self.buffer.len() as u64
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// True while a start marker has been seen but its end marker has not.
    pub fn has_partial_frame(&self) -> bool {
        self.start.is_some()
    }

    pub fn policy(&self) -> StartMarkerPolicy {
        self.policy
    }

    pub fn stats(&self) -> DemuxStats {
        DemuxStats {
            buffered_bytes: self.buffer.len(),
            ..self.stats.clone()
        }
    }

    fn emit(&mut self, start: usize, end: usize) -> Frame {
        let data = self.buffer[start..end].to_vec();
        self.stats.frames_emitted += 1;
        self.stats.discarded_bytes += start as u64;
        let frame = Frame::new(data, self.stats.frames_emitted, self.base_offset + start as u64);
        self.drop_prefix(end);
        self.start = None;
        frame
    }

    /// Drop bytes that can never become part of a frame: everything before
    /// the open start marker, or everything already scanned when no frame is
    /// open (a trailing `0xFF` stays unscanned and is kept).
    fn discard_garbage(&mut self) {
        let keep_from = self.start.unwrap_or(self.scan_pos);
        if keep_from > 0 {
            self.stats.discarded_bytes += keep_from as u64;
            self.drop_prefix(keep_from);
        }
    }

    fn enforce_cap(&mut self) {
        if self.buffer.len() <= self.max_buffer_bytes {
            return;
        }
        let keep = usize::from(self.buffer.last() == Some(&0xFF));
        let dropped = self.buffer.len() - keep;
        log::warn!(
            "mjpeg buffer exceeded {} bytes without an end marker; dropping {} bytes and resynchronising",
            self.max_buffer_bytes,
            dropped
        );
        self.stats.discarded_bytes += dropped as u64;
        self.stats.resyncs += 1;
        self.start = None;
        self.drop_prefix(dropped);
    }

    fn drop_prefix(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.base_offset += n as u64;
        self.scan_pos = self.scan_pos.saturating_sub(n);
        self.start = self.start.and_then(|s| s.checked_sub(n));
    }
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new()
    }
}
