//! Stream ingestion.
//!
//! - `source`: byte chunk sources (`ChunkSource`, `ReaderSource`)
//! - `esp32`: HTTP MJPEG connection to an ESP32-CAM
//! - `demux`: splits the byte stream into JPEG frames
//!
//! The ingestion layer MUST NOT:
//! - Store frames to disk
//! - Log frame content

pub mod demux;
pub mod esp32;
pub mod source;

use std::time::Duration;

pub use demux::{DemuxStats, StartMarkerPolicy, StreamDemux};
pub use source::{ChunkSource, ReaderSource};

/// Minimum spacing between processed frames for a target rate.
/// A rate of zero disables decimation.
pub fn frame_interval(max_fps: u32) -> Duration {
    if max_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / max_fps).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_for_rates() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(frame_interval(5000), Duration::from_millis(1));
    }
}
