//! Frame and decoded image types.
//!
//! - `Frame`: one compressed JPEG cut out of the camera stream. Not `Clone`;
//!   each frame is handed to the decoder exactly once and dropped afterwards.
//! - `DecodedImage`: RGB pixel buffer owned by a single loop iteration.
//!   Pixels are zeroized on drop to limit how long face imagery stays in memory.
//! - `FrameDecoder`: the decode boundary. Failures are typed and never panic.

use std::io::Cursor;
use std::ops::Range;

use image::{ImageFormat, ImageReader, Limits, RgbImage};
use thiserror::Error;
use zeroize::Zeroize;

use crate::ingest::demux::{END_MARKER, START_MARKER};

/// Largest width or height the decoder accepts. ESP32 sensors top out at UXGA.
pub const MAX_IMAGE_DIMENSION: u32 = 4096;

// ----------------------------------------------------------------------------
// Frame: compressed bytes bounded by SOI/EOI markers
// ----------------------------------------------------------------------------

/// A complete compressed image extracted from the stream.
///
/// Explicitly NOT `Clone`: a frame is produced once by the demultiplexer and
/// consumed once by the control loop.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    sequence: u64,
    stream_offset: u64,
}

impl Frame {
    /// Called only by the demultiplexer.
    pub(crate) fn new(data: Vec<u8>, sequence: u64, stream_offset: u64) -> Self {
        Self {
            data,
            sequence,
            stream_offset,
        }
    }

    /// Frame bytes, start marker through end marker inclusive.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes between the markers.
    pub fn payload(&self) -> &[u8] {
        let len = self.data.len();
        if len < START_MARKER.len() + END_MARKER.len() {
            return &[];
        }
        &self.data[START_MARKER.len()..len - END_MARKER.len()]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 1-based position of this frame in the stream.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Absolute stream offset of the first byte of this frame.
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// Absolute byte range this frame occupied in the stream.
    pub fn stream_range(&self) -> Range<u64> {
        self.stream_offset..self.stream_offset + self.data.len() as u64
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

// ----------------------------------------------------------------------------
// DecodedImage: transient pixel buffer
// ----------------------------------------------------------------------------

/// RGB8 pixel buffer decoded from a `Frame`.
pub struct DecodedImage {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Sequence number of the frame this image came from.
    pub sequence: u64,
}

impl DecodedImage {
    /// Wrap an RGB8 buffer. Returns `None` when the length does not match.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        if pixels.len() != expected {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy into an `image` buffer for resizing or drawing.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Drop for DecodedImage {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

// ----------------------------------------------------------------------------
// FrameDecoder: the decode boundary
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {0} bytes is not bounded by JPEG markers")]
    MissingMarkers(usize),
    #[error("jpeg decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has zero area")]
    Empty,
}

/// Turns compressed frame bytes into pixels.
pub trait FrameDecoder: Send {
    fn decode(&mut self, frame: &Frame) -> Result<DecodedImage, DecodeError>;
}

/// JPEG decoder backed by the `image` crate.
#[derive(Clone, Debug)]
pub struct JpegDecoder {
    max_dimension: u32,
}

impl JpegDecoder {
    pub fn new() -> Self {
        Self {
            max_dimension: MAX_IMAGE_DIMENSION,
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }
}

impl Default for JpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for JpegDecoder {
    fn decode(&mut self, frame: &Frame) -> Result<DecodedImage, DecodeError> {
        let bytes = frame.bytes();
        if !bytes.starts_with(&START_MARKER) || !bytes.ends_with(&END_MARKER) {
            return Err(DecodeError::MissingMarkers(bytes.len()));
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Jpeg);
        reader.limits(limits);
        let image = reader.decode()?;
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }
        DecodedImage::from_rgb(rgb.into_raw(), width, height, frame.sequence())
            .ok_or(DecodeError::Empty)
    }
}
