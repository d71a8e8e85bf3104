//! Face-recognition gate controller.
//!
//! Reads the MJPEG stream of a network camera, cuts it into JPEG frames,
//! runs face recognition on each frame, and drives a gate microcontroller
//! over a serial line with throttled `pass` / `failed` commands.
//!
//! # Pipeline
//!
//! network bytes → frames → pixels → verdicts → throttled commands → serial
//!
//! Everything runs on one thread, one frame at a time. The only state that
//! outlives a frame is the enrolled face set (read-only) and the dispatcher's
//! cooldown table.
//!
//! # Module Structure
//!
//! - `ingest`: stream sources and the MJPEG demultiplexer
//! - `frame`: frames, decoded images, the JPEG decoder
//! - `faces`: recognizer backends and the enrolled face set
//! - `dispatch`: verdict → command with per-command cooldown
//! - `transport`: serial and dry-run command sinks
//! - `render`: overlay output
//! - `gate`: the control loop
//! - `enroll`: building the face store from reference photos

pub mod config;
pub mod dispatch;
pub mod enroll;
pub mod faces;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod render;
pub mod transport;
pub mod ui;

pub use config::GateConfig;
pub use dispatch::{CommandClass, Dispatcher, SendFailurePolicy, ThrottlePhase, ThrottleState};
pub use faces::{
    DetectedFace, FaceRecognizer, FaceRegion, KnownFace, KnownFaceSet, RecognitionCapability,
    RecognizerRegistry, Verdict,
};
pub use frame::{DecodeError, DecodedImage, Frame, FrameDecoder, JpegDecoder};
pub use gate::{CancelFlag, GateLoop, GateParts, GateSettings, LoopExit, LoopStats};
pub use ingest::{ChunkSource, ReaderSource, StartMarkerPolicy, StreamDemux};
pub use render::{LogRenderer, RenderSink, SnapshotRenderer};
pub use transport::{CommandSink, LogSink, MemorySink, SerialSink, TransportError};
