//! Gate control loop.
//!
//! One iteration per network chunk:
//! 1. Block on the source for the next chunk (end or error terminates)
//! 2. Feed the demultiplexer and drain every complete frame
//! 3. Per frame: decode, recognize, dispatch, render
//! 4. Check the cancellation flag
//!
//! Per-frame failures are logged and never leave the iteration. On exit the
//! command sink is flushed and closed and the renderer released, exactly
//! once, whichever path ended the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GateConfig;
use crate::dispatch::{CommandClass, DispatchStats, Dispatcher, SendFailurePolicy};
use crate::faces::{FaceRecognizer, KnownFaceSet};
use crate::frame::{Frame, FrameDecoder};
use crate::ingest::{frame_interval, ChunkSource, StreamDemux, StartMarkerPolicy};
use crate::render::RenderSink;
use crate::transport::CommandSink;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Cooperative cancellation, checked once per loop iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why the loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    SourceClosed,
    SourceError(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub chunks: u64,
    pub bytes: u64,
    pub frames: u64,
    /// Frames dropped by rate decimation before decode.
    pub frames_skipped: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    pub recognition_failures: u64,
    pub faces: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub render_failures: u64,
}

/// Tunables for the loop.
#[derive(Clone, Debug)]
pub struct GateSettings {
    pub cooldown: Duration,
    pub on_send_failure: SendFailurePolicy,
    pub max_fps: u32,
    pub max_buffer_bytes: usize,
    pub start_marker_policy: StartMarkerPolicy,
}

impl GateSettings {
    pub fn from_config(cfg: &GateConfig) -> Self {
        Self {
            cooldown: cfg.dispatch.cooldown,
            on_send_failure: cfg.dispatch.on_send_failure,
            max_fps: cfg.stream.max_fps,
            max_buffer_bytes: cfg.stream.max_buffer_bytes,
            start_marker_policy: cfg.stream.start_marker_policy,
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            cooldown: crate::dispatch::DEFAULT_COOLDOWN,
            on_send_failure: SendFailurePolicy::default(),
            max_fps: 0,
            max_buffer_bytes: crate::ingest::demux::DEFAULT_MAX_BUFFER_BYTES,
            start_marker_policy: StartMarkerPolicy::default(),
        }
    }
}

/// The external collaborators the loop drives.
pub struct GateParts {
    pub source: Box<dyn ChunkSource>,
    pub decoder: Box<dyn FrameDecoder>,
    pub recognizer: Box<dyn FaceRecognizer>,
    pub known_faces: KnownFaceSet,
    pub sink: Box<dyn CommandSink>,
    pub renderer: Box<dyn RenderSink>,
}

pub struct GateLoop {
    source: Box<dyn ChunkSource>,
    demux: StreamDemux,
    decoder: Box<dyn FrameDecoder>,
    recognizer: Box<dyn FaceRecognizer>,
    known_faces: KnownFaceSet,
    dispatcher: Dispatcher,
    sink: Box<dyn CommandSink>,
    renderer: Box<dyn RenderSink>,
    cancel: CancelFlag,
    min_frame_interval: Duration,
    last_processed_at: Option<Instant>,
    last_health_log: Instant,
    stats: LoopStats,
    shut_down: bool,
}

impl GateLoop {
    pub fn new(parts: GateParts, settings: GateSettings, cancel: CancelFlag) -> Self {
        Self {
            source: parts.source,
            demux: StreamDemux::with_limits(
                settings.start_marker_policy,
                settings.max_buffer_bytes,
            ),
            decoder: parts.decoder,
            recognizer: parts.recognizer,
            known_faces: parts.known_faces,
            dispatcher: Dispatcher::new(settings.cooldown, settings.on_send_failure),
            sink: parts.sink,
            renderer: parts.renderer,
            cancel,
            min_frame_interval: frame_interval(settings.max_fps),
            last_processed_at: None,
            last_health_log: Instant::now(),
            stats: LoopStats::default(),
            shut_down: false,
        }
    }

    /// Run until the source ends or cancellation is observed, then shut down.
    pub fn run(&mut self) -> LoopExit {
        log::info!(
            "gate loop running: source={} sink={} recognizer={} identities={}",
            self.source.describe(),
            self.sink.describe(),
            self.recognizer.name(),
            self.known_faces.len()
        );
        if !self.recognizer.detects_faces() {
            log::warn!(
                "recognizer '{}' has no face detector: any frame with enough contrast counts as one face, so an empty scene sends '{}'",
                self.recognizer.name(),
                CommandClass::Failed.wire_token()
            );
        }
        let exit = if self.shut_down {
            LoopExit::Cancelled
        } else {
            loop {
                if let Some(exit) = self.step() {
                    break exit;
                }
            }
        };
        match &exit {
            LoopExit::Cancelled => log::info!("cancellation requested; stopping"),
            LoopExit::SourceClosed => log::warn!("stream closed by source; stopping"),
            LoopExit::SourceError(err) => log::error!("stream failed: {}", err),
        }
        self.shutdown();
        exit
    }

    /// One iteration. Returns the exit reason when the loop must stop.
    fn step(&mut self) -> Option<LoopExit> {
        let chunk = match self.source.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Some(LoopExit::SourceClosed),
            Err(err) => return Some(LoopExit::SourceError(format!("{:#}", err))),
        };
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len() as u64;
        self.demux.feed(chunk);

        while let Some(frame) = self.demux.next_frame() {
            self.process_frame(frame);
        }

        self.maybe_log_health();

        if self.cancel.is_cancelled() {
            return Some(LoopExit::Cancelled);
        }
        None
    }

    fn process_frame(&mut self, frame: Frame) {
        self.stats.frames += 1;
        let now = Instant::now();
        if let Some(last) = self.last_processed_at {
            if now.duration_since(last) < self.min_frame_interval {
                self.stats.frames_skipped += 1;
                return;
            }
        }
        self.last_processed_at = Some(now);

        let image = match self.decoder.decode(&frame) {
            Ok(image) => image,
            Err(err) => {
                self.stats.decode_failures += 1;
                log::warn!(
                    "frame {} ({} bytes) dropped: {}",
                    frame.sequence(),
                    frame.len(),
                    err
                );
                return;
            }
        };
        drop(frame);
        self.stats.decoded += 1;

        let faces = match self
            .recognizer
            .detect_and_identify(&image, &self.known_faces)
        {
            Ok(faces) => faces,
            Err(err) => {
                self.stats.recognition_failures += 1;
                log::warn!("recognition failed on frame {}: {:#}", image.sequence, err);
                Vec::new()
            }
        };
        self.stats.faces += faces.len() as u64;

        if let Some(class) = self.dispatcher.decide(&faces, Instant::now()) {
            self.transmit(class);
        }

        if let Err(err) = self.renderer.render(&image, &faces) {
            self.stats.render_failures += 1;
            log::warn!("render failed on frame {}: {:#}", image.sequence, err);
        }
    }

    fn transmit(&mut self, class: CommandClass) {
        match self.sink.send(class) {
            Ok(()) => {
                self.stats.commands_sent += 1;
                log::info!("sent command: {}", class);
            }
            Err(err) => {
                self.stats.commands_failed += 1;
                let rolled_back = self.dispatcher.report_send_failure(class);
                log::warn!(
                    "error sending command {}: {} (cooldown {})",
                    class,
                    err,
                    if rolled_back { "reset" } else { "kept" }
                );
            }
        }
    }

    fn maybe_log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let demux = self.demux.stats();
        let dispatch = self.dispatcher.stats();
        log::info!(
            "health: frames={} decoded={} decode_failures={} faces={} sent={} failed={} suppressed={} resyncs={} buffered={}B",
            self.stats.frames,
            self.stats.decoded,
            self.stats.decode_failures,
            self.stats.faces,
            self.stats.commands_sent,
            self.stats.commands_failed,
            dispatch.suppressed,
            demux.resyncs,
            demux.buffered_bytes
        );
        self.last_health_log = Instant::now();
    }

    /// Flush and close the sink, release the renderer. Safe to call more
    /// than once; only the first call does anything.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(err) = self.sink.flush() {
            log::warn!("flush of {} failed: {}", self.sink.describe(), err);
        }
        if let Err(err) = self.sink.close() {
            log::warn!("close of {} failed: {}", self.sink.describe(), err);
        }
        if let Err(err) = self.renderer.release() {
            log::warn!("renderer release failed: {:#}", err);
        }
        log::info!(
            "gate loop stopped after {} frames ({} commands sent)",
            self.stats.frames,
            self.stats.commands_sent
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn stats(&self) -> LoopStats {
        self.stats.clone()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }
}

impl Drop for GateLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
