use std::io::{Cursor, ErrorKind, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use facegate::faces::{
    CpuRecognizer, DetectedFace, FaceRecognizer, FaceRegion, LocatedFace, RecognitionCapability,
    StubRecognizer,
};
use facegate::{
    CancelFlag, CommandClass, DecodedImage, GateLoop, GateParts, GateSettings, JpegDecoder,
    KnownFace, KnownFaceSet, LogRenderer, LoopExit, MemorySink, ReaderSource, RenderSink,
    SendFailurePolicy,
};

fn gradient(inverted: bool) -> RgbImage {
    RgbImage::from_fn(32, 32, |x, _| {
        let v = (x * 8) as u8;
        let v = if inverted { 255 - v } else { v };
        Rgb([v, v, v])
    })
}

fn encode_jpeg(img: &RgbImage) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(img)
        .expect("encode jpeg");
    out
}

/// Wraps each JPEG in multipart headers the way the camera does.
fn mjpeg_stream(jpegs: &[Vec<u8>]) -> Vec<u8> {
    let mut stream = b"HTTP preamble that is not a frame\r\n".to_vec();
    for jpeg in jpegs {
        stream.extend_from_slice(b"--123456789000000000000987654321\r\n");
        stream.extend_from_slice(
            format!(
                "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            )
            .as_bytes(),
        );
        stream.extend_from_slice(jpeg);
        stream.extend_from_slice(b"\r\n");
    }
    stream
}

fn region() -> FaceRegion {
    FaceRegion::new(0, 0, 31, 31)
}

fn scripted_gate(
    stream: Vec<u8>,
    script: Vec<Vec<DetectedFace>>,
    sink: MemorySink,
    on_send_failure: SendFailurePolicy,
) -> GateLoop {
    let parts = GateParts {
        source: Box::new(ReaderSource::new(Cursor::new(stream), 256, "memory")),
        decoder: Box::new(JpegDecoder::new()),
        recognizer: Box::new(StubRecognizer::with_script(script)),
        known_faces: KnownFaceSet::empty(),
        sink: Box::new(sink),
        renderer: Box::new(LogRenderer),
    };
    let settings = GateSettings {
        cooldown: Duration::from_secs(3600),
        on_send_failure,
        ..GateSettings::default()
    };
    GateLoop::new(parts, settings, CancelFlag::new())
}

#[test]
fn enrolled_face_passes_and_stranger_fails() {
    let known = gradient(false);
    let reference = DecodedImage::from_rgb(
        image::load_from_memory(&encode_jpeg(&known))
            .expect("decode reference")
            .into_rgb8()
            .into_raw(),
        32,
        32,
        0,
    )
    .expect("reference image");
    let mut cpu = CpuRecognizer::default();
    let embedding = cpu
        .reference_embedding(&reference)
        .expect("embed")
        .expect("face in reference");
    let known_faces = KnownFaceSet::new(vec![KnownFace {
        name: "alice".to_string(),
        embedding,
    }])
    .expect("face set");

    let stream = mjpeg_stream(&[
        encode_jpeg(&known),
        encode_jpeg(&known),
        encode_jpeg(&gradient(true)),
        encode_jpeg(&RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]))),
    ]);
    let sink = MemorySink::new();
    let parts = GateParts {
        source: Box::new(ReaderSource::new(Cursor::new(stream), 333, "memory")),
        decoder: Box::new(JpegDecoder::new()),
        recognizer: Box::new(cpu),
        known_faces,
        sink: Box::new(sink.clone()),
        renderer: Box::new(LogRenderer),
    };
    let mut gate = GateLoop::new(parts, GateSettings::default(), CancelFlag::new());

    assert_eq!(gate.run(), LoopExit::SourceClosed);
    let stats = gate.stats();
    assert_eq!(stats.frames, 4);
    assert_eq!(stats.decoded, 4);
    assert_eq!(stats.faces, 3);
    assert_eq!(
        sink.snapshot().sent,
        vec![CommandClass::Pass, CommandClass::Failed]
    );
    assert_eq!(sink.snapshot().wire, b"pass\nfailed\n");
    assert_eq!(gate.dispatch_stats().suppressed, 1);
}

#[test]
fn failed_send_keeps_cooldown_by_default() {
    let jpeg = encode_jpeg(&gradient(false));
    let script = vec![vec![DetectedFace::matched(region(), "alice")]; 3];
    let sink = MemorySink::new();
    sink.fail_next(1);
    let mut gate = scripted_gate(
        mjpeg_stream(&[jpeg.clone(), jpeg.clone(), jpeg]),
        script,
        sink.clone(),
        SendFailurePolicy::AdvanceCooldown,
    );

    assert_eq!(gate.run(), LoopExit::SourceClosed);
    let log = sink.snapshot();
    assert_eq!(log.failures, 1);
    assert!(log.sent.is_empty());
    assert_eq!(gate.stats().commands_failed, 1);
}

#[test]
fn failed_send_is_retried_on_next_frame_when_configured() {
    let jpeg = encode_jpeg(&gradient(false));
    let script = vec![vec![DetectedFace::matched(region(), "alice")]; 3];
    let sink = MemorySink::new();
    sink.fail_next(1);
    let mut gate = scripted_gate(
        mjpeg_stream(&[jpeg.clone(), jpeg.clone(), jpeg]),
        script,
        sink.clone(),
        SendFailurePolicy::RetryImmediately,
    );

    assert_eq!(gate.run(), LoopExit::SourceClosed);
    let log = sink.snapshot();
    assert_eq!(log.failures, 1);
    assert_eq!(log.sent, vec![CommandClass::Pass]);
    assert_eq!(gate.stats().commands_sent, 1);
    assert_eq!(gate.dispatch_stats().rolled_back, 1);
}

struct ResetAfter {
    inner: Cursor<Vec<u8>>,
}

impl Read for ResetAfter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(std::io::Error::new(ErrorKind::ConnectionReset, "camera reset")),
            n => Ok(n),
        }
    }
}

#[test]
fn source_error_stops_loop_and_shuts_down_once() {
    let jpeg = encode_jpeg(&gradient(false));
    let sink = MemorySink::new();
    let parts = GateParts {
        source: Box::new(ReaderSource::new(
            ResetAfter {
                inner: Cursor::new(mjpeg_stream(&[jpeg])),
            },
            128,
            "flaky",
        )),
        decoder: Box::new(JpegDecoder::new()),
        recognizer: Box::new(StubRecognizer::with_script(vec![vec![
            DetectedFace::unmatched(region()),
        ]])),
        known_faces: KnownFaceSet::empty(),
        sink: Box::new(sink.clone()),
        renderer: Box::new(LogRenderer),
    };
    let mut gate = GateLoop::new(parts, GateSettings::default(), CancelFlag::new());

    let exit = gate.run();
    assert!(matches!(exit, LoopExit::SourceError(ref msg) if msg.contains("camera reset")));
    assert!(gate.is_shut_down());
    assert_eq!(sink.snapshot().sent, vec![CommandClass::Failed]);

    gate.shutdown();
    drop(gate);
    let log = sink.snapshot();
    assert_eq!(log.flush_count, 1);
    assert_eq!(log.close_count, 1);
}

#[test]
fn cancelled_from_another_thread() {
    let jpeg = encode_jpeg(&gradient(false));
    let stream = mjpeg_stream(&vec![jpeg; 50]);
    let cancel = CancelFlag::new();
    let sink = MemorySink::new();
    let parts = GateParts {
        source: Box::new(ReaderSource::new(Cursor::new(stream), 64, "memory")),
        decoder: Box::new(JpegDecoder::new()),
        recognizer: Box::new(StubRecognizer::new()),
        known_faces: KnownFaceSet::empty(),
        sink: Box::new(sink.clone()),
        renderer: Box::new(LogRenderer),
    };
    let mut gate = GateLoop::new(parts, GateSettings::default(), cancel.clone());

    let canceller = std::thread::spawn(move || cancel.cancel());
    canceller.join().expect("cancel thread");

    assert_eq!(gate.run(), LoopExit::Cancelled);
    assert_eq!(gate.stats().chunks, 1);
    assert_eq!(sink.snapshot().close_count, 1);
}

/// Fails recognition on the listed 1-based calls; otherwise reports one
/// matched face.
struct FlakyRecognizer {
    calls: usize,
    fail_on: Vec<usize>,
}

impl FaceRecognizer for FlakyRecognizer {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn supports(&self, capability: RecognitionCapability) -> bool {
        matches!(capability, RecognitionCapability::Identify)
    }

    fn locate_faces(&mut self, _image: &DecodedImage) -> Result<Vec<LocatedFace>> {
        Ok(Vec::new())
    }

    fn detect_and_identify(
        &mut self,
        _image: &DecodedImage,
        _known: &KnownFaceSet,
    ) -> Result<Vec<DetectedFace>> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(anyhow!("model crashed on call {}", self.calls));
        }
        Ok(vec![DetectedFace::matched(region(), "alice")])
    }
}

#[test]
fn recognition_failure_skips_dispatch_and_loop_continues() {
    let jpeg = encode_jpeg(&gradient(false));
    let sink = MemorySink::new();
    let parts = GateParts {
        source: Box::new(ReaderSource::new(
            Cursor::new(mjpeg_stream(&[jpeg.clone(), jpeg.clone(), jpeg])),
            200,
            "memory",
        )),
        decoder: Box::new(JpegDecoder::new()),
        recognizer: Box::new(FlakyRecognizer {
            calls: 0,
            fail_on: vec![1],
        }),
        known_faces: KnownFaceSet::empty(),
        sink: Box::new(sink.clone()),
        renderer: Box::new(LogRenderer),
    };
    let mut gate = GateLoop::new(parts, GateSettings::default(), CancelFlag::new());

    assert_eq!(gate.run(), LoopExit::SourceClosed);
    let stats = gate.stats();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.decoded, 3);
    assert_eq!(stats.recognition_failures, 1);
    assert_eq!(stats.faces, 2);
    // The failed frame made no decision; frame 2 sent, frame 3 cooled.
    assert_eq!(gate.dispatch_stats().decisions, 2);
    assert_eq!(sink.snapshot().sent, vec![CommandClass::Pass]);

    drop(gate);
    assert_eq!(sink.snapshot().close_count, 1);
}

/// Renderer that always fails and counts calls.
struct BrokenDisplay {
    renders: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl RenderSink for BrokenDisplay {
    fn render(&mut self, _image: &DecodedImage, _faces: &[DetectedFace]) -> Result<()> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("display disconnected"))
    }

    fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn render_failure_never_stops_the_loop() {
    let jpeg = encode_jpeg(&gradient(false));
    let renders = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    let sink = MemorySink::new();
    let script = vec![
        vec![DetectedFace::unmatched(region())],
        vec![DetectedFace::matched(region(), "alice")],
        vec![],
    ];
    let parts = GateParts {
        source: Box::new(ReaderSource::new(
            Cursor::new(mjpeg_stream(&[jpeg.clone(), jpeg.clone(), jpeg])),
            512,
            "memory",
        )),
        decoder: Box::new(JpegDecoder::new()),
        recognizer: Box::new(StubRecognizer::with_script(script)),
        known_faces: KnownFaceSet::empty(),
        sink: Box::new(sink.clone()),
        renderer: Box::new(BrokenDisplay {
            renders: renders.clone(),
            releases: releases.clone(),
        }),
    };
    let mut gate = GateLoop::new(parts, GateSettings::default(), CancelFlag::new());

    assert_eq!(gate.run(), LoopExit::SourceClosed);
    assert_eq!(gate.stats().frames, 3);
    assert_eq!(gate.stats().render_failures, 3);
    assert_eq!(renders.load(Ordering::SeqCst), 3);
    assert_eq!(
        sink.snapshot().sent,
        vec![CommandClass::Failed, CommandClass::Pass]
    );

    gate.shutdown();
    drop(gate);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    let log = sink.snapshot();
    assert_eq!(log.close_count, 1);
    assert_eq!(log.flush_count, 1);
}
