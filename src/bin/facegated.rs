//! facegated - Face-recognition gate daemon.
//!
//! Connects to the camera's MJPEG stream, recognizes faces frame by frame,
//! and sends throttled `pass` / `failed` commands to the gate controller on
//! the serial line. Runs until the stream ends or Ctrl-C.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use facegate::faces::{builtin_registry, KnownFaceSet, RecognitionCapability};
use facegate::ingest::esp32;
use facegate::{
    CancelFlag, CommandSink, GateConfig, GateLoop, GateParts, GateSettings, JpegDecoder,
    LogRenderer, LogSink, LoopExit, RenderSink, SerialSink, SnapshotRenderer,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Drive a gate controller from face recognition on an MJPEG camera stream"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "FACEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log commands instead of opening the serial device.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = GateConfig::load_from(args.config.as_deref())?;

    let known_faces = KnownFaceSet::load(&cfg.recognition.store_path)?;
    log::info!(
        "loaded {} known identities from {}",
        known_faces.len(),
        cfg.recognition.store_path.display()
    );

    let mut registry = builtin_registry(&cfg.recognition)?;
    let mut recognizer = registry.take_for_capability(RecognitionCapability::Identify)?;
    recognizer
        .warm_up()
        .with_context(|| format!("warm up recognizer {}", recognizer.name()))?;

    let sink: Box<dyn CommandSink> = if args.dry_run {
        log::warn!("dry run: commands are logged, not sent");
        Box::new(LogSink::new())
    } else {
        Box::new(SerialSink::open(&cfg.serial.device, cfg.serial.baud)?)
    };

    let renderer: Box<dyn RenderSink> = match &cfg.render.snapshot_path {
        Some(path) => Box::new(SnapshotRenderer::new(path.clone(), cfg.render.interval)),
        None => Box::new(LogRenderer),
    };

    let source = esp32::connect(&cfg.stream)?;

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        handler_flag.cancel();
    })
    .expect("error setting Ctrl-C handler");

    let parts = GateParts {
        source: Box::new(source),
        decoder: Box::new(JpegDecoder::new()),
        recognizer,
        known_faces,
        sink,
        renderer,
    };
    let mut gate = GateLoop::new(parts, GateSettings::from_config(&cfg), cancel);
    let exit = gate.run();

    let stats = gate.stats();
    log::info!(
        "frames={} decoded={} decode_failures={} faces={} commands_sent={} commands_failed={}",
        stats.frames,
        stats.decoded,
        stats.decode_failures,
        stats.faces,
        stats.commands_sent,
        stats.commands_failed
    );

    match exit {
        LoopExit::SourceError(err) => Err(anyhow!("camera stream failed: {}", err)),
        LoopExit::Cancelled | LoopExit::SourceClosed => Ok(()),
    }
}
