use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::SendFailurePolicy;
use crate::ingest::demux::{StartMarkerPolicy, DEFAULT_MAX_BUFFER_BYTES};
use crate::ingest::esp32::parse_stream_url;

const DEFAULT_STREAM_URL: &str = "http://192.168.233.74/stream";
const DEFAULT_CHUNK_SIZE: usize = 1024;
const MIN_BUFFER_BYTES: usize = 64 * 1024;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyACM0";
const DEFAULT_SERIAL_BAUD: u32 = 115_200;
const DEFAULT_COOLDOWN_MS: u64 = 8_000;
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_STORE_PATH: &str = "face_encodings.json";
const DEFAULT_TOLERANCE: f32 = 0.6;
const DEFAULT_MODEL_SIDE: u32 = 112;
const DEFAULT_RENDER_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    stream: Option<StreamConfigFile>,
    serial: Option<SerialConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    recognition: Option<RecognitionConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    chunk_size: Option<usize>,
    max_buffer_bytes: Option<usize>,
    max_fps: Option<u32>,
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    start_marker_policy: Option<StartMarkerPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    device: Option<PathBuf>,
    baud: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatchConfigFile {
    cooldown_ms: Option<u64>,
    on_send_failure: Option<SendFailurePolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognitionConfigFile {
    backend: Option<String>,
    store_path: Option<PathBuf>,
    tolerance: Option<f32>,
    model_path: Option<PathBuf>,
    model_width: Option<u32>,
    model_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    snapshot_path: Option<PathBuf>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub stream: StreamSettings,
    pub serial: SerialSettings,
    pub dispatch: DispatchSettings,
    pub recognition: RecognitionSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub chunk_size: usize,
    pub max_buffer_bytes: usize,
    /// 0 processes every frame.
    pub max_fps: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub start_marker_policy: StartMarkerPolicy,
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub device: PathBuf,
    pub baud: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub cooldown: Duration,
    pub on_send_failure: SendFailurePolicy,
}

#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub backend: String,
    pub store_path: PathBuf,
    pub tolerance: f32,
    pub model_path: Option<PathBuf>,
    pub model_width: u32,
    pub model_height: u32,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub snapshot_path: Option<PathBuf>,
    pub interval: Duration,
}

impl GateConfig {
    /// Load from the file named by `FACEGATE_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACEGATE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (JSON, or TOML by extension), then apply
    /// environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => GateConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GateConfigFile) -> Self {
        let stream = file.stream.unwrap_or_default();
        let serial = file.serial.unwrap_or_default();
        let dispatch = file.dispatch.unwrap_or_default();
        let recognition = file.recognition.unwrap_or_default();
        let render = file.render.unwrap_or_default();

        Self {
            stream: StreamSettings {
                url: stream
                    .url
                    .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
                chunk_size: stream.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
                max_buffer_bytes: stream
                    .max_buffer_bytes
                    .unwrap_or(DEFAULT_MAX_BUFFER_BYTES),
                max_fps: stream.max_fps.unwrap_or(0),
                connect_timeout_secs: stream
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                read_timeout_secs: stream
                    .read_timeout_secs
                    .unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
                start_marker_policy: stream.start_marker_policy.unwrap_or_default(),
            },
            serial: SerialSettings {
                device: serial
                    .device
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SERIAL_DEVICE)),
                baud: serial.baud.unwrap_or(DEFAULT_SERIAL_BAUD),
            },
            dispatch: DispatchSettings {
                cooldown: Duration::from_millis(
                    dispatch.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS),
                ),
                on_send_failure: dispatch.on_send_failure.unwrap_or_default(),
            },
            recognition: RecognitionSettings {
                backend: recognition
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                store_path: recognition
                    .store_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
                tolerance: recognition.tolerance.unwrap_or(DEFAULT_TOLERANCE),
                model_path: recognition.model_path,
                model_width: recognition.model_width.unwrap_or(DEFAULT_MODEL_SIDE),
                model_height: recognition.model_height.unwrap_or(DEFAULT_MODEL_SIDE),
            },
            render: RenderSettings {
                snapshot_path: render.snapshot_path,
                interval: Duration::from_millis(
                    render.interval_ms.unwrap_or(DEFAULT_RENDER_INTERVAL_MS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("FACEGATE_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(device) = std::env::var("FACEGATE_SERIAL_DEVICE") {
            if !device.trim().is_empty() {
                self.serial.device = PathBuf::from(device);
            }
        }
        if let Ok(baud) = std::env::var("FACEGATE_SERIAL_BAUD") {
            self.serial.baud = baud
                .parse()
                .map_err(|_| anyhow!("FACEGATE_SERIAL_BAUD must be an integer"))?;
        }
        if let Ok(cooldown) = std::env::var("FACEGATE_COOLDOWN_MS") {
            let millis: u64 = cooldown.parse().map_err(|_| {
                anyhow!("FACEGATE_COOLDOWN_MS must be an integer number of milliseconds")
            })?;
            self.dispatch.cooldown = Duration::from_millis(millis);
        }
        if let Ok(path) = std::env::var("FACEGATE_STORE_PATH") {
            if !path.trim().is_empty() {
                self.recognition.store_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("FACEGATE_BACKEND") {
            if !backend.trim().is_empty() {
                self.recognition.backend = backend.trim().to_lowercase();
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        parse_stream_url(&self.stream.url)?;
        if self.stream.chunk_size == 0 {
            return Err(anyhow!("stream.chunk_size must be greater than zero"));
        }
        if self.stream.max_buffer_bytes < MIN_BUFFER_BYTES {
            return Err(anyhow!(
                "stream.max_buffer_bytes must be at least {}",
                MIN_BUFFER_BYTES
            ));
        }
        if self.serial.baud == 0 {
            return Err(anyhow!("serial.baud must be greater than zero"));
        }
        if self.dispatch.cooldown.is_zero() {
            return Err(anyhow!("dispatch cooldown must be greater than zero"));
        }
        if !self.recognition.tolerance.is_finite() || self.recognition.tolerance <= 0.0 {
            return Err(anyhow!("recognition.tolerance must be a positive number"));
        }
        self.recognition.backend = self.recognition.backend.trim().to_lowercase();
        if self.recognition.backend == "tract" && self.recognition.model_path.is_none() {
            return Err(anyhow!("recognition.model_path is required for the tract backend"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
