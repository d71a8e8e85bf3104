//! ESP32-CAM HTTP stream connection.
//!
//! The camera serves `multipart/x-mixed-replace` MJPEG over plain HTTP. This
//! module only opens the connection and hands back a `ChunkSource`; frame
//! boundaries are found by the demultiplexer, not by parsing multipart
//! headers.
//!
//! There is no reconnect: when the stream ends or errors, the control loop
//! shuts down.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::source::ReaderSource;
use crate::config::StreamSettings;

pub type HttpChunkSource = ReaderSource<Box<dyn Read + Send>>;

/// Validate a camera stream URL. Only http(s) is accepted.
pub fn parse_stream_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("parse stream url '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http(s)",
                other
            ))
        }
    }
    if url.host_str().is_none() {
        return Err(anyhow!("stream url '{}' has no host", raw));
    }
    Ok(url)
}

/// Open the camera stream.
pub fn connect(settings: &StreamSettings) -> Result<HttpChunkSource> {
    let url = parse_stream_url(&settings.url)?;
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(settings.connect_timeout_secs))
        .timeout_read(Duration::from_secs(settings.read_timeout_secs))
        .build();
    let response = agent
        .get(url.as_str())
        .call()
        .with_context(|| format!("connect to camera stream {}", url))?;

    let content_type = response.header("Content-Type").unwrap_or("").to_string();
    if content_type.to_lowercase().contains("multipart") {
        log::info!("connected to mjpeg stream {} ({})", url, content_type);
    } else {
        log::warn!(
            "stream {} is not multipart (content-type '{}'); expecting a single image",
            url,
            content_type
        );
    }

    let reader: Box<dyn Read + Send> = Box::new(response.into_reader());
    Ok(ReaderSource::new(reader, settings.chunk_size, url.to_string()))
}
