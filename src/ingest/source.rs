//! Byte chunk sources feeding the demultiplexer.

use anyhow::{Context, Result};
use std::io::{ErrorKind, Read};

/// Delivers the network stream as ordered byte chunks.
pub trait ChunkSource: Send {
    /// Block until the next chunk arrives.
    ///
    /// `Ok(None)` means the stream closed cleanly; `Err` means it failed.
    /// Both end the control loop.
    fn next_chunk(&mut self) -> Result<Option<&[u8]>>;

    /// Human-readable source label for logs.
    fn describe(&self) -> String;

    fn bytes_read(&self) -> u64;
}

/// Adapts any `Read` into a `ChunkSource` with a fixed read size.
pub struct ReaderSource<R> {
    reader: R,
    chunk: Vec<u8>,
    label: String,
    bytes_read: u64,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize, label: impl Into<String>) -> Self {
        Self {
            reader,
            chunk: vec![0u8; chunk_size.max(1)],
            label: label.into(),
            bytes_read: 0,
        }
    }
}

impl<R: Read + Send> ChunkSource for ReaderSource<R> {
    fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        loop {
            match self.reader.read(&mut self.chunk) {
                Ok(0) => return Ok(None),
                Ok(read) => {
                    self.bytes_read += read as u64;
                    return Ok(Some(&self.chunk[..read]));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("read from {}", self.label));
                }
            }
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn reads_in_fixed_chunks_until_eof() {
        let mut source = ReaderSource::new(Cursor::new(vec![1u8; 10]), 4, "mem");
        let mut sizes = Vec::new();
        while let Some(chunk) = source.next_chunk().unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(source.bytes_read(), 10);
    }

    #[test]
    fn surfaces_read_errors() {
        let mut source = ReaderSource::new(FailingReader, 4, "broken");
        let err = source.next_chunk().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
