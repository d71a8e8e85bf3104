//! Serial line sink for the gate microcontroller.
//!
//! The device node is opened write-only and non-blocking: a busy UART yields
//! `TransportError::Busy` instead of stalling the control loop. A token cut
//! short by a full output queue is completed before the next one starts. On
//! Linux the line is switched to raw mode at the configured baud rate.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CommandSink, TransportError};
use crate::dispatch::CommandClass;

pub struct SerialSink {
    path: PathBuf,
    line: Option<TokenWriter<File>>,
}

impl SerialSink {
    /// Open the device. Failure here is fatal to startup.
    pub fn open(path: &Path, baud: u32) -> Result<Self> {
        let file = open_device(path)
            .with_context(|| format!("failed to open serial device {}", path.display()))?;
        #[cfg(target_os = "linux")]
        termios::configure(&file, baud)
            .with_context(|| format!("failed to configure {} at {} baud", path.display(), baud))?;
        #[cfg(not(target_os = "linux"))]
        log::warn!(
            "serial line settings are not applied on this platform; set {} baud externally",
            baud
        );
        log::info!("serial sink open on {} ({} baud)", path.display(), baud);
        Ok(Self {
            path: path.to_path_buf(),
            line: Some(TokenWriter::new(file)),
        })
    }
}

#[cfg(unix)]
fn open_device(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut options = OpenOptions::new();
    options.write(true);
    #[cfg(target_os = "linux")]
    options.custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK);
    options.open(path)
}

#[cfg(not(unix))]
fn open_device(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Writes whole command tokens to a non-blocking line.
///
/// A token is either not started or finished: when the line fills up part
/// way through a token, the unwritten tail is kept and written before
/// anything else, so two tokens never interleave on the wire.
struct TokenWriter<W> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> TokenWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    fn get_ref(&self) -> &W {
        &self.inner
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write a token. `Busy` means nothing of this token reached the line.
    fn write_token(&mut self, token: &[u8]) -> Result<(), TransportError> {
        if !self.drain_pending()? {
            return Err(TransportError::Busy);
        }
        let written = write_some(&mut self.inner, token)?;
        if written == 0 && !token.is_empty() {
            return Err(TransportError::Busy);
        }
        if written < token.len() {
            log::debug!(
                "serial line full after {} of {} bytes; tail deferred",
                written,
                token.len()
            );
            self.pending.extend_from_slice(&token[written..]);
        }
        Ok(())
    }

    /// Try to finish the deferred tail. Returns whether it is all written.
    fn drain_pending(&mut self) -> Result<bool, TransportError> {
        if self.pending.is_empty() {
            return Ok(true);
        }
        let written = write_some(&mut self.inner, &self.pending)?;
        self.pending.drain(..written);
        Ok(self.pending.is_empty())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Write as much of `bytes` as the line accepts without blocking.
fn write_some<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<usize, TransportError> {
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => written += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(written)
}

const FLUSH_ATTEMPTS: u32 = 50;
const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(20);

impl CommandSink for SerialSink {
    fn send(&mut self, class: CommandClass) -> Result<(), TransportError> {
        let line = self.line.as_mut().ok_or(TransportError::Closed)?;
        line.write_token(&class.wire_bytes())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let Some(line) = self.line.as_mut() else {
            return Ok(());
        };
        let mut attempts = 0;
        while !line.drain_pending()? {
            attempts += 1;
            if attempts >= FLUSH_ATTEMPTS {
                return Err(TransportError::Busy);
            }
            #[cfg(target_os = "linux")]
            termios::drain(line.get_ref())?;
            std::thread::sleep(FLUSH_RETRY_DELAY);
        }
        line.flush()?;
        #[cfg(target_os = "linux")]
        termios::drain(line.get_ref())?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.line.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        if let Some(line) = &self.line {
            if line.has_pending() {
                log::warn!(
                    "serial sink {} closed with an unfinished command",
                    self.path.display()
                );
            }
        }
        self.line = None;
        log::info!("serial sink {} closed", self.path.display());
        flushed
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.path.display())
    }
}

#[cfg(target_os = "linux")]
mod termios {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    fn baud_constant(baud: u32) -> Option<libc::speed_t> {
        match baud {
            9600 => Some(libc::B9600),
            19200 => Some(libc::B19200),
            38400 => Some(libc::B38400),
            57600 => Some(libc::B57600),
            115200 => Some(libc::B115200),
            230400 => Some(libc::B230400),
            460800 => Some(libc::B460800),
            921600 => Some(libc::B921600),
            _ => None,
        }
    }

    /// Raw mode at `baud`. Plain files (used in tests) are left alone.
    pub(super) fn configure(file: &File, baud: u32) -> io::Result<()> {
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`.
        if unsafe { libc::isatty(fd) } != 1 {
            return Ok(());
        }
        let speed = baud_constant(baud).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("unsupported baud rate {}", baud))
        })?;
        // SAFETY: termios is plain data; tcgetattr fully initialises it.
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        unsafe {
            if libc::tcgetattr(fd, &mut tio) != 0 {
                return Err(io::Error::last_os_error());
            }
            libc::cfmakeraw(&mut tio);
            if libc::cfsetspeed(&mut tio, speed) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Block until queued output has been transmitted.
    pub(super) fn drain(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`.
        if unsafe { libc::isatty(fd) } != 1 {
            return Ok(());
        }
        if unsafe { libc::tcdrain(fd) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
