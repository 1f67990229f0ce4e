//! Serial transport underneath the camera protocol.
//!
//! The camera engine only needs four primitives: purge stale bytes, send a
//! textual command, read whatever bytes are pending, and block for a fixed
//! delay. They are grouped into [`CameraTransport`] so the engine can be
//! driven against a scripted transport in tests, with [`SerialTransport`]
//! as the production backend.

use std::io::{Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{ClearBuffer, SerialPort};

use crate::errors::TransportError;

/// Default serial baud rate for the camera head.
const BAUD_RATE: u32 = 115_200;

/// Per-call read timeout. A timed-out read reports zero bytes; the callers
/// own the overall retry policy.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Byte-level primitives the acquisition engine is built on.
///
/// `read_bytes` fills as much of `buf` as is currently available and
/// returns the count; a link-level timeout is reported as `Ok(0)`, not an
/// error. `sleep` is an ordinary blocking wait on the calling context.
pub trait CameraTransport: Send {
    fn purge(&mut self) -> Result<(), TransportError>;
    fn send(&mut self, command: &str, terminator: &str) -> Result<(), TransportError>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    fn sleep(&mut self, duration: Duration);
}

/// Production transport over a serial port (e.g. `/dev/ttyUSB0`, `COM3`).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open the named serial port with the camera's line settings.
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let port = serialport::new(path, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;
        debug!("Opened serial port {path} at {BAUD_RATE} baud");
        Ok(Self { port })
    }
}

impl CameraTransport for SerialTransport {
    fn purge(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn send(&mut self, command: &str, terminator: &str) -> Result<(), TransportError> {
        self.port.write_all(command.as_bytes())?;
        if !terminator.is_empty() {
            self.port.write_all(terminator.as_bytes())?;
        }
        self.port.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
