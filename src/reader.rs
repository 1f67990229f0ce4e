//! Bulk pixel-payload readout.
//!
//! The camera streams the frame at a variable instantaneous rate, so a
//! single read call rarely returns the whole payload. The reader issues
//! bounded chunked reads until the expected byte count has accumulated;
//! the iteration cap plus the delay after every empty read give the
//! transfer an overall deadline without per-call timeout bookkeeping.

use std::time::Duration;

use log::debug;

use crate::errors::{CameraError, Result};
use crate::transport::CameraTransport;

/// Largest number of bytes requested from the transport per call.
pub const READ_CHUNK_SIZE: usize = 32_768;

/// Read attempts before the transfer is declared failed.
pub const MAX_READ_ITERATIONS: usize = 75;

/// Pause after a read that returned nothing, so a slow link is not
/// busy-polled.
pub const EMPTY_READ_DELAY: Duration = Duration::from_millis(100);

/// Receive exactly `expected` payload bytes from the transport.
///
/// Fails with [`CameraError::ImageRead`] if the payload is still short
/// after [`MAX_READ_ITERATIONS`] reads; any transport error aborts
/// immediately with no partial salvage. On success the returned vector is
/// exactly `expected` bytes (bytes past the expected count are dropped).
pub fn read_payload<T: CameraTransport + ?Sized>(
    transport: &mut T,
    expected: usize,
) -> Result<Vec<u8>> {
    // One chunk of headroom: the device may push a little past the frame.
    let mut data = vec![0u8; expected + READ_CHUNK_SIZE];
    let mut total = 0usize;
    let mut iterations = 0usize;

    loop {
        let want = READ_CHUNK_SIZE.min(data.len() - total);
        let read = transport.read_bytes(&mut data[total..total + want])?;
        debug!("Read {read} bytes this time");
        total += read;

        iterations += 1;
        if read == 0 {
            transport.sleep(EMPTY_READ_DELAY);
        }

        if total >= expected || iterations >= MAX_READ_ITERATIONS {
            break;
        }
    }

    if total < expected {
        debug!("Failed to read image data from port: read {total} bytes");
        return Err(CameraError::ImageRead {
            read: total,
            expected,
        });
    }

    data.truncate(expected);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;

    /// Transport that serves a fixed script of chunk sizes and counts the
    /// sleeps the reader issues.
    struct ChunkScript {
        chunks: Vec<usize>,
        next: usize,
        reads: usize,
        sleeps: usize,
        fill: u8,
    }

    impl ChunkScript {
        fn new(chunks: &[usize]) -> Self {
            ChunkScript {
                chunks: chunks.to_vec(),
                next: 0,
                reads: 0,
                sleeps: 0,
                fill: 0xAB,
            }
        }
    }

    impl CameraTransport for ChunkScript {
        fn purge(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn send(&mut self, _: &str, _: &str) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn read_bytes(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
            self.reads += 1;
            let n = self.chunks.get(self.next).copied().unwrap_or(0);
            self.next += 1;
            let n = n.min(buf.len());
            buf[..n].fill(self.fill);
            Ok(n)
        }

        fn sleep(&mut self, _: Duration) {
            self.sleeps += 1;
        }
    }

    #[test]
    fn assembles_payload_from_partial_chunks() {
        let mut transport = ChunkScript::new(&[10_000, 0, 22_768]);
        let payload = read_payload(&mut transport, 32_768).unwrap();
        assert_eq!(payload.len(), 32_768);
        assert!(payload.iter().all(|&b| b == 0xAB));
        // Only the zero-length chunk triggers the inter-chunk delay.
        assert_eq!(transport.sleeps, 1);
        assert_eq!(transport.reads, 3);
    }

    #[test]
    fn fails_after_bounded_iterations_when_link_is_silent() {
        let mut transport = ChunkScript::new(&[]);
        let err = read_payload(&mut transport, 1024).unwrap_err();
        assert!(matches!(
            err,
            CameraError::ImageRead {
                read: 0,
                expected: 1024
            }
        ));
        assert_eq!(transport.reads, MAX_READ_ITERATIONS);
        assert_eq!(transport.sleeps, MAX_READ_ITERATIONS);
    }

    #[test]
    fn trims_overshoot_to_expected_count() {
        let mut transport = ChunkScript::new(&[4096]);
        let payload = read_payload(&mut transport, 100).unwrap();
        assert_eq!(payload.len(), 100);
    }

    #[test]
    fn transport_error_aborts_immediately() {
        struct Broken;
        impl CameraTransport for Broken {
            fn purge(&mut self) -> std::result::Result<(), TransportError> {
                Ok(())
            }
            fn send(&mut self, _: &str, _: &str) -> std::result::Result<(), TransportError> {
                Ok(())
            }
            fn read_bytes(
                &mut self,
                _: &mut [u8],
            ) -> std::result::Result<usize, TransportError> {
                Err(TransportError::Io(std::io::Error::other("link down")))
            }
            fn sleep(&mut self, _: Duration) {}
        }

        let err = read_payload(&mut Broken, 64).unwrap_err();
        assert!(matches!(err, CameraError::Transport(_)));
    }
}
