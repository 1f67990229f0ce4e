//! Serial driver for the Abisense development camera.
//!
//! The camera speaks a short textual command protocol over a serial link
//! (`sht` to trigger an exposure, `rid` to transfer the frame, `chp`/`cld`
//! for temperature and cooling) and streams each frame back as a raw binary
//! payload. This crate turns high-level acquisition requests into that
//! exchange and assembles the payload into an addressable image buffer.
//!
//! # Acquisition model
//!
//! - [`Camera::snap`] runs one blocking snapshot cycle on the caller's
//!   thread: optional zero-exposure dark frame, the real exposure, chunked
//!   readout, background subtraction.
//! - [`Camera::start_sequence`] repeats that cycle on a dedicated worker at
//!   a target interval, publishing each frame to a [`FrameSink`] until the
//!   requested count is reached or [`Camera::stop_sequence`] drains it.
//! - Temperature reads are cached and hit the wire at most once per poll
//!   interval.
//!
//! One mutex guards the transport and both pixel buffers, so caller-side
//! operations and the sequence worker never interleave on the wire.

pub mod buffer;
pub mod camera;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod reader;
pub mod sequence;
pub mod transport;

pub use buffer::ImageBuffer;
pub use camera::{Camera, Roi, DEVICE_NAME, SENSOR_HEIGHT, SENSOR_WIDTH};
pub use errors::{CameraError, Result, TransportError};
pub use protocol::{Binning, BitDepth, Command};
pub use sequence::{FrameMetadata, FrameSink, SinkError};
pub use transport::{CameraTransport, SerialTransport};
