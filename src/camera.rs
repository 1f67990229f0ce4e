//! Acquisition engine for the Abisense development camera.
//!
//! The camera is a serial-attached device: every acquisition is a textual
//! command exchange (`sht`, `rid`, ...) followed by a fixed-size binary
//! acknowledgment and, for readout, a bulk pixel payload. This module owns
//! the acquisition state (binning, bit depth, exposure, background
//! subtraction, cooling) and the two pixel buffers, and runs the full
//! snapshot cycle against the transport.
//!
//! # Locking
//!
//! A single mutex guards the transport together with both pixel buffers.
//! Every operation that touches the wire or writes pixels holds it for the
//! whole command/response exchange, so a temperature poll from the caller's
//! thread can never interleave with a readout running on the sequence
//! worker. Geometry changes (binning, bit depth, ROI) are rejected with
//! [`CameraError::Busy`] while a sequence is running instead of blocking.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::debug;

use crate::buffer::ImageBuffer;
use crate::errors::{CameraError, Result};
use crate::protocol::{
    decode_temperature, BitDepth, Binning, Command, COOLING_ACK_LEN, HELP_TERMINATOR,
    SHOT_ACK_LEN, TEMPERATURE_RESPONSE_LEN,
};
use crate::reader;
use crate::sequence::{FrameMetadata, FrameSink, SequenceController};
use crate::transport::CameraTransport;

// ============================================================================
// Constants
// ============================================================================

/// Device identifier used in frame metadata.
pub const DEVICE_NAME: &str = "AbiCam";

/// Native sensor dimensions before binning.
pub const SENSOR_WIDTH: u32 = 512;
pub const SENSOR_HEIGHT: u32 = 512;

/// Hardware settling time after a trigger, on top of the exposure itself.
const SHOT_SETTLE: Duration = Duration::from_millis(700);

/// Settling time after the cooling and temperature commands.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);

/// Read attempts for the short fixed-size acknowledgments.
const ACK_MAX_ITERATIONS: usize = 50;

/// Pause between ack read attempts that returned nothing.
const ACK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Minimum interval between real temperature polls; queries inside the
/// window are served from the cache.
const TEMP_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Data Types
// ============================================================================

/// Region of interest: recorded origin plus the current buffer geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// Engine State
// ============================================================================

/// Everything the single engine mutex guards: the transport, both pixel
/// buffers, the acquisition configuration and the temperature cache.
pub(crate) struct CameraInner<T> {
    transport: T,
    binning: Binning,
    bit_depth: BitDepth,
    exposure_ms: f64,
    subtract_background: bool,
    cooling: bool,
    live: ImageBuffer,
    background: ImageBuffer,
    roi_origin: (u32, u32),
    temperature_c: f64,
    last_temp_read: Option<Instant>,
    temp_poll_interval: Duration,
}

impl<T: CameraTransport> CameraInner<T> {
    fn new(transport: T) -> Self {
        let binning = Binning::default();
        let bit_depth = BitDepth::default();
        let width = SENSOR_WIDTH / binning.factor();
        let height = SENSOR_HEIGHT / binning.factor();
        let bpp = bit_depth.bytes_per_pixel();
        CameraInner {
            transport,
            binning,
            bit_depth,
            exposure_ms: 1000.0,
            subtract_background: true,
            cooling: false,
            live: ImageBuffer::new(width, height, bpp),
            background: ImageBuffer::new(width, height, bpp),
            roi_origin: (0, 0),
            temperature_c: 0.0,
            last_temp_read: None,
            temp_poll_interval: TEMP_POLL_INTERVAL,
        }
    }

    /// Sync both buffers to the sensor-native geometry at the current
    /// binning and bit depth. The recorded ROI origin is left alone.
    fn resize_native(&mut self) {
        let width = SENSOR_WIDTH / self.binning.factor();
        let height = SENSOR_HEIGHT / self.binning.factor();
        let bpp = self.bit_depth.bytes_per_pixel();
        self.live.resize(width, height, bpp);
        self.background.resize(width, height, bpp);
    }

    /// Run one full snapshot cycle: optional dark capture, foreground
    /// capture, background subtraction. Any failure aborts the cycle and
    /// leaves the live buffer untouched.
    pub(crate) fn snap(&mut self) -> Result<()> {
        self.transport.purge()?;

        if self.subtract_background {
            // Zero-exposure shot for the dark frame.
            let dark = self.capture(0)?;
            self.background.set_pixels(&dark)?;
        }

        let exposure_ms = self.exposure_ms as u64;
        let frame = self.capture(exposure_ms)?;
        self.live.set_pixels(&frame)?;

        if self.subtract_background {
            self.live.subtract(&self.background)?;
        }

        Ok(())
    }

    /// One trigger/ack/readout exchange. Returns exactly one buffer's worth
    /// of pixel bytes.
    fn capture(&mut self, exposure_ms: u64) -> Result<Vec<u8>> {
        let shot = Command::Shot { exposure_ms };
        self.transport.send(&shot.encode(), shot.terminator())?;

        // Wait for the exposure plus hardware delays.
        self.transport
            .sleep(Duration::from_millis(exposure_ms) + SHOT_SETTLE);

        self.read_shot_ack()?;

        let readout = Command::ReadImage {
            binning: self.binning,
            bit_depth: self.bit_depth,
        };
        self.transport.send(&readout.encode(), readout.terminator())?;

        reader::read_payload(&mut self.transport, self.live.byte_count())
    }

    /// The trigger confirmation is exactly [`SHOT_ACK_LEN`] bytes; anything
    /// else is a protocol error and aborts the cycle.
    fn read_shot_ack(&mut self) -> Result<()> {
        let mut ack = [0u8; SHOT_ACK_LEN];
        let mut total = 0usize;
        for _ in 0..ACK_MAX_ITERATIONS {
            let read = self.transport.read_bytes(&mut ack[total..])?;
            total += read;
            if total == SHOT_ACK_LEN {
                debug!("Shot confirmed: {ack:02X?}");
                return Ok(());
            }
            if read == 0 {
                self.transport.sleep(ACK_RETRY_DELAY);
            }
        }
        Err(CameraError::Protocol(format!(
            "couldn't read shot confirmation, read {total} bytes"
        )))
    }

    /// Serve the sensor temperature, hitting the wire at most once per poll
    /// interval.
    pub(crate) fn temperature(&mut self) -> Result<f64> {
        if let Some(last) = self.last_temp_read {
            if last.elapsed() < self.temp_poll_interval {
                return Ok(self.temperature_c);
            }
        }
        self.last_temp_read = Some(Instant::now());

        self.transport.purge()?;
        let query = Command::Temperature;
        self.transport.send(&query.encode(), query.terminator())?;
        self.transport.sleep(COMMAND_SETTLE);

        let mut response = [0u8; TEMPERATURE_RESPONSE_LEN];
        let read = self.transport.read_bytes(&mut response)?;
        if read != TEMPERATURE_RESPONSE_LEN {
            return Err(CameraError::Protocol(format!(
                "couldn't read temperature response, read {read} bytes"
            )));
        }

        self.temperature_c = decode_temperature(&response);
        debug!("Got temperature response: {:.2} C", self.temperature_c);
        Ok(self.temperature_c)
    }

    fn set_cooling(&mut self, enabled: bool) -> Result<()> {
        self.transport.purge()?;
        let cmd = Command::Cooling { enabled };
        self.transport.send(&cmd.encode(), cmd.terminator())?;
        self.transport.sleep(COMMAND_SETTLE);

        let mut ack = [0u8; COOLING_ACK_LEN];
        let read = self.transport.read_bytes(&mut ack)?;
        if read != COOLING_ACK_LEN {
            return Err(CameraError::Protocol(format!(
                "couldn't read cooling response, read {read} bytes"
            )));
        }
        debug!("Got cooling response: {}", ack[0]);
        self.cooling = enabled;
        Ok(())
    }

    /// Fetch the firmware help text (free-form, terminated by a triple
    /// blank line).
    fn help(&mut self) -> Result<String> {
        let cmd = Command::Help;
        self.transport.send(&cmd.encode(), cmd.terminator())?;

        let terminator = HELP_TERMINATOR.as_bytes();
        let mut text: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 256];
        for _ in 0..ACK_MAX_ITERATIONS {
            let read = self.transport.read_bytes(&mut chunk)?;
            text.extend_from_slice(&chunk[..read]);
            if let Some(end) = text
                .windows(terminator.len())
                .position(|w| w == terminator)
            {
                text.truncate(end);
                return Ok(String::from_utf8_lossy(&text).into_owned());
            }
            if read == 0 {
                self.transport.sleep(ACK_RETRY_DELAY);
            }
        }
        Err(CameraError::Protocol(format!(
            "help text not terminated after {} bytes",
            text.len()
        )))
    }

    pub(crate) fn live_pixels(&self) -> &[u8] {
        self.live.pixels()
    }

    pub(crate) fn live_geometry(&self) -> (u32, u32, usize) {
        (
            self.live.width(),
            self.live.height(),
            self.live.bytes_per_pixel(),
        )
    }

    pub(crate) fn frame_metadata(&self) -> FrameMetadata {
        let start_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as f64;
        FrameMetadata {
            camera: DEVICE_NAME.to_string(),
            start_time_ms,
            roi_x: self.roi_origin.0,
            roi_y: self.roi_origin.1,
            binning: self.binning.factor(),
        }
    }
}

// ============================================================================
// Camera Driver
// ============================================================================

/// Driver for the Abisense development camera.
///
/// Single snapshots, configuration changes and temperature queries run
/// synchronously on the caller's thread; [`Camera::start_sequence`] runs
/// the same snapshot cycle repeatedly on a dedicated worker, publishing
/// each frame to a [`FrameSink`].
///
/// # Example
/// ```ignore
/// let transport = SerialTransport::open("/dev/ttyUSB0")?;
/// let mut camera = Camera::new(transport);
/// camera.set_exposure_ms(250.0);
/// camera.snap()?;
/// println!("{}x{} frame", camera.width(), camera.height());
/// ```
pub struct Camera<T: CameraTransport> {
    inner: Arc<Mutex<CameraInner<T>>>,
    sequence: SequenceController,
}

impl<T: CameraTransport + 'static> Camera<T> {
    pub fn new(transport: T) -> Self {
        Camera {
            inner: Arc::new(Mutex::new(CameraInner::new(transport))),
            sequence: SequenceController::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------------

    /// Perform one full snapshot cycle. Blocks for the exposure plus
    /// settling delays; on success the frame is available via
    /// [`Camera::image`].
    pub fn snap(&mut self) -> Result<()> {
        self.inner.lock().unwrap().snap()
    }

    /// Copy of the most recently captured frame.
    pub fn image(&self) -> Vec<u8> {
        self.inner.lock().unwrap().live.pixels().to_vec()
    }

    pub fn width(&self) -> u32 {
        self.inner.lock().unwrap().live.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.lock().unwrap().live.height()
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.inner.lock().unwrap().live.bytes_per_pixel()
    }

    /// Size in bytes of one frame at the current geometry.
    pub fn image_byte_count(&self) -> usize {
        self.inner.lock().unwrap().live.byte_count()
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Change the binning factor and resize both buffers to the binned
    /// geometry. Rejected while a sequence is running: a racing resize
    /// would corrupt an in-flight readout's expected byte count.
    pub fn set_binning(&mut self, binning: Binning) -> Result<()> {
        if self.is_capturing() {
            return Err(CameraError::Busy);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.binning = binning;
        inner.resize_native();
        Ok(())
    }

    pub fn binning(&self) -> Binning {
        self.inner.lock().unwrap().binning
    }

    /// Change the pixel bit depth. Rejected while a sequence is running.
    pub fn set_bit_depth(&mut self, bit_depth: BitDepth) -> Result<()> {
        if self.is_capturing() {
            return Err(CameraError::Busy);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.bit_depth = bit_depth;
        inner.resize_native();
        Ok(())
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.inner.lock().unwrap().bit_depth
    }

    /// Exposure for the next shot, in milliseconds. Negative values clamp
    /// to zero; the wire format truncates to whole milliseconds.
    pub fn set_exposure_ms(&mut self, exposure_ms: f64) {
        self.inner.lock().unwrap().exposure_ms = exposure_ms.max(0.0);
    }

    pub fn exposure_ms(&self) -> f64 {
        self.inner.lock().unwrap().exposure_ms
    }

    /// When enabled, every snap first captures a zero-exposure dark frame
    /// and subtracts it from the image (wrapping byte subtraction).
    pub fn set_subtract_background(&mut self, subtract: bool) {
        self.inner.lock().unwrap().subtract_background = subtract;
    }

    pub fn subtract_background(&self) -> bool {
        self.inner.lock().unwrap().subtract_background
    }

    /// Apply a region of interest. A zero-size request is equivalent to
    /// [`Camera::clear_roi`]. The origin is recorded for frame metadata but
    /// the device transfers the full requested geometry. Rejected while a
    /// sequence is running.
    pub fn set_roi(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        if self.is_capturing() {
            return Err(CameraError::Busy);
        }
        let mut inner = self.inner.lock().unwrap();
        if width == 0 && height == 0 {
            inner.resize_native();
            inner.roi_origin = (0, 0);
        } else {
            let bpp = inner.bit_depth.bytes_per_pixel();
            inner.live.resize(width, height, bpp);
            inner.background.resize(width, height, bpp);
            inner.roi_origin = (x, y);
        }
        Ok(())
    }

    /// Reset to the full sensor-derived geometry.
    pub fn clear_roi(&mut self) -> Result<()> {
        self.set_roi(0, 0, 0, 0)
    }

    pub fn roi(&self) -> Roi {
        let inner = self.inner.lock().unwrap();
        Roi {
            x: inner.roi_origin.0,
            y: inner.roi_origin.1,
            width: inner.live.width(),
            height: inner.live.height(),
        }
    }

    // ------------------------------------------------------------------------
    // Cooling & Temperature
    // ------------------------------------------------------------------------

    /// Switch the sensor cooler on or off. The command is confirmed by a
    /// single acknowledgment byte.
    pub fn set_cooling(&mut self, enabled: bool) -> Result<()> {
        self.inner.lock().unwrap().set_cooling(enabled)
    }

    pub fn cooling(&self) -> bool {
        self.inner.lock().unwrap().cooling
    }

    /// Current sensor temperature in degrees Celsius. Polls the hardware at
    /// most once per poll interval and serves the cached value in between.
    pub fn temperature(&mut self) -> Result<f64> {
        self.inner.lock().unwrap().temperature()
    }

    /// Tighten or relax the minimum interval between real temperature
    /// polls.
    pub fn set_temperature_poll_interval(&mut self, interval: Duration) {
        self.inner.lock().unwrap().temp_poll_interval = interval;
    }

    /// Firmware help text.
    pub fn help(&mut self) -> Result<String> {
        self.inner.lock().unwrap().help()
    }

    // ------------------------------------------------------------------------
    // Sequence Acquisition
    // ------------------------------------------------------------------------

    /// Start a timed capture sequence on a dedicated worker thread.
    ///
    /// The worker snaps, publishes each completed frame to `sink`, and
    /// waits out the remainder of `interval` between iterations until
    /// `frame_count` frames have been delivered or [`Camera::stop_sequence`]
    /// is called. `u64::MAX` effectively runs until stopped. Returns
    /// [`CameraError::Busy`] if a sequence is already running.
    pub fn start_sequence<S: FrameSink + 'static>(
        &mut self,
        frame_count: u64,
        interval: Duration,
        sink: S,
    ) -> Result<()> {
        self.sequence
            .start(Arc::clone(&self.inner), frame_count, interval, sink)
    }

    /// Request a cooperative stop and block until the worker has exited.
    /// A snap already in flight is allowed to finish.
    pub fn stop_sequence(&mut self) {
        self.sequence.stop();
    }

    /// True while the sequence worker has not yet exited.
    pub fn is_capturing(&self) -> bool {
        self.sequence.is_running()
    }

    /// Frames delivered by the current (or last) sequence.
    pub fn frames_delivered(&self) -> u64 {
        self.sequence.delivered()
    }
}
