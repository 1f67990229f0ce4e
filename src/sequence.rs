//! Timed sequence acquisition.
//!
//! A sequence runs the snapshot cycle repeatedly on a dedicated worker
//! thread and hands every completed frame to a downstream [`FrameSink`].
//! The worker observes a shared stop flag at the top of each iteration
//! (cooperative cancellation: a snap already in flight finishes first) and
//! [`SequenceController::stop`] joins the thread before returning.
//!
//! A failed snap mid-sequence skips that frame and keeps the loop running;
//! only a stop request or reaching the target frame count ends a sequence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::camera::CameraInner;
use crate::errors::{CameraError, Result};
use crate::transport::CameraTransport;

/// Per-frame metadata delivered alongside the pixel data.
#[derive(Debug, Clone, Serialize)]
pub struct FrameMetadata {
    /// Device identifier.
    pub camera: String,
    /// Capture timestamp, milliseconds since the Unix epoch.
    pub start_time_ms: f64,
    /// Recorded ROI origin.
    pub roi_x: u32,
    pub roi_y: u32,
    /// Binning factor the frame was captured at.
    pub binning: u32,
}

/// Result of a publish attempt the sequence loop has to react to.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The downstream buffer is full; the loop clears the backlog and
    /// resubmits the frame once with duplicate checking suppressed.
    #[error("downstream frame buffer overflowed")]
    Overflow,
    #[error("sink rejected frame: {0}")]
    Rejected(String),
}

/// Downstream consumer of completed frames (e.g. a circular buffer).
pub trait FrameSink: Send {
    #[allow(clippy::too_many_arguments)]
    fn publish(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
        frame_index: u64,
        metadata: &FrameMetadata,
        suppress_duplicate_check: bool,
    ) -> std::result::Result<(), SinkError>;

    /// Drop whatever the sink has backed up, making room for a resubmit.
    fn clear_backlog(&mut self);
}

/// Owns the sequence worker: stop flag, delivered-frame counter and the
/// join handle. Idle when no worker thread is alive.
pub(crate) struct SequenceController {
    stop: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SequenceController {
    pub(crate) fn new() -> Self {
        SequenceController {
            stop: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// True while the worker thread has not yet exited.
    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub(crate) fn start<T, S>(
        &mut self,
        inner: Arc<Mutex<CameraInner<T>>>,
        frame_count: u64,
        interval: Duration,
        sink: S,
    ) -> Result<()>
    where
        T: CameraTransport + 'static,
        S: FrameSink + 'static,
    {
        if self.is_running() {
            return Err(CameraError::Busy);
        }
        // Reap a worker that finished on its own.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        self.stop.store(false, Ordering::SeqCst);
        self.delivered.store(0, Ordering::SeqCst);

        let stop = Arc::clone(&self.stop);
        let delivered = Arc::clone(&self.delivered);
        self.handle = Some(thread::spawn(move || {
            run_sequence(inner, stop, delivered, frame_count, interval, sink);
        }));
        Ok(())
    }

    /// Set the stop flag and wait for the worker to drain.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.stop.store(false, Ordering::SeqCst);
    }
}

fn run_sequence<T, S>(
    inner: Arc<Mutex<CameraInner<T>>>,
    stop: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    frame_count: u64,
    interval: Duration,
    mut sink: S,
) where
    T: CameraTransport,
    S: FrameSink,
{
    debug!("Sequence started: {frame_count} frames at {interval:?} intervals");

    while !stop.load(Ordering::SeqCst) && delivered.load(Ordering::SeqCst) < frame_count {
        let cycle_start = Instant::now();

        // Snap and copy the frame out under the engine lock; publishing
        // happens outside it so sink code never blocks the transport.
        let frame = {
            let mut camera = inner.lock().unwrap();
            match camera.snap() {
                Ok(()) => {
                    let (width, height, bytes_per_pixel) = camera.live_geometry();
                    Some((
                        camera.live_pixels().to_vec(),
                        width,
                        height,
                        bytes_per_pixel,
                        camera.frame_metadata(),
                    ))
                }
                Err(e) => {
                    warn!("Snap failed mid-sequence, skipping frame: {e}");
                    None
                }
            }
        };

        if let Some((pixels, width, height, bytes_per_pixel, metadata)) = frame {
            let index = delivered.load(Ordering::SeqCst);
            match sink.publish(&pixels, width, height, bytes_per_pixel, index, &metadata, false) {
                Ok(()) => {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
                Err(SinkError::Overflow) => {
                    // Do not stop on overflow: reset the backlog and
                    // resubmit this frame once, skipping duplicate checks.
                    sink.clear_backlog();
                    match sink.publish(
                        &pixels,
                        width,
                        height,
                        bytes_per_pixel,
                        index,
                        &metadata,
                        true,
                    ) {
                        Ok(()) => {
                            delivered.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => warn!("Resubmit after overflow failed: {e}"),
                    }
                }
                Err(e) => warn!("Failed to publish frame {index}: {e}"),
            }
        }

        // The interval is a target, not a guarantee: a slow snap eats into
        // it, and a cycle that overran waits not at all.
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }

    debug!(
        "Sequence finished: {} frames delivered",
        delivered.load(Ordering::SeqCst)
    );
}
