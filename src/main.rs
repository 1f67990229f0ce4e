use std::process::exit;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use abicam::{
    Binning, BitDepth, Camera, FrameMetadata, FrameSink, SerialTransport, SinkError,
};

#[derive(Parser, Debug)]
#[command(name = "abicam-demo", about = "Snap frames from an Abisense camera")]
struct Args {
    /// Serial port the camera is attached to (e.g. /dev/ttyUSB0, COM3)
    port: String,
    /// Exposure in milliseconds
    #[arg(long, default_value_t = 1000.0)]
    exposure: f64,
    /// Binning factor (1, 2, 4, 8, 16, 32, 64)
    #[arg(long, default_value_t = 1)]
    binning: u32,
    /// Pixel bit depth (6, 8, 10, 12)
    #[arg(long, default_value_t = 8)]
    bit_depth: u32,
    /// Disable dark-frame background subtraction
    #[arg(long)]
    no_subtract: bool,
    /// Run a timed sequence of this many frames instead of a single snap
    #[arg(long)]
    frames: Option<u64>,
    /// Inter-frame interval for sequences, in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

/// Sink that just reports every delivered frame on stdout.
struct ConsoleSink;

impl FrameSink for ConsoleSink {
    fn publish(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
        frame_index: u64,
        metadata: &FrameMetadata,
        _suppress_duplicate_check: bool,
    ) -> std::result::Result<(), SinkError> {
        println!(
            "[frame {frame_index}] {width}x{height}x{bytes_per_pixel} bin={} first bytes {:?}",
            metadata.binning,
            &pixels[..pixels.len().min(8)]
        );
        Ok(())
    }

    fn clear_backlog(&mut self) {}
}

fn main() {
    abicam::logging::init_rust_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let transport = SerialTransport::open(&args.port)?;
    let mut camera = Camera::new(transport);
    camera.set_binning(Binning::from_u32_checked(args.binning)?)?;
    camera.set_bit_depth(BitDepth::from_u32_checked(args.bit_depth)?)?;
    camera.set_exposure_ms(args.exposure);
    camera.set_subtract_background(!args.no_subtract);

    info!(
        "Camera ready: {}x{} at {} bytes/pixel",
        camera.width(),
        camera.height(),
        camera.bytes_per_pixel()
    );

    match camera.temperature() {
        Ok(t) => println!("Sensor temperature: {t:.2} C"),
        Err(e) => println!("Sensor temperature: unknown ({e})"),
    }

    if let Some(frames) = args.frames {
        println!("Running sequence: {frames} frames every {} ms...", args.interval_ms);
        camera.start_sequence(
            frames,
            Duration::from_millis(args.interval_ms),
            ConsoleSink,
        )?;
        while camera.is_capturing() {
            std::thread::sleep(Duration::from_millis(50));
        }
        println!("Done: {} frames delivered.", camera.frames_delivered());
        return Ok(());
    }

    println!("Snapping one frame...");
    camera.snap()?;
    let image = camera.image();
    let mean = image.iter().map(|&b| b as u64).sum::<u64>() as f64 / image.len().max(1) as f64;
    println!(
        "Got {}x{} frame ({} bytes), mean byte value {mean:.1}",
        camera.width(),
        camera.height(),
        image.len()
    );

    Ok(())
}
