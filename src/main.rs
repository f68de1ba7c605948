//! vadev - virtual audio device endpoint exerciser CLI

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

use vadev::audio::{AudioFormat, StreamDirection, StreamState};
use vadev::config::{Args, Command, DeviceConfig};
use vadev::device::{DeviceContext, SharedStateBlock};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let config = match &args.config {
        Some(path) => DeviceConfig::load(path)?,
        None => DeviceConfig::load_default()?,
    };

    // Execute command
    match args.command.unwrap_or_default() {
        Command::Info => cmd_info(&config),
        Command::Run {
            buffer,
            interval,
            capture,
        } => cmd_run(&config, buffer, interval, capture),
        Command::Inspect => cmd_inspect(&config),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(log_file) = &args.log {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Show the device configuration and supported formats
fn cmd_info(config: &DeviceConfig) -> Result<()> {
    println!("vadev - virtual audio device\n");
    println!("  Name:          {}", config.name);
    println!("  Loopback:      {} KiB", config.loopback_kib);
    match config.dedicated_limit_kib {
        Some(kib) => println!("  Dedicated cap: {} KiB", kib),
        None => println!("  Dedicated cap: unlimited"),
    }
    println!("  Shared block:  {} bytes", SharedStateBlock::len());

    println!("\nSupported formats:\n");
    for format in &AudioFormat::SUPPORTED {
        let active = if *format == config.format() {
            " (active)"
        } else {
            ""
        };
        println!(
            "  {} - {} bytes/sec{}",
            format,
            format.bytes_per_second(),
            active
        );
    }

    println!();
    Ok(())
}

/// Create a device, start streams, and poll positions until Ctrl+C
fn cmd_run(config: &DeviceConfig, buffer_kib: usize, interval_ms: u64, with_capture: bool) -> Result<()> {
    println!("vadev - virtual audio device\n");

    let device = match DeviceContext::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to start device: {}", e);
            return Err(e.into());
        }
    };
    let format = device.format().clone();
    println!("Device format: {}", format);

    let mut render = device.create_stream(StreamDirection::Render, &format);
    let actual = render.allocate_buffer(buffer_kib * 1024)?;
    println!(
        "Render buffer: {} bytes ({})",
        actual,
        if render.has_exclusive_buffer() {
            "dedicated"
        } else {
            "shared loopback"
        }
    );

    let mut capture = if with_capture {
        let mut stream = device.create_stream(StreamDirection::Capture, &format);
        let actual = stream.allocate_buffer(buffer_kib * 1024)?;
        println!(
            "Capture buffer: {} bytes ({})",
            actual,
            if stream.has_exclusive_buffer() {
                "dedicated"
            } else {
                "shared loopback"
            }
        );
        Some(stream)
    } else {
        None
    };

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let _ = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    });

    render.set_state(StreamState::Running);
    if let Some(stream) = capture.as_mut() {
        stream.set_state(StreamState::Running);
    }
    println!("\nStreams running. Press Ctrl+C to stop.\n");

    let params = device.shared_block().params();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(interval_ms));

        let (play, write) = render.position();
        print!("render play={:>8} write={:>8}", play, write);
        if let Some(stream) = capture.as_ref() {
            let (play, _) = stream.position();
            print!("  capture read={:>8}", play);
        }
        println!(
            "  | block wpos={:>8} rpos={:>8} gain={:.2}",
            params.write_pos(),
            params.read_pos(),
            params.master_gain()
        );
    }

    render.set_state(StreamState::Stopped);
    render.free_buffer();
    if let Some(stream) = capture.as_mut() {
        stream.set_state(StreamState::Stopped);
        stream.free_buffer();
    }
    println!("Stopped.");

    Ok(())
}

/// Map the shared parameter block externally and dump every field
fn cmd_inspect(config: &DeviceConfig) -> Result<()> {
    let device = DeviceContext::new(config)?;
    let status = device.status();

    let handle = device.map_shared_block()?;
    let params = handle.params();
    let (peak_l, peak_r) = params.peaks();

    println!("Device status:\n");
    println!("  Magic:          {:#010X}", status.magic);
    println!("  Loopback:       {} bytes", status.loopback_size);

    println!("\nShared parameter block (external mapping):\n");
    println!("  QpcFrequency:    {}", params.qpc_frequency());
    println!("  RenderStartQpc:  {}", params.render_start_qpc());
    println!("  CaptureStartQpc: {}", params.capture_start_qpc());
    println!("  MasterGain:      {:.3}", params.master_gain());
    println!("  PeakL / PeakR:   {:.3} / {:.3}", peak_l, peak_r);
    println!("  BufferSize:      {}", params.buffer_size());
    println!("  ByteRate:        {}", params.byte_rate());
    println!("  WritePos:        {}", params.write_pos());
    println!("  ReadPos:         {}", params.read_pos());

    let mut snapshot = vec![0u8; SharedStateBlock::len()];
    let copied = device.shared_block().snapshot_into(&mut snapshot)?;
    println!("\nSnapshot: {} bytes copied", copied);

    Ok(())
}
