//! Frameport loopback demo
//!
//! Captures from the input of a virtual card and plays the frames back out
//! of its output, paced by the card's own clocks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::bounded;
use tracing::{error, info, warn};

use frameport::device::{Device, StaticDirectory, VirtualDevice};
use frameport::{
    Config, FrameBuffer, HandleArena, IngestQueue, OutputMode, OutputPacer, OutputScheduler,
};

struct Args {
    config: Option<PathBuf>,
    seconds: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        seconds: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or_else(|| eyre!("--config needs a path"))?;
                args.config = Some(path.into());
            }
            "--seconds" => {
                let value = iter.next().ok_or_else(|| eyre!("--seconds needs a value"))?;
                args.seconds = Some(value.parse()?);
            }
            other => return Err(eyre!("unknown argument: {}", other)),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frameport=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Frameport loopback launching...");

    let args = parse_args()?;
    let config = Config::load(args.config.as_deref())?;
    frameport::CONFIG.store(Arc::new(config.clone()));

    let mode = config.device.display_mode();
    let interval = mode.format.frame_interval();
    info!("Virtual device {} running {} ({})", config.device.name, mode.name, mode.format.pixel_format);

    let device = Arc::new(VirtualDevice::new(config.device.name.clone(), vec![mode]));
    let input = device
        .virtual_input()
        .ok_or_else(|| eyre!("loopback device has no input"))?;
    let output = device
        .virtual_output()
        .ok_or_else(|| eyre!("loopback device has no output"))?;
    let directory = Arc::new(StaticDirectory::new(vec![device as Arc<dyn Device>]));

    // Host-style handles, as a plugin would hand out
    let mut receivers = HandleArena::new();
    let mut senders = HandleArena::new();

    let receiver = receivers.insert(Arc::new(IngestQueue::new(
        directory.clone(),
        config.capture.queue_capacity,
    )));
    let sender = senders.insert(Arc::new(OutputScheduler::with_late_policy(
        directory,
        config.playback.late_policy,
    )));
    info!("Receiver handle {}, sender handle {}", receiver, sender);

    let ingest = receivers
        .get(receiver)
        .cloned()
        .ok_or_else(|| eyre!("receiver handle is stale"))?;
    let scheduler = senders
        .get(sender)
        .cloned()
        .ok_or_else(|| eyre!("sender handle is stale"))?;

    ingest.start(config.capture.device_index, config.capture.format_index)?;
    match config.playback.mode {
        OutputMode::Async => scheduler.start_async(
            config.playback.device_index,
            config.playback.format_index,
            config.playback.preroll,
        )?,
        OutputMode::Manual => {
            scheduler.start_manual(config.playback.device_index, config.playback.format_index)?
        }
    }

    // Device clocks
    let mut generator = input.spawn_generator(interval);
    let mut clock = output.spawn_clock(interval);

    let (tx, rx) = bounded::<FrameBuffer>(config.capture.queue_capacity);

    // Ingest -> channel
    let capture_queue = ingest.clone();
    let capture_handle = tokio::task::spawn_blocking(move || {
        while capture_queue.is_running() {
            if let Some(frame) = capture_queue.pop_blocking(Duration::from_millis(100)) {
                if tx.send(frame).is_err() {
                    break;
                }
            }
        }
    });

    // Channel -> output
    let playback_scheduler = scheduler.clone();
    let playback_mode = config.playback.mode;
    let mut pacer = OutputPacer::new(
        config.playback.queue_length,
        Duration::from_millis(config.playback.completion_timeout_ms),
    );
    let playback_handle = tokio::task::spawn_blocking(move || {
        for frame in rx.iter() {
            let fed = match playback_mode {
                OutputMode::Async => playback_scheduler.feed(&frame),
                OutputMode::Manual => pacer.feed(&playback_scheduler, &frame),
            };
            if let Err(e) = fed {
                if playback_scheduler.is_running() {
                    error!("Playback failed: {}", e);
                }
                break;
            }
        }
    });

    match args.seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    // Producers first so waiters see a clean stop
    generator.stop();
    ingest.stop();
    scheduler.stop();
    clock.stop();

    capture_handle.await?;
    playback_handle.await?;

    let ingest_stats = ingest.stats();
    let output_stats = scheduler.stats();
    info!(
        "Ingest: received {}, consumed {}, dropped {}, mismatched {}",
        ingest_stats.received, ingest_stats.consumed, ingest_stats.dropped, ingest_stats.mismatched
    );
    info!(
        "Output: queued {}, completed {}, late {}, dropped {}",
        output_stats.queued, output_stats.completed, output_stats.skipped, output_stats.dropped
    );
    if let Some(e) = ingest.error().or_else(|| scheduler.error()) {
        warn!("Finished with error: {}", e);
    }

    receivers.remove(receiver);
    senders.remove(sender);

    info!("Frameport shutting down");
    Ok(())
}
