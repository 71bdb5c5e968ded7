//! Stream Player: a small CLI that synthesizes a PCM test tone and plays
//! it through the streaming engine on the default (or selected) output
//! device.
//!
//! ## Pipeline
//! 1. **Produce**: the main thread generates fixed-duration sine chunks and
//!    feeds them to the engine at roughly real-time pace.
//! 2. **Buffer**: the engine queues chunks and keeps its pool of hardware
//!    buffers primed.
//! 3. **Playback**: the driver's completion callback pulls queued bytes
//!    into each drained buffer and resubmits it.
//!
//! Ctrl-C (or `--seconds`) stops playback, prints session stats, and
//! disposes the engine.

mod cli;
mod tone;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stream_engine::config::EngineConfig;
use stream_engine::cpal_driver::CpalDriver;
use stream_engine::device;
use stream_engine::engine::PlaybackEngine;
use stream_engine::format::AudioFormat;
use stream_engine::ingest::AudioChunk;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stream_player=info")),
        )
        .init();

    if args.list_devices {
        device::list_devices().context("list output devices")?;
        return Ok(());
    }

    let format = AudioFormat::linear_pcm(f64::from(args.sample_rate), 16, 1);
    let config = EngineConfig {
        buffer_count: args.buffers,
        target_latency: args.latency_ms as f64 / 1000.0,
        ..EngineConfig::default()
    };

    let driver = CpalDriver::new(args.device.clone());
    let engine = PlaybackEngine::new(Box::new(driver), config);
    engine.configure(format).context("configure playback")?;

    let events = engine.events();
    let event_logger = std::thread::spawn(move || {
        for event in events.iter() {
            tracing::info!(?event, "engine event");
        }
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = stop.clone();
    let _ = ctrlc::set_handler(move || {
        stop_for_signal.store(true, Ordering::SeqCst);
    });

    let chunk_ms = args.chunk_ms.max(1);
    let chunk_frames = (u64::from(args.sample_rate) * chunk_ms / 1000).max(1) as usize;
    let mut tone = tone::ToneSource::new(f64::from(args.sample_rate), args.frequency);

    // Pre-buffer a couple of chunks so priming starts with audio instead of
    // silence.
    for _ in 0..2 {
        engine.feed(AudioChunk::new(tone.next_chunk(chunk_frames)))?;
    }

    engine.start().context("start playback")?;
    tracing::info!(
        freq_hz = args.frequency,
        rate_hz = args.sample_rate,
        "playing tone; Ctrl-C to stop"
    );

    let started = Instant::now();
    let deadline = (args.seconds > 0).then(|| Duration::from_secs(args.seconds));
    while !stop.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if started.elapsed() >= deadline {
                break;
            }
        }
        engine.feed(AudioChunk::new(tone.next_chunk(chunk_frames)))?;
        std::thread::sleep(Duration::from_millis(chunk_ms));
    }

    engine.stop().context("stop playback")?;
    let stats = engine.stats();
    tracing::info!(
        submitted = stats.submitted_buffers,
        silent = stats.silent_buffers,
        chunks = stats.ingested_chunks,
        bytes = stats.ingested_bytes,
        "session stats"
    );
    engine.dispose().context("dispose engine")?;
    drop(engine);
    let _ = event_logger.join();
    Ok(())
}
