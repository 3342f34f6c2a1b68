//! File Publish Demo - Play a test movie through the default audio devices
//!
//! Publishes a generated test-pattern movie: video frames are counted by a
//! sink standing in for the RTC session, the 440 Hz tone is mixed into the
//! default microphone and the mixed signal is played back on the default
//! output.
//!
//! Usage: `cargo run --example file_publish [config.json] [seconds]`

use anyhow::Context;
use moviepub::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loops captured audio back to the output, like a session echoing the
/// local microphone
#[derive(Default)]
struct LoopbackBus {
    pending: Mutex<VecDeque<i16>>,
}

impl AudioBus for LoopbackBus {
    fn write_capture_data(&self, samples: &[i16]) {
        let mut pending = self.pending.lock();
        pending.extend(samples);
        // keep at most half a second at 48 kHz
        let excess = pending.len().saturating_sub(24_000);
        pending.drain(..excess);
    }

    fn read_render_data(&self, out: &mut [i16]) -> usize {
        let mut pending = self.pending.lock();
        let count = out.len().min(pending.len());
        for (slot, sample) in out.iter_mut().zip(pending.drain(..count)) {
            *slot = sample;
        }
        count
    }
}

#[derive(Default)]
struct FrameCounter {
    frames: AtomicU64,
}

impl FrameSink for FrameCounter {
    fn consume_frame(&self, _frame: &VideoFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PublisherConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => PublisherConfig::default(),
    };
    let seconds: u64 = match args.next() {
        Some(value) => value.parse().context("seconds must be a whole number")?,
        None => 15,
    };
    init_logging(&config.log_filter)?;

    println!("🎬 File Publish Demo");
    println!("====================");

    let session = Arc::new(HostAudioSession::new());
    let backend = Arc::new(CpalAudioBackend::new().with_session(session.clone()));
    if !backend.is_available(AudioDirection::Capture) {
        println!("❌ No input device found - nothing to mix the movie into");
        return Ok(());
    }

    let asset = Arc::new(MemoryAsset::synthetic(
        VideoResolution::new(320, 180),
        25,
        config.sample_rate,
        Duration::from_secs(5),
    ));
    let bus = Arc::new(LoopbackBus::default());
    let sink = Arc::new(FrameCounter::default());

    let publisher = MoviePublisher::new(asset, bus, sink.clone(), backend, session, config)?;
    let mut events = publisher.subscribe();

    println!("🚀 Publishing for {} seconds (Ctrl-C to stop early)...", seconds);
    publisher.start()?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("\n⏹️  Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("📣 [{}] {:?}", event.timestamp.format("%H:%M:%S%.3f"), event.event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("⚠️  Skipped {} events", skipped);
                }
                Err(_) => break,
            },
        }
    }

    publisher.stop();
    let stats = publisher.device().stats();
    println!("\n📊 Summary");
    println!("  Video frames delivered: {}", sink.frames.load(Ordering::Relaxed));
    println!("  Audio units created:    {}", stats.units_created);
    println!("  Capture delay:          {} ms", publisher.device().estimated_capture_delay());
    println!("  Render delay:           {} ms", publisher.device().estimated_render_delay());
    if let Some(video) = publisher.capturer().last_stats() {
        println!(
            "  Video passes: {}, clamped waits: {}, time slept: {:?}",
            video.passes, video.clamped, video.slept
        );
    }

    Ok(())
}
