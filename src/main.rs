use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use halo_voice::audio::capture::{CapturePipeline, ChunkSink, FaultSink, StreamCapture};
use halo_voice::audio::pcm;
use halo_voice::audio::playback::{PlaybackPipeline, StreamPlayback};
use halo_voice::Config;

/// Halo - live bidirectional voice client for generative AI endpoints
#[derive(Parser)]
#[command(name = "halo", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone capture and chunking
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,halo_voice=info",
        1 => "info,halo_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Test microphone capture through the full chunking path
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load();
    let chunks = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));

    let chunk_count = Arc::clone(&chunks);
    let byte_count = Arc::clone(&bytes);
    let on_chunk: ChunkSink = Arc::new(move |chunk| {
        chunk_count.fetch_add(1, Ordering::Relaxed);
        byte_count.fetch_add(chunk.data.len() as u64, Ordering::Relaxed);
    });
    let on_error: FaultSink = Arc::new(|e| {
        eprintln!("capture fault: {e}");
    });

    let mut capture = StreamCapture::new(config.audio.chunk_duration_ms);
    capture.start(on_chunk, on_error)?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        println!(
            "[{:2}s] chunks emitted: {} ({} encoded bytes)",
            i + 1,
            chunks.load(Ordering::Relaxed),
            bytes.load(Ordering::Relaxed),
        );
    }

    capture.stop();

    let total = chunks.load(Ordering::Relaxed);
    let expected = duration * 1000 / u64::from(config.audio.chunk_duration_ms);
    println!("\n---");
    println!("Emitted {total} chunks (expected about {expected}).");
    println!("If the count stayed at 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = StreamPlayback::new();
    playback.start()?;

    // 2 seconds of 440Hz at the inbound wire rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();

    playback.play(&pcm::f32_to_pcm16(&samples))?;
    tokio::time::sleep(Duration::from_millis(2300)).await;
    playback.stop();

    println!("Done. If you heard nothing, check your default output device.");
    Ok(())
}
