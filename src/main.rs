use anyhow::Context as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

mod audio;
mod command;
mod config;
mod engine;
mod error;
mod language;
mod session;
mod transcript;
mod vendor;
mod voice;
mod webhook;

use config::Settings;
use engine::TranscribeEngine;
use session::SessionEvent;
use vendor::ws::WsVendorClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    info!(endpoint = %settings.vendor_endpoint, "callscribe starting");
    if settings.env_credentials.is_some() {
        info!("explicit vendor credentials found in environment");
    } else {
        info!("no environment credentials, ambient chain will be used");
    }
    if settings.pusher.is_some() {
        info!("webhook delivery enabled");
    }

    let client = Arc::new(WsVendorClient::new(settings.vendor_endpoint.clone()));
    let (engine, mut events) = TranscribeEngine::new(settings, client);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.event {
                SessionEvent::Transcript(envelope) => info!(
                    session = %event.session_id,
                    tap = %event.tap_name,
                    is_final = envelope.is_final,
                    transcript = %envelope.to_json(),
                    "transcript"
                ),
                other => info!(
                    session = %event.session_id,
                    tap = %event.tap_name,
                    event = ?other,
                    "session event"
                ),
            }
        }
    });

    println!("callscribe console. Commands:");
    println!("  {}", command::SYNTAX);
    println!("  feed <uuid> <wav-path> [tap-name]   (stereo wavs are downmixed)");
    println!("  quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        if let Some(rest) = line.strip_prefix("feed ") {
            match spawn_feed(&engine, rest) {
                Ok(()) => println!("+OK Feeding"),
                Err(e) => println!("-ERR {e:#}"),
            }
            continue;
        }
        let status = command::execute(&engine, &line).await;
        println!("{status}");
    }

    info!(active = engine.active_sessions(), "shutting down");
    Ok(())
}

/// Pace a WAV file through the engine in 20 ms frames, standing in for the
/// host media runtime.
fn spawn_feed(engine: &Arc<TranscribeEngine>, rest: &str) -> anyhow::Result<()> {
    let args: Vec<&str> = rest.split_whitespace().collect();
    let (uuid, path) = match args.as_slice() {
        [uuid, path, ..] => (uuid.to_string(), path.to_string()),
        _ => anyhow::bail!("usage: feed <uuid> <wav-path> [tap-name]"),
    };
    let tap_name = args
        .get(2)
        .map(|s| s.to_string())
        .unwrap_or_else(|| engine::DEFAULT_TAP.to_string());

    let mut reader = hound::WavReader::open(&path).with_context(|| format!("open {path}"))?;
    let spec = reader.spec();
    anyhow::ensure!(spec.bits_per_sample == 16, "expected 16-bit PCM wav");
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .context("read wav samples")?;
    let samples = if spec.channels == 2 {
        audio::stereo_to_mono(&samples)
    } else {
        samples
    };

    let frame_len = (spec.sample_rate as usize / 50).max(1);
    info!(
        uuid = %uuid,
        rate = spec.sample_rate,
        frames = samples.len() / frame_len,
        "feeding wav"
    );
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(20));
        for frame in samples.chunks(frame_len) {
            ticker.tick().await;
            if !engine.feed_frame(&uuid, &tap_name, frame) {
                warn!(uuid = %uuid, "frame rejected, stopping feed");
                return;
            }
        }
        info!(uuid = %uuid, "wav feed complete");
    });
    Ok(())
}
