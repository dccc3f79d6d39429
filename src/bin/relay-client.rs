//! # relay-client
//!
//! Headless voice client: replays a WAV file as the microphone, streams it
//! through the relay and records the spoken response to another WAV file.
//!
//! Configuration comes from the same sources as the server (`config.toml`,
//! `APP_CLIENT__*`, `APP_AUDIO__*`). Two optional positional arguments
//! override the input and output paths.

use anyhow::{Context, Result};
use realtime_relay::audio::{WavInput, WavOutput};
use realtime_relay::client::{SessionStatus, VoiceSession};
use realtime_relay::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to keep listening for the response after capture ends.
const RESPONSE_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    realtime_relay::install_crypto_provider();

    let mut config = AppConfig::load()?;
    config.validate()?;

    let mut args = std::env::args().skip(1);
    if let Some(input) = args.next() {
        config.client.input_wav = input;
    }
    if let Some(output) = args.next() {
        config.client.output_wav = output;
    }

    let input = WavInput::open(
        &config.client.input_wav,
        config.audio.sample_rate,
        config.client.callback_samples,
    )
    .with_context(|| format!("opening {}", config.client.input_wav))?;
    let output = WavOutput::create(&config.client.output_wav, config.audio.sample_rate)
        .realtime(config.client.realtime_playback);

    let (status_tx, mut status_rx) = watch::channel(SessionStatus::Ready);
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            info!("Status: {}", *status_rx.borrow_and_update());
        }
    });

    let mut session = VoiceSession::start_with_status(&config, input, output, Arc::new(status_tx))
        .await
        .context("starting voice session")?;

    tokio::select! {
        _ = session.capture_finished() => {
            info!("Capture finished, waiting {:?} for the response", RESPONSE_GRACE);
            tokio::select! {
                _ = tokio::time::sleep(RESPONSE_GRACE) => {}
                _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
            }
        }
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }

    let stats = session.stop().await;
    info!(
        "Sent {} windows ({} dropped), played {} chunks ({} failed)",
        stats.windows_sent, stats.dropped_windows, stats.playback.played, stats.playback.failed
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_relay=info,relay_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
