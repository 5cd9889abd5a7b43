//! Live Session Application
//!
//! Runs one voice session against the loopback transport: the microphone is
//! streamed out and echoed back through the speakers.
//!
//! Usage: `live-session [config.toml]`

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_voice_session::{
    audio::{device::list_devices, CpalCapture, CpalOutput},
    config::AppConfig,
    transport::LoopbackTransport,
    SessionController, SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting live voice session");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from(Path::new(&path))?,
        None => AppConfig::load()?,
    };

    // List available devices
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        if let (Some(rate), Some(channels)) = (device.default_sample_rate, device.default_channels) {
            println!("    Default: {} Hz, {} channels", rate, channels);
        }
    }
    println!();

    let audio = &config.audio;
    let capture = Arc::new(CpalCapture::new(
        "mic",
        audio.input_device.clone(),
        audio.input_sample_rate,
        audio.capture_frame_samples,
    ));
    let output = Arc::new(
        CpalOutput::open("speaker", audio.output_device.clone())
            .context("failed to open the output device")?,
    );
    tracing::info!("Output device running at {} Hz", output.device_rate());

    let transport = Arc::new(LoopbackTransport::new(
        audio.input_sample_rate,
        audio.output_sample_rate,
        Duration::from_millis(config.session.loopback_delay_ms),
    ));

    let session = SessionController::new(&config, capture, transport, output)?;
    let changes = session.subscribe();
    session.start().context("failed to start the session")?;

    tracing::info!(
        "Session {} running ({:.0} ms capture frames) - press Ctrl+C to stop",
        session.id(),
        audio.capture_frame_ms()
    );

    let mut closed = tokio::task::spawn_blocking(move || {
        changes.iter().find(|change| change.to == SessionState::Closed)
    });
    let mut stats = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, stopping");
                break;
            }
            _ = &mut closed => {
                tracing::warn!("Session closed");
                break;
            }
            _ = stats.tick() => {
                let status = session.status();
                tracing::info!(
                    "Stats: {} state, {} frames sent, {} dropped, {} received, {} malformed, {} playing",
                    status.state,
                    status.frames_sent,
                    status.frames_dropped,
                    status.messages_received,
                    status.frames_malformed,
                    status.units_active
                );
            }
        }
    }

    session.stop();

    let status = session.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(error) = session.last_error() {
        tracing::error!("Session ended with an error: {}", error);
    }
    Ok(())
}
