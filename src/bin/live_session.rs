//! Live Session
//!
//! Holds one realtime voice (and optional camera) conversation with the
//! remote agent, with a local control panel for mute, video and disconnect.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_media_session::{
    audio::device::list_devices,
    config::{AppConfig, Credentials, API_KEY_ENV},
    network::WebSocketConnector,
    session::{MediaBackends, SessionController, SessionEvent},
    ui::{AppState, WebServer},
    video::SnapshotFileSource,
};

/// Realtime voice session with a remote conversational agent
#[derive(Parser, Debug)]
#[command(name = "live-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// API key for the remote service
    #[arg(long = "api-key", env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Still image sent as the camera feed once per second
    #[arg(long = "camera-snapshot", value_name = "PATH")]
    camera_snapshot: Option<PathBuf>,

    /// Text turn sent as soon as the session opens
    #[arg(long)]
    greeting: Option<String>,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// Do not start the control panel
    #[arg(long = "no-ui")]
    no_ui: bool,

    /// List audio devices and exit
    #[arg(long = "list-devices")]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let mut config = AppConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if cli.greeting.is_some() {
        config.session.greeting = cli.greeting.clone();
    }
    if cli.muted {
        config.capture.start_muted = true;
    }
    if cli.camera_snapshot.is_some() {
        config.video.snapshot_path = cli.camera_snapshot.clone();
    }

    let credentials = cli
        .api_key
        .map(Credentials::new)
        .or_else(Credentials::from_env)
        .ok_or_else(|| anyhow!("no API key: pass --api-key or set {}", API_KEY_ENV))?;

    let controller = SessionController::new(
        config.clone(),
        MediaBackends::cpal(&config),
        Arc::new(WebSocketConnector::new(config.transport.outbound_capacity)),
    );
    tracing::info!("Starting live session {}", controller.session_id());

    let (events, _) = broadcast::channel::<SessionEvent>(256);
    let mut log_events = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = log_events.recv().await {
            match &event {
                SessionEvent::AudioChunk { .. } => tracing::trace!(?event, "session event"),
                _ => tracing::info!(?event, "session event"),
            }
        }
    });

    if config.ui.enabled && !cli.no_ui {
        let web_server = WebServer::new(
            config.ui.clone(),
            AppState {
                controller: controller.clone(),
                events: events.clone(),
                snapshot_path: config.video.snapshot_path.clone(),
            },
        );
        let _web_handle = web_server.start_background();
        tracing::info!(
            "Control panel at http://{}:{}",
            config.ui.bind_address,
            config.ui.http_port
        );
    }

    let connected = tokio::select! {
        result = controller.connect(credentials, events.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted while connecting");
            controller.disconnect();
            return Ok(());
        }
    };
    if let Err(e) = connected {
        controller.disconnect();
        return Err(e).context("failed to start session");
    }

    if let Some(path) = config.video.snapshot_path.clone() {
        controller
            .start_video(Box::new(SnapshotFileSource::new(path)))
            .context("failed to start camera sampling")?;
    }

    tracing::info!("Session open - press Ctrl+C to stop");

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = poll.tick() => {
                for e in controller.take_device_errors() {
                    tracing::warn!("Microphone: {}", e);
                }
                if controller.state().is_terminal() {
                    tracing::info!("Session ended ({})", controller.state());
                    break;
                }
            }
        }
    }

    controller.disconnect();
    let stats = controller.stats();
    tracing::info!(
        "Sent {} audio / {} video frames, played {} chunks, {} interruptions",
        stats.audio_frames_sent,
        stats.video_frames_sent,
        stats.chunks_played,
        stats.interruptions
    );

    Ok(())
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}
