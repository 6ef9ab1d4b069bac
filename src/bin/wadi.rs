//! wadi: publish a V4L2 camera to a WHIP endpoint.
//!
//! Usage: wadi [ENDPOINT] [-d DEVICE] [-w WIDTH] [-h HEIGHT] [-r FPS] [-c FOURCC]
//!
//! Runs until Ctrl+C, then deletes the WHIP resource and closes the peer
//! connection.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use wadi::capture::FourCC;
use wadi::{HttpTransport, MediaEngineAdapter, WadiConfig, WebRtcEngine, WhipSession};

/// WHIP video ingest client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
struct Args {
    /// WHIP endpoint URL
    endpoint: Option<String>,

    /// Video device index or path (e.g. 0 or /dev/video0)
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Capture width
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// Capture height
    #[arg(short = 'h', long)]
    height: Option<u32>,

    /// Capture framerate
    #[arg(short = 'r', long)]
    fps: Option<u32>,

    /// Capture pixel format (fourcc, e.g. I420, YUYV)
    #[arg(short = 'c', long)]
    fourcc: Option<String>,

    /// Keep only this codec in the offer (repeatable, e.g. --codec H264 --codec rtx)
    #[arg(long = "codec")]
    codecs: Vec<String>,

    /// Maximum send bitrate in bits per second
    #[arg(long)]
    max_bitrate: Option<u64>,

    /// Maximum send framerate
    #[arg(long)]
    max_framerate: Option<u32>,

    /// Request a peer connection without DTLS-SRTP
    #[arg(long)]
    no_dtls: bool,

    /// JSON config file, flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

impl Args {
    fn into_config(self) -> Result<WadiConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => WadiConfig::from_file(path)?,
            None => WadiConfig::default(),
        };

        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(device) = self.device {
            config.video_device = device;
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if let Some(fourcc) = self.fourcc {
            config.capture.fourcc = FourCC::parse(&fourcc)?;
        }
        if !self.codecs.is_empty() {
            config.codecs = Some(self.codecs);
        }
        if self.max_bitrate.is_some() {
            config.max_bitrate = self.max_bitrate;
        }
        if self.max_framerate.is_some() {
            config.max_framerate = self.max_framerate;
        }
        if self.no_dtls {
            config.enable_dtls = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Args::parse().into_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: WadiConfig) -> Result<(), Box<dyn std::error::Error>> {
    let device_index = config.device_index()?;
    let engine = Arc::new(WebRtcEngine::new()?);
    let transport = Arc::new(HttpTransport::new());
    let session = WhipSession::new(config.session_config(), engine.clone(), transport);

    info!("Requesting connection to WHIP server {}", config.endpoint);
    session.initialize()?;
    session.create_connection(config.enable_dtls).await?;
    info!("Connection created successfully");

    session.add_track(device_index, Some(config.capture)).await?;
    session.create_offer()?;

    let offer = session.wait_for_local_description().await?;
    info!("Offer ready ({} bytes)", offer.len());
    session.wait_for_completion().await?;
    info!("Publishing to {}, press Ctrl+C to stop", config.endpoint);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to wait for Ctrl+C: {}", e);
    }

    info!("Stopping...");
    session.disconnect().await;
    engine.close().await?;
    Ok(())
}
