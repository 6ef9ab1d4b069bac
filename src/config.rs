//! Client configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults below. Command line flags override file values.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{parse_device_index, CaptureConfig, CaptureError};
use crate::ice::{default_ice_servers, IceServerConfig};
use crate::session::SessionConfig;

/// Default WHIP endpoint (local MediaMTX)
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8889/wadi/whip";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Everything the `wadi` binary needs to publish one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WadiConfig {
    /// WHIP endpoint URL
    pub endpoint: String,

    /// Capture device, `"2"` or `"/dev/video2"`
    pub video_device: String,

    pub capture: CaptureConfig,

    /// Codec allow-list for the offer, unset keeps every codec
    pub codecs: Option<Vec<String>>,

    /// Bits per second
    pub max_bitrate: Option<u64>,

    /// Frames per second
    pub max_framerate: Option<u32>,

    pub enable_dtls: bool,

    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for WadiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            video_device: "0".to_string(),
            capture: CaptureConfig::default(),
            codecs: None,
            max_bitrate: None,
            max_framerate: None,
            enable_dtls: true,
            ice_servers: default_ice_servers(),
        }
    }
}

impl WadiConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Index N of `/dev/videoN`
    pub fn device_index(&self) -> Result<u8, CaptureError> {
        parse_device_index(&self.video_device)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            allowed_codecs: self.codecs.clone(),
            max_bitrate: self.max_bitrate,
            max_framerate: self.max_framerate,
            ice_servers: self.ice_servers.clone(),
        }
    }
}
