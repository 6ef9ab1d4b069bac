//! Video capture sources.
//!
//! The session only needs to open a device and hand it to the media engine;
//! frame pumping and encoding happen elsewhere.

#[cfg(target_os = "linux")]
pub mod v4l2;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of V4L2 device nodes
pub const BASE_VIDEO_PATH: &str = "/dev/video";

/// Errors that can occur while opening a capture device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("{path} cannot capture video")]
    NoCapture { path: String },

    #[error("{path} cannot stream video")]
    NoStreaming { path: String },

    #[error("failed to configure {path}: {reason}")]
    Format { path: String, reason: String },

    #[error("invalid video device: {0}")]
    InvalidDevice(String),

    #[error("invalid pixel format: '{0}'")]
    InvalidFourCC(String),

    #[error("video capture is not supported on this platform")]
    Unsupported,
}

/// Four character pixel format code (e.g. `I420`, `YUYV`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Upper-case `code`, truncating to four characters. Shorter codes are
    /// padded with spaces.
    pub fn parse(code: &str) -> Result<Self, CaptureError> {
        if code.is_empty() || !code.is_ascii() {
            return Err(CaptureError::InvalidFourCC(code.to_string()));
        }
        let mut bytes = [b' '; 4];
        for (dst, src) in bytes.iter_mut().zip(code.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(Self(bytes))
    }

    /// From the little-endian `u32` used by V4L2
    pub fn from_u32(pixelformat: u32) -> Self {
        Self(pixelformat.to_le_bytes())
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fourcc_to_string(self.to_u32()))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

impl TryFrom<String> for FourCC {
    type Error = CaptureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FourCC::parse(&value)
    }
}

impl From<FourCC> for String {
    fn from(value: FourCC) -> Self {
        value.to_string()
    }
}

/// Render a V4L2 pixel format as its four characters
pub fn fourcc_to_string(pixelformat: u32) -> String {
    pixelformat
        .to_le_bytes()
        .iter()
        .map(|&b| b as char)
        .collect()
}

/// Raw frame layouts understood by the capture pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoType {
    Unknown,
    I420,
    IYUV,
    RGB24,
    YUY2,
    YV12,
    UYVY,
    NV21,
    NV12,
    BGRA,
}

impl From<FourCC> for VideoType {
    fn from(code: FourCC) -> Self {
        match &code.0 {
            b"I420" | b"YU12" => VideoType::I420,
            b"IYUV" => VideoType::IYUV,
            b"RGB3" => VideoType::RGB24,
            b"YUY2" | b"YUYV" => VideoType::YUY2,
            b"YV12" => VideoType::YV12,
            b"UYVY" => VideoType::UYVY,
            b"NV21" => VideoType::NV21,
            b"NV12" => VideoType::NV12,
            b"BGRA" => VideoType::BGRA,
            _ => VideoType::Unknown,
        }
    }
}

/// Requested capture geometry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: FourCC,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            fourcc: FourCC(*b"I420"),
        }
    }
}

/// Format a device actually delivers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    /// `None` when the driver does not report a frame interval
    pub fps: Option<u32>,
}

impl CaptureFormat {
    pub fn video_type(&self) -> VideoType {
        self.fourcc.into()
    }
}

/// An opened video source that can back an outbound track
pub trait CaptureSource: Send + Sync {
    fn device_path(&self) -> &Path;

    /// Human readable device name
    fn name(&self) -> &str;

    fn format(&self) -> CaptureFormat;
}

/// `/dev/video<index>`
pub fn device_path(index: u8) -> PathBuf {
    PathBuf::from(format!("{}{}", BASE_VIDEO_PATH, index))
}

/// Accept either a bare index (`"2"`) or a device node (`"/dev/video2"`).
pub fn parse_device_index(device: &str) -> Result<u8, CaptureError> {
    let index = device.strip_prefix(BASE_VIDEO_PATH).unwrap_or(device);
    index
        .parse::<u8>()
        .map_err(|_| CaptureError::InvalidDevice(device.to_string()))
}

/// Open the capture device at `path`, applying `config` when given.
#[cfg(target_os = "linux")]
pub fn open_device(
    path: &Path,
    config: Option<&CaptureConfig>,
) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Ok(Box::new(v4l2::V4lCapture::open(path, config)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open_device(
    _path: &Path,
    _config: Option<&CaptureConfig>,
) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Err(CaptureError::Unsupported)
}
