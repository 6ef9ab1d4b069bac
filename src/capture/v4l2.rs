//! V4L2 capture devices (Linux).

use std::path::{Path, PathBuf};

use log::{info, warn};
use v4l::capability::Flags;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use super::{CaptureConfig, CaptureError, CaptureFormat, CaptureSource, FourCC};

/// An opened V4L2 device that supports streaming capture
pub struct V4lCapture {
    /// Kept open for the lifetime of the track
    device: Device,
    path: PathBuf,
    name: String,
    format: CaptureFormat,
}

impl V4lCapture {
    /// Open `path`, check it can stream video and apply `config`.
    pub fn open(path: &Path, config: Option<&CaptureConfig>) -> Result<Self, CaptureError> {
        let display = path.display().to_string();
        info!("Opening video capture device {}", display);

        let device = Device::with_path(path).map_err(|e| CaptureError::Open {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        let caps = device.query_caps().map_err(|e| CaptureError::Open {
            path: display.clone(),
            reason: format!("failed to query capabilities: {}", e),
        })?;
        info!("Driver: {}, card: {}, bus: {}", caps.driver, caps.card, caps.bus);

        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE)
            && !caps.capabilities.contains(Flags::VIDEO_CAPTURE_MPLANE)
        {
            return Err(CaptureError::NoCapture { path: display });
        }
        if !caps.capabilities.contains(Flags::STREAMING) {
            return Err(CaptureError::NoStreaming { path: display });
        }

        let format_error = |e: std::io::Error| CaptureError::Format {
            path: display.clone(),
            reason: e.to_string(),
        };

        let mut format = device.format().map_err(format_error)?;
        info!(
            "Original format: {}x{} {}",
            format.width,
            format.height,
            FourCC(format.fourcc.repr)
        );

        if let Some(config) = config {
            format.width = config.width;
            format.height = config.height;
            format.fourcc = v4l::FourCC::new(&config.fourcc.0);
            format = device.set_format(&format).map_err(format_error)?;

            if format.fourcc.repr != config.fourcc.0 {
                warn!(
                    "{} does not support {}, using {}",
                    display,
                    config.fourcc,
                    FourCC(format.fourcc.repr)
                );
            }

            if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
                warn!("{}: failed to set {} fps: {}", display, config.fps, e);
            }
        }

        let fps = device.params().ok().and_then(|p| {
            let interval = p.interval;
            (interval.numerator > 0).then(|| interval.denominator / interval.numerator)
        });

        let format = CaptureFormat {
            width: format.width,
            height: format.height,
            fourcc: FourCC(format.fourcc.repr),
            fps,
        };
        info!(
            "Capturing {}x{} {} at {:?} fps from {}",
            format.width, format.height, format.fourcc, format.fps, display
        );

        Ok(Self {
            device,
            path: path.to_path_buf(),
            name: caps.card,
            format,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl CaptureSource for V4lCapture {
    fn device_path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> CaptureFormat {
        self.format
    }
}
