//! Outbound encoding parameters and the bitrate / framerate ceilings applied
//! to them before the offer is sent.

use std::sync::Arc;

use log::{debug, info};

use super::{EngineError, RtpSenderHandle};

/// Parameters of a single outbound encoding
#[derive(Debug, Clone, PartialEq)]
pub struct RtpEncodingParameters {
    pub rid: String,
    pub ssrc: u32,
    pub payload_type: u8,
    pub active: bool,
    /// Bits per second
    pub max_bitrate: Option<u64>,
    /// Frames per second
    pub max_framerate: Option<f64>,
    pub scale_resolution_down_by: Option<f64>,
}

impl Default for RtpEncodingParameters {
    fn default() -> Self {
        Self {
            rid: String::new(),
            ssrc: 0,
            payload_type: 0,
            active: true,
            max_bitrate: None,
            max_framerate: None,
            scale_resolution_down_by: None,
        }
    }
}

/// Parameter set of one RTP sender
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtpSendParameters {
    pub transaction_id: String,
    pub encodings: Vec<RtpEncodingParameters>,
}

/// Optional ceilings written into every encoding of every sender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingLimits {
    /// Bits per second
    pub max_bitrate: Option<u64>,
    /// Frames per second
    pub max_framerate: Option<u32>,
}

impl EncodingLimits {
    pub fn new(max_bitrate: Option<u64>, max_framerate: Option<u32>) -> Self {
        Self {
            max_bitrate,
            max_framerate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_bitrate.is_none() && self.max_framerate.is_none()
    }

    /// Overwrite the bitrate / framerate fields of every encoding. Nothing
    /// else is touched.
    pub fn apply(&self, params: &mut RtpSendParameters) {
        for encoding in &mut params.encodings {
            if let Some(bitrate) = self.max_bitrate {
                encoding.max_bitrate = Some(bitrate);
            }
            if let Some(framerate) = self.max_framerate {
                encoding.max_framerate = Some(framerate as f64);
            }
        }
    }

    /// Read, limit and commit the parameters of each sender.
    ///
    /// Returns the number of senders updated.
    pub async fn apply_to_senders(
        &self,
        senders: &[Arc<dyn RtpSenderHandle>],
    ) -> Result<usize, EngineError> {
        if self.is_empty() {
            debug!("No encoding limits configured");
            return Ok(0);
        }

        for sender in senders {
            let mut params = sender.parameters().await?;
            self.apply(&mut params);
            sender.set_parameters(params).await?;
        }

        info!(
            "Applied encoding limits (max_bitrate={:?}, max_framerate={:?}) to {} sender(s)",
            self.max_bitrate,
            self.max_framerate,
            senders.len()
        );
        Ok(senders.len())
    }
}
