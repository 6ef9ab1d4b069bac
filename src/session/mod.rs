//! WHIP session: configuration, lifecycle states and the error taxonomy.

pub mod controller;

use std::fmt;

use thiserror::Error;

use crate::capture::CaptureError;
use crate::ice::{default_ice_servers, IceServerConfig};
use crate::peer::{EncodingLimits, EngineError};
use crate::sdp::SdpError;
use crate::signaling::TransportError;

pub use controller::WhipSession;

/// Media stream id used for the outbound track
pub const STREAM_ID: &str = "stream_id";

/// Lifecycle of a [`WhipSession`]. `RemoteApplied` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    FactoryReady,
    Connected,
    TrackAdded,
    OfferRequested,
    LocalDescriptionSet,
    ParametersApplied,
    Filtered,
    Posted,
    RemoteApplied,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::RemoteApplied | SessionState::Failed)
    }

    /// True once the outbound SDP has been stored
    pub fn has_local_description(&self) -> bool {
        matches!(
            self,
            SessionState::Filtered | SessionState::Posted | SessionState::RemoteApplied
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session failures.
///
/// `ConnectionCreation` is returned to the caller without failing the
/// session; every other variant moves it to [`SessionState::Failed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection creation failed: {0}")]
    ConnectionCreation(EngineError),

    #[error("negotiation failed: {0}")]
    Negotiation(EngineError),

    #[error("WHIP endpoint returned HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("WHIP request failed: {0}")]
    TransportIo(TransportError),

    #[error("malformed SDP answer: {0}")]
    MalformedAnswer(SdpError),

    #[error("capture device: {0}")]
    Capture(CaptureError),

    #[error("invalid session state: expected {expected}, found {found}")]
    InvalidState {
        expected: SessionState,
        found: SessionState,
    },
}

/// Construction-time settings of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// WHIP endpoint URL
    pub endpoint: String,
    /// Codec names kept in video sections, `None` keeps the offer as is
    pub allowed_codecs: Option<Vec<String>>,
    /// Bits per second
    pub max_bitrate: Option<u64>,
    /// Frames per second
    pub max_framerate: Option<u32>,
    pub ice_servers: Vec<IceServerConfig>,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            allowed_codecs: None,
            max_bitrate: None,
            max_framerate: None,
            ice_servers: default_ice_servers(),
        }
    }

    pub fn with_allowed_codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_codecs = Some(codecs.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_bitrate(mut self, bps: u64) -> Self {
        self.max_bitrate = Some(bps);
        self
    }

    pub fn with_max_framerate(mut self, fps: u32) -> Self {
        self.max_framerate = Some(fps);
        self
    }

    pub fn encoding_limits(&self) -> EncodingLimits {
        EncodingLimits::new(self.max_bitrate, self.max_framerate)
    }
}
