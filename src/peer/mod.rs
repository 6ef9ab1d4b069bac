//! Media engine boundary.
//!
//! [`MediaEngineAdapter`] is everything the WHIP session needs from a WebRTC
//! stack; [`connection::WebRtcEngine`] implements it on top of webrtc-rs.
//! Events flow back through [`PeerConnectionObserver`], always on the
//! adapter's [`SignalingThread`].

pub mod connection;
pub mod parameters;
pub mod signaling_thread;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use thiserror::Error;

use crate::capture::CaptureSource;
use crate::ice::IceServerConfig;
use crate::sdp::SessionDescription;

pub use connection::WebRtcEngine;
pub use parameters::{EncodingLimits, RtpEncodingParameters, RtpSendParameters};
pub use signaling_thread::{SignalingTask, SignalingThread};

/// Errors reported by a media engine adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("peer connection factory not initialized")]
    NotInitialized,

    #[error("no peer connection")]
    NoPeerConnection,

    #[error("signaling thread is not running")]
    SignalingThreadClosed,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),
}

impl From<webrtc::Error> for EngineError {
    fn from(e: webrtc::Error) -> Self {
        EngineError::WebRtc(e.to_string())
    }
}

/// Peer connection construction options
#[derive(Clone, Debug)]
pub struct PeerConnectionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// DTLS-SRTP for media
    pub enable_dtls: bool,
}

/// ICE candidate discovered by the local agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceCandidateInfo {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Signaling state of the peer connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// ICE connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// ICE gathering state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// Remote track announced by the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: String,
}

/// Peer connection events.
///
/// Every method has an empty default body so implementors only override the
/// events they care about. Called on the adapter's signaling thread, one at a
/// time.
pub trait PeerConnectionObserver: Send + Sync {
    fn on_signaling_change(&self, _state: SignalingState) {}

    fn on_data_channel(&self, _label: &str) {}

    fn on_renegotiation_needed(&self) {}

    fn on_ice_connection_change(&self, _state: IceConnectionState) {}

    fn on_ice_gathering_change(&self, _state: IceGatheringState) {}

    fn on_ice_connection_receiving_change(&self, _receiving: bool) {}

    fn on_add_track(&self, _track: RemoteTrackInfo) {}

    fn on_remove_track(&self, _track: RemoteTrackInfo) {}

    fn on_ice_candidate(&self, _candidate: IceCandidateInfo) {}
}

/// Outbound RTP sender with read/modify/write encoding parameters
#[async_trait]
pub trait RtpSenderHandle: Send + Sync {
    /// Current parameters of every encoding of this sender
    async fn parameters(&self) -> Result<RtpSendParameters, EngineError>;

    /// Commit a (modified) parameter set read from [`Self::parameters`]
    async fn set_parameters(&self, params: RtpSendParameters) -> Result<(), EngineError>;
}

/// What a WHIP session needs from a WebRTC stack.
///
/// Holders share the adapter; the session never closes it implicitly.
#[async_trait]
pub trait MediaEngineAdapter: Send + Sync {
    /// Build the peer connection factory (codecs, interceptors)
    fn initialize(&self) -> Result<(), EngineError>;

    /// Create the peer connection. `observer` is held weakly.
    async fn create_peer_connection(
        &self,
        config: PeerConnectionConfig,
        observer: Weak<dyn PeerConnectionObserver>,
    ) -> Result<(), EngineError>;

    /// Register `source` as an outbound video track in stream `stream_id`
    async fn add_video_track(
        &self,
        source: Arc<dyn CaptureSource>,
        stream_id: &str,
    ) -> Result<(), EngineError>;

    /// Queue `task` on the signaling thread
    fn post(&self, task: SignalingTask) -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Local description as currently serialized by the engine
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn senders(&self) -> Vec<Arc<dyn RtpSenderHandle>>;

    async fn close(&self) -> Result<(), EngineError>;
}
