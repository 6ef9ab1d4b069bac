//! wadi: WHIP video ingest client.
//!
//! Publishes a local V4L2 camera to a WHIP endpoint (RFC 9725) over WebRTC.
//!
//! ## Features
//!
//! - **WHIP signaling**: one HTTP POST of the SDP offer, DELETE on teardown
//! - **Codec restriction**: keep only selected codecs in the offered video sections
//! - **Encoding limits**: optional max bitrate and framerate on every sender
//! - **Serialized events**: all peer connection callbacks run on one signaling thread
//!
//! The session ([`session::WhipSession`]) only talks to its collaborators
//! through traits, [`peer::MediaEngineAdapter`] and
//! [`signaling::SignalingTransport`], so both can be replaced in tests.

pub mod capture;
pub mod config;
pub mod ice;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;

pub use config::{ConfigError, WadiConfig};
pub use peer::{MediaEngineAdapter, WebRtcEngine};
pub use sdp::force_codecs;
pub use session::{SessionConfig, SessionError, SessionState, WhipSession};
pub use signaling::{HttpTransport, SignalingTransport};
