//! webrtc-rs implementation of [`MediaEngineAdapter`].
//!
//! Wraps RTCPeerConnection and forwards its events to the observer on the
//! engine's signaling thread.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::parameters::{RtpEncodingParameters, RtpSendParameters};
use super::signaling_thread::{SignalingTask, SignalingThread};
use super::{
    EngineError, IceCandidateInfo, IceConnectionState, IceGatheringState, MediaEngineAdapter,
    PeerConnectionConfig, PeerConnectionObserver, RemoteTrackInfo, RtpSenderHandle,
    SignalingState,
};
use crate::capture::CaptureSource;
use crate::sdp::{SdpType, SessionDescription};

/// Track id of the outbound video track
pub const VIDEO_TRACK_ID: &str = "video_label";

/// How long [`WebRtcEngine::local_description`] waits for ICE gathering
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Dispatches observer calls onto the signaling thread
#[derive(Clone)]
struct EventForwarder {
    queue: Arc<SignalingThread>,
    observer: Weak<dyn PeerConnectionObserver>,
}

impl EventForwarder {
    fn forward<F>(&self, event: F)
    where
        F: FnOnce(&dyn PeerConnectionObserver) + Send + 'static,
    {
        let observer = self.observer.clone();
        let posted = self.queue.post(async move {
            if let Some(observer) = observer.upgrade() {
                event(observer.as_ref());
            }
        });
        if posted.is_err() {
            debug!("Dropping peer connection event, signaling thread stopped");
        }
    }
}

/// Outbound video track and the capture device backing it
pub struct VideoTrack {
    pub track: Arc<TrackLocalStaticSample>,
    pub source: Arc<dyn CaptureSource>,
    pub sender: Arc<RTCRtpSender>,
}

/// webrtc-rs backed media engine
pub struct WebRtcEngine {
    signaling: Arc<SignalingThread>,
    api: Mutex<Option<Arc<API>>>,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    video_track: Mutex<Option<Arc<VideoTrack>>>,
    senders: Mutex<Vec<Arc<WebRtcSender>>>,
    ice_complete: Arc<Notify>,
}

impl WebRtcEngine {
    /// Create the engine and start its signaling thread.
    pub fn new() -> Result<Self, EngineError> {
        let signaling = SignalingThread::start("wadi-signaling")
            .map_err(|e| EngineError::WebRtc(format!("failed to start signaling thread: {}", e)))?;

        Ok(Self {
            signaling: Arc::new(signaling),
            api: Mutex::new(None),
            peer_connection: Mutex::new(None),
            video_track: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
            ice_complete: Arc::new(Notify::new()),
        })
    }

    /// Outbound video track, for the encoder feeding it samples
    pub fn video_track(&self) -> Option<Arc<VideoTrack>> {
        self.video_track.lock().clone()
    }

    /// Encoding parameters committed through [`RtpSenderHandle::set_parameters`].
    ///
    /// webrtc-rs sends whatever samples it is given, so `max_bitrate` and
    /// `max_framerate` here are only enforced if the encoder feeding
    /// [`Self::video_track`] reads them and rate-limits its output.
    pub fn committed_parameters(&self) -> Vec<RtpSendParameters> {
        self.senders
            .lock()
            .iter()
            .filter_map(|s| s.committed.lock().clone())
            .collect()
    }

    fn api(&self) -> Result<Arc<API>, EngineError> {
        self.api.lock().clone().ok_or(EngineError::NotInitialized)
    }

    fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, EngineError> {
        self.peer_connection
            .lock()
            .clone()
            .ok_or(EngineError::NoPeerConnection)
    }

    fn register_handlers(pc: &RTCPeerConnection, events: EventForwarder, ice_complete: Arc<Notify>) {
        let ev = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let info = IceCandidateInfo {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        };
                        ev.forward(move |o| o.on_ice_candidate(info));
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
            let state = match s {
                RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
                RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
                RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
                RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
                RTCSignalingState::Closed => SignalingState::Closed,
                _ => SignalingState::Stable,
            };
            ev.forward(move |o| o.on_signaling_change(state));
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let label = channel.label().to_string();
            ev.forward(move |o| o.on_data_channel(&label));
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_negotiation_needed(Box::new(move || {
            ev.forward(|o| o.on_renegotiation_needed());
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let state = match s {
                RTCIceConnectionState::Checking => IceConnectionState::Checking,
                RTCIceConnectionState::Connected => IceConnectionState::Connected,
                RTCIceConnectionState::Completed => IceConnectionState::Completed,
                RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
                RTCIceConnectionState::Failed => IceConnectionState::Failed,
                RTCIceConnectionState::Closed => IceConnectionState::Closed,
                _ => IceConnectionState::New,
            };
            let receiving = matches!(
                state,
                IceConnectionState::Connected | IceConnectionState::Completed
            );
            ev.forward(move |o| {
                o.on_ice_connection_change(state);
                o.on_ice_connection_receiving_change(receiving);
            });
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
            let state = match s {
                RTCIceGathererState::Gathering => IceGatheringState::Gathering,
                RTCIceGathererState::Complete => IceGatheringState::Complete,
                _ => IceGatheringState::New,
            };
            if state == IceGatheringState::Complete {
                ice_complete.notify_one();
            }
            ev.forward(move |o| o.on_ice_gathering_change(state));
            Box::pin(async {})
        }));

        let ev = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let info = RemoteTrackInfo {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind: track.kind().to_string(),
                };
                ev.forward(move |o| o.on_add_track(info));
                Box::pin(async {})
            },
        ));
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::PrAnswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Rollback => {
            return Err(EngineError::WebRtc("rollback is not supported".to_string()))
        }
    };
    result.map_err(EngineError::from)
}

fn from_rtc_description(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Pranswer => SdpType::PrAnswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription::new(sdp_type, desc.sdp)
}

#[async_trait]
impl MediaEngineAdapter for WebRtcEngine {
    fn initialize(&self) -> Result<(), EngineError> {
        // Create media engine and register the default codecs (VP8, VP9, H264, AV1 + rtx)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        // Create interceptor registry
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        // Build API
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        *self.api.lock() = Some(Arc::new(api));
        Ok(())
    }

    async fn create_peer_connection(
        &self,
        config: PeerConnectionConfig,
        observer: Weak<dyn PeerConnectionObserver>,
    ) -> Result<(), EngineError> {
        let api = self.api()?;

        if !config.enable_dtls {
            warn!("webrtc-rs always negotiates DTLS-SRTP, ignoring request to disable it");
        }

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|s| s.to_rtc_ice_server())
                .collect(),
            ..Default::default()
        };

        // peer connection internals run on the signaling thread's runtime
        let pc = self
            .signaling
            .invoke(async move { api.new_peer_connection(rtc_config).await })
            .await??;

        Self::register_handlers(
            &pc,
            EventForwarder {
                queue: self.signaling.clone(),
                observer,
            },
            self.ice_complete.clone(),
        );

        *self.peer_connection.lock() = Some(Arc::new(pc));
        Ok(())
    }

    async fn add_video_track(
        &self,
        source: Arc<dyn CaptureSource>,
        stream_id: &str,
    ) -> Result<(), EngineError> {
        let pc = self.peer_connection()?;

        // The hardware encoder produces H.264 access units
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_owned(),
                rtcp_feedback: vec![],
            },
            VIDEO_TRACK_ID.to_owned(),
            stream_id.to_owned(),
        ));

        let local: Arc<dyn TrackLocal + Send + Sync> = track.clone();
        let sender = self
            .signaling
            .invoke(async move { pc.add_track(local).await })
            .await??;

        let format = source.format();
        info!(
            "Added video track '{}' backed by {} ({}, {}x{} {} {:?})",
            VIDEO_TRACK_ID,
            source.name(),
            source.device_path().display(),
            format.width,
            format.height,
            format.fourcc,
            format.video_type()
        );

        self.senders.lock().push(Arc::new(WebRtcSender {
            sender: sender.clone(),
            committed: Mutex::new(None),
        }));
        *self.video_track.lock() = Some(Arc::new(VideoTrack {
            track,
            source,
            sender,
        }));
        Ok(())
    }

    fn post(&self, task: SignalingTask) -> Result<(), EngineError> {
        self.signaling.post_boxed(task)
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.peer_connection()?.create_offer(None).await?;
        Ok(from_rtc_description(offer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection()?.set_local_description(desc).await?;
        Ok(())
    }

    /// Waits for ICE gathering first so the offer carries the candidates.
    async fn local_description(&self) -> Option<SessionDescription> {
        let pc = self.peer_connection().ok()?;

        tokio::select! {
            _ = self.ice_complete.notified() => {}
            _ = tokio::time::sleep(ICE_GATHERING_TIMEOUT) => {
                warn!("ICE gathering not complete after {:?}, sending the candidates gathered so far", ICE_GATHERING_TIMEOUT);
            }
        }

        pc.local_description().await.map(from_rtc_description)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection()?.set_remote_description(desc).await?;
        Ok(())
    }

    async fn senders(&self) -> Vec<Arc<dyn RtpSenderHandle>> {
        self.senders
            .lock()
            .iter()
            .map(|s| s.clone() as Arc<dyn RtpSenderHandle>)
            .collect()
    }

    async fn close(&self) -> Result<(), EngineError> {
        let pc = self.peer_connection.lock().take();
        if let Some(pc) = pc {
            pc.close().await?;
        }
        Ok(())
    }
}

/// Sender handle; bitrate / framerate ceilings are kept here for the encoder
/// since webrtc-rs does not enforce them itself.
pub struct WebRtcSender {
    sender: Arc<RTCRtpSender>,
    committed: Mutex<Option<RtpSendParameters>>,
}

#[async_trait]
impl RtpSenderHandle for WebRtcSender {
    async fn parameters(&self) -> Result<RtpSendParameters, EngineError> {
        let current = self.sender.get_parameters().await;
        let committed = self.committed.lock().clone();

        let encodings = current
            .encodings
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let previous = committed.as_ref().and_then(|c| c.encodings.get(i));
                RtpEncodingParameters {
                    rid: e.rid.to_string(),
                    ssrc: e.ssrc,
                    payload_type: e.payload_type,
                    active: previous.map(|p| p.active).unwrap_or(true),
                    max_bitrate: previous.and_then(|p| p.max_bitrate),
                    max_framerate: previous.and_then(|p| p.max_framerate),
                    scale_resolution_down_by: previous.and_then(|p| p.scale_resolution_down_by),
                }
            })
            .collect();

        Ok(RtpSendParameters {
            transaction_id: committed.map(|c| c.transaction_id).unwrap_or_default(),
            encodings,
        })
    }

    async fn set_parameters(&self, params: RtpSendParameters) -> Result<(), EngineError> {
        let current = self.sender.get_parameters().await;
        if params.encodings.len() != current.encodings.len() {
            return Err(EngineError::InvalidParameters(format!(
                "expected {} encodings, got {}",
                current.encodings.len(),
                params.encodings.len()
            )));
        }
        if params
            .encodings
            .iter()
            .zip(&current.encodings)
            .any(|(p, c)| p.ssrc != c.ssrc)
        {
            return Err(EngineError::InvalidParameters(
                "encoding ssrc cannot be changed".to_string(),
            ));
        }

        debug!("Committed sender parameters: {:?}", params);
        *self.committed.lock() = Some(params);
        Ok(())
    }
}
