//! WHIP handshake driver.
//!
//! Flow:
//! 1. `initialize()` builds the peer connection factory
//! 2. `create_connection()` creates the peer connection
//! 3. `add_track()` opens the capture device and adds the outbound video track
//! 4. `create_offer()` queues offer creation on the signaling thread
//! 5. On the signaling thread: set local description, apply encoding limits,
//!    restrict codecs, POST the offer, apply the answer
//!
//! Step 5 runs as one task, so later signaling events wait for the POST.

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{SessionConfig, SessionError, SessionState, STREAM_ID};
use crate::capture::{self, CaptureConfig, CaptureSource};
use crate::peer::{
    EngineError, IceCandidateInfo, MediaEngineAdapter, PeerConnectionConfig,
    PeerConnectionObserver, RemoteTrackInfo,
};
use crate::sdp::{force_codecs, SessionDescription};
use crate::signaling::{SignalingTransport, SDP_CONTENT_TYPE};

#[derive(Default)]
struct SessionData {
    /// Outbound offer as POSTed
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
    resource_url: Option<String>,
    error: Option<SessionError>,
    ice_candidates: Vec<IceCandidateInfo>,
}

/// One WHIP negotiation attempt. Not reusable: once `RemoteApplied` or
/// `Failed`, build a new session to try again.
pub struct WhipSession {
    config: SessionConfig,
    engine: Arc<dyn MediaEngineAdapter>,
    transport: Arc<dyn SignalingTransport>,
    state: watch::Sender<SessionState>,
    data: Mutex<SessionData>,
}

impl WhipSession {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn MediaEngineAdapter>,
        transport: Arc<dyn SignalingTransport>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Idle);
        Arc::new(Self {
            config,
            engine,
            transport,
            state,
            data: Mutex::new(SessionData::default()),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Offer text as sent to the endpoint
    pub fn local_sdp(&self) -> Option<String> {
        self.data.lock().local_sdp.clone()
    }

    /// Answer text applied as remote description
    pub fn remote_sdp(&self) -> Option<String> {
        self.data.lock().remote_sdp.clone()
    }

    /// WHIP resource created by the endpoint (`Location` header)
    pub fn resource_url(&self) -> Option<String> {
        self.data.lock().resource_url.clone()
    }

    /// Error that moved the session to `Failed`
    pub fn error(&self) -> Option<SessionError> {
        self.data.lock().error.clone()
    }

    /// Local ICE candidates reported so far
    pub fn ice_candidates(&self) -> Vec<IceCandidateInfo> {
        self.data.lock().ice_candidates.clone()
    }

    fn require(&self, expected: SessionState) -> Result<(), SessionError> {
        let found = self.state();
        if found == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { expected, found })
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        let mut found = from;
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                found = *state;
                false
            }
        });

        if changed {
            debug!("Session state: {} -> {}", from, to);
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected: from,
                found,
            })
        }
    }

    /// Record `error` and move to `Failed`. The first error wins.
    fn fail(&self, error: SessionError) -> SessionError {
        error!("WHIP session failed: {}", error);
        self.data.lock().error.get_or_insert_with(|| error.clone());
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = SessionState::Failed;
                true
            }
        });
        error
    }

    /// Build the peer connection factory. Failure leaves the session idle.
    pub fn initialize(&self) -> Result<(), SessionError> {
        self.require(SessionState::Idle)?;

        if let Err(e) = self.engine.initialize() {
            error!("Failed to create peer connection factory: {}", e);
            return Err(SessionError::ConnectionCreation(e));
        }
        self.transition(SessionState::Idle, SessionState::FactoryReady)
    }

    /// Create the peer connection. Failure leaves the session in
    /// `FactoryReady`; no retry is attempted.
    pub async fn create_connection(self: &Arc<Self>, enable_dtls: bool) -> Result<(), SessionError> {
        self.require(SessionState::FactoryReady)?;

        let observer: Arc<dyn PeerConnectionObserver> = self.clone();
        let config = PeerConnectionConfig {
            ice_servers: self.config.ice_servers.clone(),
            enable_dtls,
        };

        match self
            .engine
            .create_peer_connection(config, Arc::downgrade(&observer))
            .await
        {
            Ok(()) => {
                info!("Peer connection created");
                self.transition(SessionState::FactoryReady, SessionState::Connected)
            }
            Err(e) => {
                error!("Failed to create peer connection: {}", e);
                Err(SessionError::ConnectionCreation(e))
            }
        }
    }

    /// Open `/dev/video<device_index>` and register it as the outbound track.
    pub async fn add_track(
        &self,
        device_index: u8,
        capture_config: Option<CaptureConfig>,
    ) -> Result<(), SessionError> {
        self.require(SessionState::Connected)?;

        let path = capture::device_path(device_index);
        let source = capture::open_device(&path, capture_config.as_ref())
            .map_err(|e| self.fail(SessionError::Capture(e)))?;

        self.add_track_source(Arc::from(source)).await
    }

    /// Register an already opened capture source as the outbound track.
    pub async fn add_track_source(&self, source: Arc<dyn CaptureSource>) -> Result<(), SessionError> {
        self.require(SessionState::Connected)?;

        self.engine
            .add_video_track(source, STREAM_ID)
            .await
            .map_err(|e| self.fail(SessionError::Negotiation(e)))?;

        self.transition(SessionState::Connected, SessionState::TrackAdded)
    }

    /// Queue offer creation on the signaling thread and return immediately.
    ///
    /// The rest of the handshake runs there; follow it with
    /// [`Self::wait_for_local_description`] or [`Self::wait_for_completion`].
    pub fn create_offer(self: &Arc<Self>) -> Result<(), SessionError> {
        self.transition(SessionState::TrackAdded, SessionState::OfferRequested)?;
        info!("Creating offer");

        let session = self.clone();
        let task = Box::pin(async move {
            match session.engine.create_offer().await {
                Ok(desc) => {
                    // failures are recorded on the session
                    let _ = session.on_local_description_ready(desc).await;
                }
                Err(e) => session.on_negotiation_failed(e),
            }
        });

        self.engine
            .post(task)
            .map_err(|e| self.fail(SessionError::Negotiation(e)))
    }

    /// Offer creation completed. Runs the rest of the handshake.
    pub async fn on_local_description_ready(
        &self,
        desc: SessionDescription,
    ) -> Result<(), SessionError> {
        self.negotiate(desc).await.map_err(|e| self.fail(e))
    }

    /// Offer creation failed
    pub fn on_negotiation_failed(&self, error: EngineError) {
        self.fail(SessionError::Negotiation(error));
    }

    async fn negotiate(&self, desc: SessionDescription) -> Result<(), SessionError> {
        self.engine
            .set_local_description(desc.clone())
            .await
            .map_err(SessionError::Negotiation)?;
        self.transition(SessionState::OfferRequested, SessionState::LocalDescriptionSet)?;

        let senders = self.engine.senders().await;
        self.config
            .encoding_limits()
            .apply_to_senders(&senders)
            .await
            .map_err(SessionError::Negotiation)?;
        self.transition(SessionState::LocalDescriptionSet, SessionState::ParametersApplied)?;

        let local = match self.engine.local_description().await {
            Some(local) => local,
            None => {
                warn!("Engine has no local description, sending the offer as created");
                desc
            }
        };
        let sdp = match &self.config.allowed_codecs {
            Some(codecs) => {
                debug!("Restricting video codecs to {:?}", codecs);
                force_codecs(&local.sdp, codecs.as_slice())
            }
            None => local.sdp,
        };
        self.data.lock().local_sdp = Some(sdp.clone());
        self.transition(SessionState::ParametersApplied, SessionState::Filtered)?;
        info!("SDP generated");

        let response = self
            .transport
            .post(&self.config.endpoint, SDP_CONTENT_TYPE, &sdp)
            .await
            .map_err(SessionError::TransportIo)?;
        info!("SDP sent to {}: HTTP {}", self.config.endpoint, response.status);

        if !response.is_ok() {
            return Err(SessionError::Transport {
                status: response.status,
                body: response.body,
            });
        }
        self.transition(SessionState::Filtered, SessionState::Posted)?;

        for (name, value) in &response.headers {
            debug!("{}: {}", name, value);
        }
        debug!("Response body: {}", response.body);
        self.data.lock().resource_url = response.resource_url(&self.config.endpoint);

        let answer =
            SessionDescription::answer(response.body).map_err(SessionError::MalformedAnswer)?;
        self.engine
            .set_remote_description(answer.clone())
            .await
            .map_err(SessionError::Negotiation)?;
        self.data.lock().remote_sdp = Some(answer.sdp);
        self.transition(SessionState::Posted, SessionState::RemoteApplied)?;

        info!("Remote description set");
        Ok(())
    }

    /// Resolves with the outbound offer once it has been stored, or with the
    /// session error if negotiation fails first.
    pub async fn wait_for_local_description(&self) -> Result<String, SessionError> {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| s.has_local_description() || s.is_terminal())
            .await
            .map(|s| *s);

        match self.local_sdp() {
            Some(sdp) => Ok(sdp),
            None => Err(self.terminal_error()),
        }
    }

    /// Resolves once the session reaches `RemoteApplied` or `Failed`.
    pub async fn wait_for_completion(&self) -> Result<(), SessionError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| s.is_terminal())
            .await
            .map(|s| *s)
            .unwrap_or(SessionState::Failed);

        match state {
            SessionState::RemoteApplied => Ok(()),
            _ => Err(self.terminal_error()),
        }
    }

    fn terminal_error(&self) -> SessionError {
        let found = self.state();
        self.error().unwrap_or(SessionError::InvalidState {
            expected: SessionState::RemoteApplied,
            found,
        })
    }

    /// Ask the endpoint to delete the WHIP resource (best effort). The peer
    /// connection belongs to the caller and is left open.
    pub async fn disconnect(&self) {
        let resource = self.data.lock().resource_url.take();
        let Some(url) = resource else {
            debug!("No WHIP resource to delete");
            return;
        };

        match self.transport.delete(&url).await {
            Ok(response) if response.is_ok() => info!("Deleted WHIP resource {}", url),
            Ok(response) => warn!("DELETE {} returned HTTP {}", url, response.status),
            Err(e) => warn!("DELETE {} failed: {}", url, e),
        }
    }
}

impl PeerConnectionObserver for WhipSession {
    fn on_add_track(&self, track: RemoteTrackInfo) {
        info!("OnAddTrack {} ({}) in stream {}", track.id, track.kind, track.stream_id);
    }

    fn on_remove_track(&self, track: RemoteTrackInfo) {
        info!("OnRemoveTrack {} ({})", track.id, track.kind);
    }

    fn on_ice_candidate(&self, candidate: IceCandidateInfo) {
        info!(
            "OnIceCandidate {:?} {:?}",
            candidate.sdp_mid, candidate.sdp_mline_index
        );
        info!("Candidate: {}", candidate.candidate);
        self.data.lock().ice_candidates.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Weak;

    use async_trait::async_trait;

    use crate::capture::{CaptureFormat, FourCC};
    use crate::peer::{
        RtpEncodingParameters, RtpSendParameters, RtpSenderHandle, SignalingTask,
        SignalingThread,
    };
    use crate::sdp::tests::ANSWER;
    use crate::sdp::SdpType;
    use crate::signaling::{HttpResponse, TransportError};

    const ENDPOINT: &str = "http://localhost:8889/wadi/whip";

    const OFFER: &str = "v=0\r\n\
o=- 8472349 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:98 VP8/90000\r\n\
a=rtcp-fb:98 nack\r\n\
a=ssrc:1234 cname:wadi\r\n";

    struct FakeCapture {
        path: PathBuf,
    }

    impl CaptureSource for FakeCapture {
        fn device_path(&self) -> &Path {
            &self.path
        }

        fn name(&self) -> &str {
            "fake camera"
        }

        fn format(&self) -> CaptureFormat {
            CaptureFormat {
                width: 1280,
                height: 720,
                fourcc: FourCC(*b"I420"),
                fps: Some(30),
            }
        }
    }

    struct FakeSender {
        params: Mutex<RtpSendParameters>,
    }

    #[async_trait]
    impl RtpSenderHandle for FakeSender {
        async fn parameters(&self) -> Result<RtpSendParameters, EngineError> {
            Ok(self.params.lock().clone())
        }

        async fn set_parameters(&self, params: RtpSendParameters) -> Result<(), EngineError> {
            *self.params.lock() = params;
            Ok(())
        }
    }

    #[derive(Default)]
    struct EngineBehavior {
        fail_initialize: bool,
        fail_connection: bool,
        fail_offer: bool,
        fail_remote: bool,
        no_local_description: bool,
    }

    struct FakeEngine {
        signaling: SignalingThread,
        behavior: EngineBehavior,
        sender: Arc<FakeSender>,
        observer: Mutex<Option<Weak<dyn PeerConnectionObserver>>>,
        calls: Mutex<Vec<&'static str>>,
        local: Mutex<Option<SessionDescription>>,
        remote: Mutex<Option<SessionDescription>>,
    }

    impl FakeEngine {
        fn new(behavior: EngineBehavior) -> Arc<Self> {
            Arc::new(Self {
                signaling: SignalingThread::start("fake-signaling").unwrap(),
                behavior,
                sender: Arc::new(FakeSender {
                    params: Mutex::new(RtpSendParameters {
                        transaction_id: "t0".to_string(),
                        encodings: vec![RtpEncodingParameters {
                            rid: "q".to_string(),
                            ssrc: 1234,
                            payload_type: 96,
                            scale_resolution_down_by: Some(1.0),
                            ..Default::default()
                        }],
                    }),
                }),
                observer: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                local: Mutex::new(None),
                remote: Mutex::new(None),
            })
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }

        /// Deliver an ICE candidate the way a real engine would
        fn emit_candidate(&self, candidate: &str) {
            let observer = self.observer.lock().clone().unwrap();
            let info = IceCandidateInfo {
                candidate: candidate.to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            };
            self.signaling
                .post(async move {
                    if let Some(o) = observer.upgrade() {
                        o.on_ice_candidate(info);
                    }
                })
                .unwrap();
        }
    }

    #[async_trait]
    impl MediaEngineAdapter for FakeEngine {
        fn initialize(&self) -> Result<(), EngineError> {
            if self.behavior.fail_initialize {
                return Err(EngineError::WebRtc("no factory".to_string()));
            }
            Ok(())
        }

        async fn create_peer_connection(
            &self,
            _config: PeerConnectionConfig,
            observer: Weak<dyn PeerConnectionObserver>,
        ) -> Result<(), EngineError> {
            if self.behavior.fail_connection {
                return Err(EngineError::NotInitialized);
            }
            *self.observer.lock() = Some(observer);
            Ok(())
        }

        async fn add_video_track(
            &self,
            _source: Arc<dyn CaptureSource>,
            _stream_id: &str,
        ) -> Result<(), EngineError> {
            self.calls.lock().push("add_track");
            Ok(())
        }

        fn post(&self, task: SignalingTask) -> Result<(), EngineError> {
            self.signaling.post_boxed(task)
        }

        async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
            self.calls.lock().push("create_offer");
            if self.behavior.fail_offer {
                return Err(EngineError::WebRtc("offer failed".to_string()));
            }
            Ok(SessionDescription::new(SdpType::Offer, OFFER))
        }

        async fn set_local_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), EngineError> {
            self.calls.lock().push("set_local");
            *self.local.lock() = Some(desc);
            Ok(())
        }

        async fn local_description(&self) -> Option<SessionDescription> {
            self.calls.lock().push("local_description");
            if self.behavior.no_local_description {
                return None;
            }
            self.local.lock().clone()
        }

        async fn set_remote_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), EngineError> {
            self.calls.lock().push("set_remote");
            if self.behavior.fail_remote {
                return Err(EngineError::WebRtc("remote rejected".to_string()));
            }
            *self.remote.lock() = Some(desc);
            Ok(())
        }

        async fn senders(&self) -> Vec<Arc<dyn RtpSenderHandle>> {
            self.calls.lock().push("senders");
            vec![self.sender.clone() as Arc<dyn RtpSenderHandle>]
        }

        async fn close(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    enum Reply {
        Status(u16, &'static str),
        Unreachable,
    }

    struct FakeTransport {
        reply: Reply,
        posts: Mutex<Vec<(String, String, String)>>,
        deletes: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                posts: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SignalingTransport for FakeTransport {
        async fn post(
            &self,
            url: &str,
            content_type: &str,
            body: &str,
        ) -> Result<HttpResponse, TransportError> {
            self.posts
                .lock()
                .push((url.to_string(), content_type.to_string(), body.to_string()));
            match self.reply {
                Reply::Status(status, body) => Ok(HttpResponse {
                    status,
                    headers: vec![("Location".to_string(), "/wadi/whip/abc".to_string())],
                    body: body.to_string(),
                }),
                Reply::Unreachable => Err(TransportError::Request("connection refused".to_string())),
            }
        }

        async fn delete(&self, url: &str) -> Result<HttpResponse, TransportError> {
            self.deletes.lock().push(url.to_string());
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: String::new(),
            })
        }
    }

    async fn ready_session(
        config: SessionConfig,
        engine: &Arc<FakeEngine>,
        transport: &Arc<FakeTransport>,
    ) -> Arc<WhipSession> {
        let session = WhipSession::new(config, engine.clone(), transport.clone());
        session.initialize().unwrap();
        session.create_connection(true).await.unwrap();
        session
            .add_track_source(Arc::new(FakeCapture {
                path: PathBuf::from("/dev/video0"),
            }))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::TrackAdded);
        session
    }

    #[tokio::test]
    async fn test_successful_handshake_reaches_remote_applied() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let config = SessionConfig::new(ENDPOINT).with_allowed_codecs(["H264", "rtx"]);
        let session = ready_session(config, &engine, &transport).await;

        session.create_offer().unwrap();
        session.wait_for_completion().await.unwrap();

        assert_eq!(session.state(), SessionState::RemoteApplied);
        assert_eq!(session.error(), None);
        assert_eq!(session.remote_sdp().as_deref(), Some(ANSWER));
        assert_eq!(
            engine.remote.lock().as_ref().map(|d| d.sdp_type),
            Some(SdpType::Answer)
        );
        assert_eq!(
            session.resource_url().as_deref(),
            Some("http://localhost:8889/wadi/whip/abc")
        );
        assert_eq!(
            engine.calls(),
            vec![
                "add_track",
                "create_offer",
                "set_local",
                "senders",
                "local_description",
                "set_remote"
            ]
        );
    }

    #[tokio::test]
    async fn test_posted_offer_is_codec_filtered() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let config = SessionConfig::new(ENDPOINT).with_allowed_codecs(["H264", "rtx"]);
        let session = ready_session(config, &engine, &transport).await;

        session.create_offer().unwrap();
        let local = session.wait_for_local_description().await.unwrap();
        session.wait_for_completion().await.unwrap();

        let posts = transport.posts.lock().clone();
        assert_eq!(posts.len(), 1);
        let (url, content_type, body) = &posts[0];
        assert_eq!(url, ENDPOINT);
        assert_eq!(content_type, "application/sdp");
        assert_eq!(body, &local);
        assert!(body.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n"));
        assert!(!body.contains("VP8"));
        assert!(!body.contains("a=rtcp-fb:98"));

        // the engine keeps the unfiltered description
        assert_eq!(engine.local.lock().as_ref().unwrap().sdp, OFFER);
    }

    #[tokio::test]
    async fn test_no_allow_list_posts_offer_unchanged() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(200, ANSWER));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        assert_eq!(session.wait_for_local_description().await.unwrap(), OFFER);
        session.wait_for_completion().await.unwrap();
        assert_eq!(transport.posts.lock()[0].2, OFFER);
    }

    #[tokio::test]
    async fn test_missing_engine_description_falls_back_to_created_offer() {
        let engine = FakeEngine::new(EngineBehavior {
            no_local_description: true,
            ..Default::default()
        });
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let config = SessionConfig::new(ENDPOINT).with_allowed_codecs(["H264", "rtx"]);
        let session = ready_session(config, &engine, &transport).await;

        session.create_offer().unwrap();
        session.wait_for_completion().await.unwrap();

        // the created offer is still filtered before it is sent
        let body = transport.posts.lock()[0].2.clone();
        assert!(body.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n"));
        assert_eq!(session.local_sdp(), Some(body));
        assert!(engine.calls().contains(&"local_description"));
    }

    #[tokio::test]
    async fn test_http_error_fails_without_parsing_answer() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(500, "internal error"));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        let err = session.wait_for_completion().await.unwrap_err();

        assert_eq!(
            err,
            SessionError::Transport {
                status: 500,
                body: "internal error".to_string()
            }
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!engine.calls().contains(&"set_remote"));
        assert_eq!(session.remote_sdp(), None);
        assert_eq!(session.resource_url(), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Unreachable);
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        let err = session.wait_for_completion().await.unwrap_err();
        assert!(matches!(err, SessionError::TransportIo(_)));
        assert!(!engine.calls().contains(&"set_remote"));
    }

    #[tokio::test]
    async fn test_encoding_limits_applied_before_post() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let config = SessionConfig::new(ENDPOINT)
            .with_max_bitrate(2_000_000)
            .with_max_framerate(24);
        let session = ready_session(config, &engine, &transport).await;
        let before = engine.sender.params.lock().clone();

        session.create_offer().unwrap();
        session.wait_for_completion().await.unwrap();

        let after = engine.sender.params.lock().clone();
        assert_eq!(after.transaction_id, before.transaction_id);
        assert_eq!(after.encodings.len(), 1);
        let (a, b) = (&after.encodings[0], &before.encodings[0]);
        assert_eq!(a.max_bitrate, Some(2_000_000));
        assert_eq!(a.max_framerate, Some(24.0));
        assert_eq!(a.rid, b.rid);
        assert_eq!(a.ssrc, b.ssrc);
        assert_eq!(a.payload_type, b.payload_type);
        assert_eq!(a.active, b.active);
        assert_eq!(a.scale_resolution_down_by, b.scale_resolution_down_by);
    }

    #[tokio::test]
    async fn test_offer_failure_is_fatal() {
        let engine = FakeEngine::new(EngineBehavior {
            fail_offer: true,
            ..Default::default()
        });
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        let err = session.wait_for_local_description().await.unwrap_err();

        assert!(matches!(err, SessionError::Negotiation(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(transport.posts.lock().is_empty());
        assert_eq!(session.wait_for_completion().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_malformed_answer_is_fatal() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, "hello world"));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        let err = session.wait_for_completion().await.unwrap_err();

        assert!(matches!(err, SessionError::MalformedAnswer(_)));
        assert!(!engine.calls().contains(&"set_remote"));
    }

    #[tokio::test]
    async fn test_rejected_answer_is_fatal() {
        let engine = FakeEngine::new(EngineBehavior {
            fail_remote: true,
            ..Default::default()
        });
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        let err = session.wait_for_completion().await.unwrap_err();

        assert_eq!(
            err,
            SessionError::Negotiation(EngineError::WebRtc("remote rejected".to_string()))
        );
        assert_eq!(session.remote_sdp(), None);
        // the offer was still sent
        assert_eq!(transport.posts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_is_reported_not_fatal() {
        let engine = FakeEngine::new(EngineBehavior {
            fail_initialize: true,
            ..Default::default()
        });
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = WhipSession::new(SessionConfig::new(ENDPOINT), engine, transport);

        let err = session.initialize().unwrap_err();
        assert!(matches!(err, SessionError::ConnectionCreation(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.error(), None);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported_not_fatal() {
        let engine = FakeEngine::new(EngineBehavior {
            fail_connection: true,
            ..Default::default()
        });
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = WhipSession::new(SessionConfig::new(ENDPOINT), engine, transport);

        session.initialize().unwrap();
        let err = session.create_connection(true).await.unwrap_err();
        assert_eq!(err, SessionError::ConnectionCreation(EngineError::NotInitialized));
        assert_eq!(session.state(), SessionState::FactoryReady);
    }

    #[tokio::test]
    async fn test_out_of_order_calls_rejected() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = WhipSession::new(SessionConfig::new(ENDPOINT), engine.clone(), transport);

        assert_eq!(
            session.create_offer(),
            Err(SessionError::InvalidState {
                expected: SessionState::TrackAdded,
                found: SessionState::Idle
            })
        );
        assert!(session.create_connection(true).await.is_err());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_offer_rejected() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        assert!(matches!(
            session.create_offer(),
            Err(SessionError::InvalidState { .. })
        ));
        session.wait_for_completion().await.unwrap();
        assert_eq!(transport.posts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_ice_candidates_recorded_without_state_change() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        engine.emit_candidate("candidate:1 1 udp 2130706431 192.168.1.10 50000 typ host");
        session.create_offer().unwrap();
        engine.emit_candidate("candidate:2 1 udp 1694498815 203.0.113.7 50000 typ srflx");
        session.wait_for_completion().await.unwrap();

        // queued behind the handshake task
        let done = Arc::new(tokio::sync::Notify::new());
        let notify = done.clone();
        engine
            .signaling
            .post(async move { notify.notify_one() })
            .unwrap();
        done.notified().await;

        let candidates = session.ice_candidates();
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].candidate.starts_with("candidate:1"));
        assert!(candidates[1].candidate.starts_with("candidate:2"));
        assert_eq!(session.state(), SessionState::RemoteApplied);
    }

    #[tokio::test]
    async fn test_disconnect_deletes_resource_once() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = ready_session(SessionConfig::new(ENDPOINT), &engine, &transport).await;

        session.create_offer().unwrap();
        session.wait_for_completion().await.unwrap();
        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(
            *transport.deletes.lock(),
            vec!["http://localhost:8889/wadi/whip/abc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_capture_device_is_fatal() {
        let engine = FakeEngine::new(EngineBehavior::default());
        let transport = FakeTransport::new(Reply::Status(201, ANSWER));
        let session = WhipSession::new(SessionConfig::new(ENDPOINT), engine, transport);
        session.initialize().unwrap();
        session.create_connection(true).await.unwrap();

        // no test machine has 255 video devices
        let err = session.add_track(255, None).await.unwrap_err();
        assert!(matches!(err, SessionError::Capture(_)));
        assert_eq!(session.state(), SessionState::Failed);
    }
}
