//! One viewer peer session.
//!
//! Wraps a single `RTCPeerConnection` with the gateway's own state
//! machine, a remote-candidate queue that preserves receipt order across
//! the offer/answer handshake, and a bounded ring of locally gathered
//! candidates for polling clients.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};

use super::config::{video_capability, PeerConfig};
use super::signaling::IceCandidate;
use super::track::{AudioTrackWriter, VideoTrackWriter};
use crate::error::{GatewayError, Result};
use crate::media::frame::VideoCodec;

/// Bounded wait for ICE gathering before the answer is returned; LAN host
/// candidates are collected well inside this.
const ICE_GATHER_TIMEOUT: Duration = Duration::from_millis(2500);

/// Local candidates retained for polling clients
const LOCAL_CANDIDATE_RING: usize = 64;

/// Callback invoked for every locally gathered candidate
pub type LocalCandidateCallback = Arc<dyn Fn(&str, IceCandidate) + Send + Sync>;

/// Application-level session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Offered,
    Answered,
    Connected,
    Failed,
    Closed,
}

impl PeerState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }

    /// Track writes are permitted in these states.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            PeerState::Offered | PeerState::Answered | PeerState::Connected
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Offered => "offered",
            PeerState::Answered => "answered",
            PeerState::Connected => "connected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Transition rule: terminal states are sticky, repeated states are
/// no-ops (ICE oscillations after the first Connected stay invisible).
fn next_state(current: PeerState, target: PeerState) -> Option<PeerState> {
    if current.is_terminal() || current == target {
        return None;
    }
    Some(target)
}

/// Outcome of submitting a remote candidate
#[derive(Debug)]
enum CandidateSubmission {
    /// Remote description is applied; pass the candidate to the transport
    Apply(RTCIceCandidateInit),
    /// Held until the remote description lands
    Queued,
    /// Already seen; idempotently ignored
    Duplicate,
}

/// Remote candidates submitted before the remote description is set are
/// held here in receipt order and drained once it lands.
struct CandidateQueue {
    ready: bool,
    pending: VecDeque<RTCIceCandidateInit>,
    seen: HashSet<String>,
}

impl CandidateQueue {
    fn new() -> Self {
        Self {
            ready: false,
            pending: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn submit(&mut self, init: RTCIceCandidateInit) -> CandidateSubmission {
        if !self.seen.insert(init.candidate.clone()) {
            return CandidateSubmission::Duplicate;
        }
        if self.ready {
            CandidateSubmission::Apply(init)
        } else {
            self.pending.push_back(init);
            CandidateSubmission::Queued
        }
    }

    /// Mark the remote description applied and hand back the queued
    /// candidates in receipt order.
    fn begin_drain(&mut self) -> Vec<RTCIceCandidateInit> {
        self.ready = true;
        self.pending.drain(..).collect()
    }
}

/// Last-N ring of locally gathered candidates
struct LocalCandidateRing {
    ring: VecDeque<IceCandidate>,
}

impl LocalCandidateRing {
    fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(LOCAL_CANDIDATE_RING),
        }
    }

    fn push(&mut self, candidate: IceCandidate) {
        if self.ring.len() == LOCAL_CANDIDATE_RING {
            self.ring.pop_front();
        }
        self.ring.push_back(candidate);
    }

    fn drain(&mut self) -> Vec<IceCandidate> {
        self.ring.drain(..).collect()
    }
}

/// One viewer session: transport, tracks and signaling state
pub struct PeerSession {
    pub peer_id: String,
    pc: Arc<RTCPeerConnection>,
    video: VideoTrackWriter,
    audio: AudioTrackWriter,
    state_tx: Arc<watch::Sender<PeerState>>,
    state_rx: watch::Receiver<PeerState>,
    /// Held across transport calls so candidates apply in receipt order
    remote_candidates: Mutex<CandidateQueue>,
    local_candidates: Arc<std::sync::Mutex<LocalCandidateRing>>,
    pub created_at: Instant,
}

impl PeerSession {
    pub async fn new(
        config: &PeerConfig,
        peer_id: String,
        on_local_candidate: Option<LocalCandidateCallback>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        // H.265 is not part of the default codec set; register it manually
        // (RFC 7798), matching the payload types browsers offer.
        if config.video_codec == VideoCodec::Hevc {
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: video_capability(VideoCodec::Hevc, config.max_bitrate_kbps),
                        payload_type: 49,
                        ..Default::default()
                    },
                    RTPCodecType::Video,
                )
                .map_err(|e| GatewayError::Transport(format!("register H.265 codec: {e}")))?;
        }

        media_engine
            .register_default_codecs()
            .map_err(|e| GatewayError::Transport(format!("register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| GatewayError::Transport(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| GatewayError::Transport(format!("create peer connection: {e}")))?,
        );

        let video = VideoTrackWriter::new(&peer_id, config);
        let audio = AudioTrackWriter::new(&peer_id);

        pc.add_track(video.as_track_local())
            .await
            .map_err(|e| GatewayError::Transport(format!("add video track: {e}")))?;
        pc.add_track(audio.as_track_local())
            .await
            .map_err(|e| GatewayError::Transport(format!("add audio track: {e}")))?;

        let (state_tx, state_rx) = watch::channel(PeerState::New);

        let session = Self {
            peer_id,
            pc,
            video,
            audio,
            state_tx: Arc::new(state_tx),
            state_rx,
            remote_candidates: Mutex::new(CandidateQueue::new()),
            local_candidates: Arc::new(std::sync::Mutex::new(LocalCandidateRing::new())),
            created_at: Instant::now(),
        };
        session.register_handlers(on_local_candidate);

        Ok(session)
    }

    fn register_handlers(&self, on_local_candidate: Option<LocalCandidateCallback>) {
        // First connected-or-completed ICE report moves the session to
        // Connected; later oscillations are absorbed by the transition rule.
        let state_tx = self.state_tx.clone();
        let peer_id = self.peer_id.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |ice_state: RTCIceConnectionState| {
                let state_tx = state_tx.clone();
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    if matches!(
                        ice_state,
                        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
                    ) && Self::transition(&state_tx, PeerState::Connected)
                    {
                        debug!("peer {} reached connected (ice: {:?})", peer_id, ice_state);
                    }
                })
            }));

        let state_tx = self.state_tx.clone();
        let peer_id = self.peer_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |pc_state: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    match pc_state {
                        RTCPeerConnectionState::Failed => {
                            if Self::transition(&state_tx, PeerState::Failed) {
                                warn!("peer {} transport failed", peer_id);
                            }
                        }
                        RTCPeerConnectionState::Closed => {
                            Self::transition(&state_tx, PeerState::Closed);
                        }
                        other => {
                            debug!("peer {} transport state: {:?}", peer_id, other);
                        }
                    }
                })
            }));

        let ring = self.local_candidates.clone();
        let peer_id = self.peer_id.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let ring = ring.clone();
                let peer_id = peer_id.clone();
                let callback = on_local_candidate.clone();
                Box::pin(async move {
                    let Some(c) = candidate else { return };
                    let Ok(json) = c.to_json() else {
                        warn!("peer {} produced an unserializable candidate", peer_id);
                        return;
                    };
                    let candidate = IceCandidate {
                        candidate: json.candidate,
                        sdp_mid: json.sdp_mid,
                        sdp_mline_index: json.sdp_mline_index,
                        username_fragment: json.username_fragment,
                    };
                    debug!("peer {} local candidate: {}", peer_id, candidate.candidate);
                    ring.lock().expect("candidate ring poisoned").push(candidate.clone());
                    if let Some(callback) = callback {
                        callback(&peer_id, candidate);
                    }
                })
            }));
    }

    fn transition(state_tx: &watch::Sender<PeerState>, target: PeerState) -> bool {
        let mut applied = false;
        state_tx.send_if_modified(|current| match next_state(*current, target) {
            Some(next) => {
                *current = next;
                applied = true;
                true
            }
            None => false,
        });
        applied
    }

    /// Apply a viewer offer and produce the answer SDP.
    ///
    /// Queued remote candidates are drained in receipt order as soon as the
    /// remote description lands. The returned SDP is the local description
    /// after a bounded gathering wait, so host candidates ride along for
    /// viewers that never poll.
    pub async fn handle_offer(&self, offer_sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| GatewayError::InvalidOffer(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| GatewayError::InvalidOffer(e.to_string()))?;
        Self::transition(&self.state_tx, PeerState::Offered);

        {
            let mut queue = self.remote_candidates.lock().await;
            for init in queue.begin_drain() {
                if let Err(e) = self.pc.add_ice_candidate(init).await {
                    warn!("peer {} queued candidate rejected: {}", self.peer_id, e);
                }
            }
        }

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| GatewayError::Transport(format!("create answer: {e}")))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| GatewayError::Transport(format!("set local description: {e}")))?;
        Self::transition(&self.state_tx, PeerState::Answered);

        if tokio::time::timeout(ICE_GATHER_TIMEOUT, gather_complete.recv())
            .await
            .is_err()
        {
            debug!(
                "peer {} still gathering after {:?}, answering with partial candidates",
                self.peer_id, ICE_GATHER_TIMEOUT
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| GatewayError::Transport("local description missing".into()))?;
        Ok(local.sdp)
    }

    /// Submit a remote candidate: queued before the remote description is
    /// applied, applied immediately after, duplicates ignored.
    pub async fn add_remote_candidate(&self, init: RTCIceCandidateInit) -> Result<()> {
        let mut queue = self.remote_candidates.lock().await;
        match queue.submit(init) {
            CandidateSubmission::Duplicate => {
                debug!("peer {} duplicate candidate ignored", self.peer_id);
                Ok(())
            }
            CandidateSubmission::Queued => {
                debug!("peer {} candidate queued before remote description", self.peer_id);
                Ok(())
            }
            CandidateSubmission::Apply(init) => self
                .pc
                .add_ice_candidate(init)
                .await
                .map_err(|e| GatewayError::BadRequest(format!("candidate rejected: {e}"))),
        }
    }

    /// Everything gathered since the last poll (last 64 retained).
    pub fn drain_local_candidates(&self) -> Vec<IceCandidate> {
        self.local_candidates
            .lock()
            .expect("candidate ring poisoned")
            .drain()
    }

    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<PeerState> {
        self.state_rx.clone()
    }

    pub fn is_writable(&self) -> bool {
        self.state().is_writable()
    }

    /// Write one video sample; a no-op outside writable states.
    pub async fn write_video(&self, payload: Bytes, duration: Duration) -> Result<()> {
        if !self.is_writable() {
            return Ok(());
        }
        self.video.write(payload, duration).await
    }

    /// Write one audio sample; a no-op outside writable states.
    pub async fn write_audio(&self, payload: Bytes, duration: Duration) -> Result<()> {
        if !self.is_writable() {
            return Ok(());
        }
        self.audio.write(payload, duration).await
    }

    /// Close the session. Terminal: no further writes succeed.
    pub async fn close(&self) -> Result<()> {
        Self::transition(&self.state_tx, PeerState::Closed);
        self.pc
            .close()
            .await
            .map_err(|e| GatewayError::Transport(format!("close peer connection: {e}")))?;
        Ok(())
    }
}
