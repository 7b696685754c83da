//! Signaling handlers.
//!
//! Stateless apart from delegating to the peer manager; every error is
//! surfaced to the caller with the status-code discipline of the error
//! module.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::error::{GatewayError, Result};
use crate::media::stats::format_uptime;
use crate::state::AppState;
use crate::webrtc::signaling::{
    AnswerResponse, CandidateAck, CandidateBatch, CandidateRequest, OfferRequest,
};

/// Header carrying the session identifier minted on offer
pub const PEER_ID_HEADER: &str = "x-peer-id";

/// Offers larger than this are rejected outright
const MAX_SDP_BYTES: usize = 256 * 1024;

fn peer_id_from_headers(headers: &HeaderMap) -> Result<String> {
    headers
        .get(PEER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::BadRequest("missing X-Peer-ID header".into()))
}

/// `POST /webrtc/offer`: create a peer session and answer the offer.
///
/// The minted peer id is returned in the `X-Peer-ID` response header.
pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OfferRequest>,
) -> Result<impl IntoResponse> {
    if !req.kind.eq_ignore_ascii_case("offer") {
        return Err(GatewayError::InvalidOffer(format!(
            "unexpected session description type '{}'",
            req.kind
        )));
    }
    if req.sdp.trim().is_empty() {
        return Err(GatewayError::InvalidOffer("empty SDP".into()));
    }
    if req.sdp.len() > MAX_SDP_BYTES {
        return Err(GatewayError::InvalidOffer("SDP exceeds size cap".into()));
    }

    let (peer_id, answer) = state.peers.create_peer(req.sdp).await?;
    let header_value = HeaderValue::from_str(&peer_id)
        .map_err(|_| GatewayError::Internal("peer id is not header-safe".into()))?;

    Ok((
        [(HeaderName::from_static(PEER_ID_HEADER), header_value)],
        Json(AnswerResponse::answer(answer)),
    ))
}

/// `POST /webrtc/candidate`: trickle one remote candidate to the peer
/// named by the `X-Peer-ID` header.
pub async fn webrtc_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CandidateRequest>,
) -> Result<Json<CandidateAck>> {
    let peer_id = peer_id_from_headers(&headers)?;

    // An empty candidate string is the end-of-candidates marker.
    if req.candidate.trim().is_empty() {
        return Ok(Json(CandidateAck {
            success: true,
            peer_id,
        }));
    }

    let init = RTCIceCandidateInit {
        candidate: req.candidate,
        sdp_mid: req.sdp_mid,
        sdp_mline_index: req.sdp_mline_index,
        username_fragment: None,
    };
    state.peers.add_remote_candidate(&peer_id, init).await?;

    Ok(Json(CandidateAck {
        success: true,
        peer_id,
    }))
}

/// `GET /webrtc/candidates`: local candidates gathered since the last
/// poll, for viewers that poll instead of reading the answer SDP.
pub async fn webrtc_candidates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CandidateBatch>> {
    let peer_id = peer_id_from_headers(&headers)?;
    let candidates = state.peers.drain_local_candidates(&peer_id).await?;
    Ok(Json(CandidateBatch { candidates }))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub peers: usize,
    pub uptime: String,
    pub producer_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamInfo>,
}

/// Stream summary included once the producer has announced metadata
#[derive(Serialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub fps: u32,
}

/// `GET /webrtc/health`
pub async fn webrtc_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stream = state.metadata.borrow().clone().map(|m| StreamInfo {
        width: m.video_width,
        height: m.video_height,
        codec: m.video_codec,
        fps: m.video_fps,
    });

    Json(HealthResponse {
        status: "ok",
        peers: state.peers.peer_count().await,
        uptime: format_uptime(state.stats.uptime()),
        producer_connected: state.stats.producer_connected(),
        stream,
    })
}
