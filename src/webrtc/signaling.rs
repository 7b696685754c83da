//! Signaling request/response body types.

use serde::{Deserialize, Serialize};

/// SDP offer submitted by a viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// SDP answer returned to the viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AnswerResponse {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }
}

/// Trickle ICE candidate submitted by a viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRequest {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Acknowledgement for an accepted candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAck {
    pub success: bool,
    pub peer_id: String,
}

/// A locally gathered ICE candidate, shaped for the browser API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Local candidates accumulated since the viewer's last poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateBatch {
    pub candidates: Vec<IceCandidate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_request_type_field() {
        let req: OfferRequest =
            serde_json::from_str(r#"{"sdp":"v=0\r\n","type":"offer"}"#).unwrap();
        assert_eq!(req.kind, "offer");
        assert_eq!(req.sdp, "v=0\r\n");
    }

    #[test]
    fn test_answer_response_shape() {
        let json = serde_json::to_value(AnswerResponse::answer("v=0")).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0");
    }

    #[test]
    fn test_candidate_request_camel_case() {
        let req: CandidateRequest = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 UDP 2122252543 192.168.1.10 50000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(req.sdp_mid.as_deref(), Some("0"));
        assert_eq!(req.sdp_mline_index, Some(0));
    }

    #[test]
    fn test_candidate_request_optional_fields_default() {
        let req: CandidateRequest = serde_json::from_str(r#"{"candidate":"x"}"#).unwrap();
        assert!(req.sdp_mid.is_none());
        assert!(req.sdp_mline_index.is_none());
    }

    #[test]
    fn test_ice_candidate_skips_missing_ufrag() {
        let json = serde_json::to_value(IceCandidate {
            candidate: "x".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        })
        .unwrap();
        assert!(json.get("usernameFragment").is_none());
        assert!(json.get("sdpMid").is_some());
    }
}
