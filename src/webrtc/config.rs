//! Peer and track configuration.

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::media::frame::VideoCodec;

/// Clock rate for video RTP timestamps (RFC 6184 / RFC 7798)
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Opus clock rate
pub const OPUS_CLOCK_RATE: u32 = 48_000;

/// Stream id shared by the video and audio tracks of a session
pub const STREAM_ID: &str = "hdmi-capture";

/// Configuration applied to every peer session at construction
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Video track codec; must match what the producer emits
    pub video_codec: VideoCodec,
    /// Transport-level cap advertised on the video track, in kbps
    pub max_bitrate_kbps: Option<u32>,
    /// ICE servers; empty for LAN-only operation
    pub ice_servers: Vec<RTCIceServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            max_bitrate_kbps: None,
            ice_servers: vec![],
        }
    }
}

/// RTP codec capability for the configured video codec.
pub fn video_capability(codec: VideoCodec, max_bitrate_kbps: Option<u32>) -> RTCRtpCodecCapability {
    let mut sdp_fmtp_line = match codec {
        VideoCodec::H264 => {
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f".to_string()
        }
        // Main profile, matching what browsers offer for H.265
        VideoCodec::Hevc => "level-id=180;profile-id=1;tier-flag=0;tx-mode=SRST".to_string(),
    };
    if let Some(kbps) = max_bitrate_kbps {
        sdp_fmtp_line.push_str(&format!(";x-google-max-bitrate={kbps}"));
    }

    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line,
        rtcp_feedback: vec![],
    }
}

/// RTP codec capability for the Opus audio track.
pub fn audio_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: OPUS_CLOCK_RATE,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_capability_h264() {
        let cap = video_capability(VideoCodec::H264, None);
        assert_eq!(cap.mime_type, "video/H264");
        assert_eq!(cap.clock_rate, VIDEO_CLOCK_RATE);
        assert!(cap.sdp_fmtp_line.contains("packetization-mode=1"));
        assert!(!cap.sdp_fmtp_line.contains("x-google-max-bitrate"));
    }

    #[test]
    fn test_video_capability_bitrate_cap() {
        let cap = video_capability(VideoCodec::Hevc, Some(8000));
        assert_eq!(cap.mime_type, "video/H265");
        assert!(cap.sdp_fmtp_line.ends_with("x-google-max-bitrate=8000"));
    }

    #[test]
    fn test_audio_capability_is_stereo_opus() {
        let cap = audio_capability();
        assert_eq!(cap.mime_type, "audio/opus");
        assert_eq!(cap.clock_rate, 48_000);
        assert_eq!(cap.channels, 2);
    }
}
