//! Media sample and stream-metadata value types.
//!
//! Samples carry payloads as [`Bytes`] so the fan-out path can hand the same
//! buffer to every peer session without copying.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Video codec carried on the producer wire and advertised on peer tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    /// MIME type used for SDP negotiation (H.265 per RFC 7798)
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::Hevc => "video/H265",
        }
    }
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self::H264
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::Hevc => write!(f, "hevc"),
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" => Ok(VideoCodec::H264),
            "hevc" | "h265" => Ok(VideoCodec::Hevc),
            other => Err(format!("unsupported video codec '{other}'")),
        }
    }
}

/// An encoded video frame received from the capture producer.
///
/// The payload is Annex-B NAL units; keyframes carry their parameter sets
/// (SPS/PPS, plus VPS for HEVC) ahead of the slice data and are forwarded
/// byte-identically.
#[derive(Debug, Clone)]
pub struct VideoSample {
    /// Presentation timestamp in nanoseconds
    pub pts: i64,
    /// Decode timestamp in nanoseconds
    pub dts: i64,
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
    pub codec: VideoCodec,
    pub payload: Bytes,
    pub received_at: Instant,
}

/// Interleaved 16-bit signed PCM audio received from the capture producer
#[derive(Debug, Clone)]
pub struct AudioSample {
    /// Presentation timestamp in nanoseconds
    pub pts: i64,
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_count: u32,
    pub payload: Bytes,
    pub received_at: Instant,
}

/// Stream configuration announced by the producer at connect time.
///
/// Arrives at most once per producer connection, before the first video
/// sample of that connection if it arrives at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub video_width: u32,
    pub video_height: u32,
    pub video_codec: String,
    pub video_fps: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parse() {
        assert_eq!("h264".parse::<VideoCodec>().unwrap(), VideoCodec::H264);
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::Hevc);
        assert_eq!("h265".parse::<VideoCodec>().unwrap(), VideoCodec::Hevc);
        assert!("vp9".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn test_codec_serde_lowercase() {
        assert_eq!(serde_json::to_string(&VideoCodec::H264).unwrap(), "\"h264\"");
        assert_eq!(serde_json::to_string(&VideoCodec::Hevc).unwrap(), "\"hevc\"");
        let codec: VideoCodec = serde_json::from_str("\"hevc\"").unwrap();
        assert_eq!(codec, VideoCodec::Hevc);
    }

    #[test]
    fn test_metadata_snake_case_fields() {
        let json = r#"{
            "video_width": 1920,
            "video_height": 1080,
            "video_codec": "h264",
            "video_fps": 60,
            "audio_sample_rate": 48000,
            "audio_channels": 2
        }"#;
        let meta: StreamMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.video_width, 1920);
        assert_eq!(meta.video_fps, 60);
        assert_eq!(meta.audio_channels, 2);
    }
}
