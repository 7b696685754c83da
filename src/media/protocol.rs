//! Producer IPC wire format.
//!
//! Every message is `[1 byte type][4 byte BE length N][N byte body]`, where
//! the body is a UTF-8 JSON header, optionally followed by a single `0x00`
//! separator and a binary payload. The boundary rule: the first `0x00` in
//! the body splits JSON from payload; if no `0x00` exists, the matching
//! closing brace of the outermost JSON object ends the header (string
//! escapes respected) and everything after it is payload.

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::{AudioSample, StreamMetadata, VideoCodec, VideoSample};

/// Maximum declared body length (100 MiB)
pub const MAX_MESSAGE_SIZE: u32 = 100 * 1024 * 1024;

/// Wire message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Video = 0x01,
    Audio = 0x02,
    Metadata = 0x03,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Metadata => "metadata",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(MessageType::Video),
            0x02 => Ok(MessageType::Audio),
            0x03 => Ok(MessageType::Metadata),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Errors that terminate the current producer connection (never the listener)
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {0} bytes")]
    TooLarge(u32),

    #[error("truncated message")]
    Truncated,

    #[error("bad JSON header: {0}")]
    BadJson(String),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownType(u8),
}

/// JSON header of a video message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VideoHeader {
    pts: i64,
    dts: i64,
    keyframe: bool,
    width: u32,
    height: u32,
    codec: VideoCodec,
}

/// JSON header of an audio message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AudioHeader {
    pts: i64,
    sample_rate: u32,
    channels: u32,
    sample_count: u32,
}

/// A fully decoded producer message
#[derive(Debug, Clone)]
pub enum IngestMessage {
    Video(VideoSample),
    Audio(AudioSample),
    Metadata(StreamMetadata),
}

impl IngestMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestMessage::Video(_) => "video",
            IngestMessage::Audio(_) => "audio",
            IngestMessage::Metadata(_) => "metadata",
        }
    }
}

/// Find the index just past the outermost JSON object's closing brace.
///
/// Only consulted when the body carries no `0x00` separator.
fn find_json_end(data: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in data.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        if in_string && b == b'\\' {
            escaped = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if b == b'{' {
            depth += 1;
        } else if b == b'}' {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i + 1);
            }
        }
    }

    None
}

/// Split a message body into its JSON header and binary payload ranges.
///
/// Returns `(json_end, payload_start)` indices into `body`.
fn split_body(body: &[u8]) -> Result<(usize, usize), ProtocolError> {
    if let Some(sep) = body.iter().position(|&b| b == 0) {
        return Ok((sep, sep + 1));
    }

    let end = find_json_end(body)
        .ok_or_else(|| ProtocolError::BadJson("no JSON object boundary in message".into()))?;
    Ok((end, end))
}

/// Decode a message body into a typed sample.
///
/// `body` is the N-byte region following the type and length fields. The
/// payload is sliced out of `body` without copying.
pub fn decode_body(msg_type: MessageType, body: Bytes) -> Result<IngestMessage, ProtocolError> {
    let (json_end, payload_start) = split_body(&body)?;
    let json = &body[..json_end];

    match msg_type {
        MessageType::Video => {
            let header: VideoHeader =
                serde_json::from_slice(json).map_err(|e| ProtocolError::BadJson(e.to_string()))?;
            Ok(IngestMessage::Video(VideoSample {
                pts: header.pts,
                dts: header.dts,
                keyframe: header.keyframe,
                width: header.width,
                height: header.height,
                codec: header.codec,
                payload: body.slice(payload_start..),
                received_at: Instant::now(),
            }))
        }
        MessageType::Audio => {
            let header: AudioHeader =
                serde_json::from_slice(json).map_err(|e| ProtocolError::BadJson(e.to_string()))?;
            Ok(IngestMessage::Audio(AudioSample {
                pts: header.pts,
                sample_rate: header.sample_rate,
                channels: header.channels,
                sample_count: header.sample_count,
                payload: body.slice(payload_start..),
                received_at: Instant::now(),
            }))
        }
        MessageType::Metadata => {
            // Metadata messages carry no binary payload; trailing bytes are ignored.
            let meta: StreamMetadata =
                serde_json::from_slice(json).map_err(|e| ProtocolError::BadJson(e.to_string()))?;
            Ok(IngestMessage::Metadata(meta))
        }
    }
}

fn frame_message(msg_type: MessageType, json: &[u8], payload: Option<&[u8]>) -> Vec<u8> {
    let body_len = json.len() + payload.map(|p| p.len() + 1).unwrap_or(0);
    let mut buf = BytesMut::with_capacity(1 + 4 + body_len);
    buf.put_u8(msg_type as u8);
    buf.put_u32(body_len as u32);
    buf.extend_from_slice(json);
    if let Some(payload) = payload {
        buf.put_u8(0);
        buf.extend_from_slice(payload);
    }
    buf.to_vec()
}

/// Encode a message back to its wire form (JSON header, `0x00` separator,
/// payload). Used by producer-side tooling and round-trip tests.
pub fn encode_message(msg: &IngestMessage) -> Vec<u8> {
    match msg {
        IngestMessage::Video(s) => {
            let header = VideoHeader {
                pts: s.pts,
                dts: s.dts,
                keyframe: s.keyframe,
                width: s.width,
                height: s.height,
                codec: s.codec,
            };
            let json = serde_json::to_vec(&header).expect("video header serializes");
            frame_message(MessageType::Video, &json, Some(&s.payload))
        }
        IngestMessage::Audio(s) => {
            let header = AudioHeader {
                pts: s.pts,
                sample_rate: s.sample_rate,
                channels: s.channels,
                sample_count: s.sample_count,
            };
            let json = serde_json::to_vec(&header).expect("audio header serializes");
            frame_message(MessageType::Audio, &json, Some(&s.payload))
        }
        IngestMessage::Metadata(meta) => {
            let json = serde_json::to_vec(meta).expect("metadata serializes");
            frame_message(MessageType::Metadata, &json, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_sample(payload: &[u8]) -> VideoSample {
        VideoSample {
            pts: 123_456_789,
            dts: 123_456_789,
            keyframe: true,
            width: 1920,
            height: 1080,
            codec: VideoCodec::H264,
            payload: Bytes::copy_from_slice(payload),
            received_at: Instant::now(),
        }
    }

    #[test]
    fn test_decode_with_null_separator() {
        let body = b"{\"pts\":1,\"dts\":1,\"keyframe\":false,\"width\":640,\"height\":480,\"codec\":\"h264\"}\0\x00\x00\x00\x01\x67".to_vec();
        let msg = decode_body(MessageType::Video, Bytes::from(body)).unwrap();
        match msg {
            IngestMessage::Video(s) => {
                assert_eq!(s.width, 640);
                assert_eq!(&s.payload[..], &[0x00, 0x00, 0x00, 0x01, 0x67]);
            }
            other => panic!("unexpected message: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_without_separator_uses_brace_matching() {
        // Payload bytes deliberately avoid 0x00 so the brace scanner decides.
        let body =
            b"{\"pts\":1,\"dts\":1,\"keyframe\":false,\"width\":640,\"height\":480,\"codec\":\"hevc\"}\xff\xfe".to_vec();
        let msg = decode_body(MessageType::Video, Bytes::from(body)).unwrap();
        match msg {
            IngestMessage::Video(s) => {
                assert_eq!(s.codec, VideoCodec::Hevc);
                assert_eq!(&s.payload[..], &[0xff, 0xfe]);
            }
            other => panic!("unexpected message: {}", other.kind()),
        }
    }

    #[test]
    fn test_brace_matching_respects_string_escapes() {
        let json = br#"{"a":"br\"ace }","b":{"c":1}}"#;
        assert_eq!(find_json_end(json), Some(json.len()));

        let mut body = json.to_vec();
        body.extend_from_slice(&[0xab, 0xcd]);
        let (json_end, payload_start) = split_body(&body).unwrap();
        assert_eq!(json_end, json.len());
        assert_eq!(payload_start, json.len());
    }

    #[test]
    fn test_decode_rejects_missing_boundary() {
        let body = b"not json at all".to_vec();
        let err = decode_body(MessageType::Video, Bytes::from(body)).unwrap_err();
        assert!(matches!(err, ProtocolError::BadJson(_)));
    }

    #[test]
    fn test_decode_rejects_bad_header_fields() {
        let body = b"{\"pts\":\"not a number\"}\0payload".to_vec();
        let err = decode_body(MessageType::Video, Bytes::from(body)).unwrap_err();
        assert!(matches!(err, ProtocolError::BadJson(_)));
    }

    #[test]
    fn test_unknown_type_byte() {
        let err = MessageType::try_from(0x7f).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(0x7f)));
    }

    #[test]
    fn test_empty_video_payload_accepted() {
        let encoded = encode_message(&IngestMessage::Video(video_sample(&[])));
        let body = Bytes::copy_from_slice(&encoded[5..]);
        let msg = decode_body(MessageType::Video, body).unwrap();
        match msg {
            IngestMessage::Video(s) => assert!(s.payload.is_empty()),
            other => panic!("unexpected message: {}", other.kind()),
        }
    }

    #[test]
    fn test_video_round_trip() {
        // Annex-B keyframe payload: SPS, PPS, then IDR slice.
        let payload = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1f, //
            0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80, //
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00,
        ];
        let original = video_sample(&payload);
        let encoded = encode_message(&IngestMessage::Video(original.clone()));

        assert_eq!(encoded[0], MessageType::Video as u8);
        let declared = u32::from_be_bytes(encoded[1..5].try_into().unwrap());
        assert_eq!(declared as usize, encoded.len() - 5);

        let decoded = decode_body(MessageType::Video, Bytes::copy_from_slice(&encoded[5..])).unwrap();
        match decoded {
            IngestMessage::Video(s) => {
                assert_eq!(s.pts, original.pts);
                assert_eq!(s.dts, original.dts);
                assert_eq!(s.keyframe, original.keyframe);
                assert_eq!(s.width, original.width);
                assert_eq!(s.height, original.height);
                assert_eq!(s.codec, original.codec);
                // Keyframe parameter sets pass through byte-identically.
                assert_eq!(&s.payload[..], &payload[..]);
            }
            other => panic!("unexpected message: {}", other.kind()),
        }
    }

    #[test]
    fn test_audio_round_trip() {
        let original = AudioSample {
            pts: 42,
            sample_rate: 48_000,
            channels: 2,
            sample_count: 960,
            payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
            received_at: Instant::now(),
        };
        let encoded = encode_message(&IngestMessage::Audio(original.clone()));
        let decoded = decode_body(MessageType::Audio, Bytes::copy_from_slice(&encoded[5..])).unwrap();
        match decoded {
            IngestMessage::Audio(s) => {
                assert_eq!(s.pts, original.pts);
                assert_eq!(s.sample_rate, original.sample_rate);
                assert_eq!(s.channels, original.channels);
                assert_eq!(s.sample_count, original.sample_count);
                assert_eq!(s.payload, original.payload);
            }
            other => panic!("unexpected message: {}", other.kind()),
        }
    }

    #[test]
    fn test_metadata_round_trip() {
        let original = StreamMetadata {
            video_width: 1920,
            video_height: 1080,
            video_codec: "h264".to_string(),
            video_fps: 60,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        };
        let encoded = encode_message(&IngestMessage::Metadata(original.clone()));
        let decoded = decode_body(MessageType::Metadata, Bytes::copy_from_slice(&encoded[5..])).unwrap();
        match decoded {
            IngestMessage::Metadata(meta) => assert_eq!(meta, original),
            other => panic!("unexpected message: {}", other.kind()),
        }
    }
}
