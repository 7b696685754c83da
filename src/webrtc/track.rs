//! Sample-based track writers.
//!
//! Each writer wraps a `TrackLocalStaticSample`; the transport handles RTP
//! packetization of the Annex-B (video) or encoded audio payload, so the
//! gateway hands over the producer's payload bytes unchanged together with
//! a presentation duration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::config::{audio_capability, video_capability, PeerConfig, STREAM_ID};
use crate::error::{GatewayError, Result};

/// Video track writer for one peer session
pub struct VideoTrackWriter {
    track: Arc<TrackLocalStaticSample>,
    frames_written: AtomicU64,
}

impl VideoTrackWriter {
    pub fn new(peer_id: &str, config: &PeerConfig) -> Self {
        let capability = video_capability(config.video_codec, config.max_bitrate_kbps);
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            format!("video-{peer_id}"),
            STREAM_ID.to_string(),
        ));
        Self {
            track,
            frames_written: AtomicU64::new(0),
        }
    }

    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    /// Write one encoded frame. Empty payloads are accepted and discarded
    /// at this layer.
    pub async fn write(&self, payload: Bytes, duration: Duration) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        let sample = Sample {
            data: payload,
            duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| GatewayError::Transport(format!("video track write: {e}")))?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

/// Opus audio track writer for one peer session
pub struct AudioTrackWriter {
    track: Arc<TrackLocalStaticSample>,
    frames_written: AtomicU64,
}

impl AudioTrackWriter {
    pub fn new(peer_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            audio_capability(),
            format!("audio-{peer_id}"),
            STREAM_ID.to_string(),
        ));
        Self {
            track,
            frames_written: AtomicU64::new(0),
        }
    }

    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub async fn write(&self, payload: Bytes, duration: Duration) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        let sample = Sample {
            data: payload,
            duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| GatewayError::Transport(format!("audio track write: {e}")))?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}
