//! Bounded ingest queue between the producer read loop and the
//! distribution loop.
//!
//! One bounded channel per stream kind keeps per-kind arrival order while
//! letting metadata stay tiny. Overflow semantics are drop-newest: the
//! ingest side never blocks on a slow consumer, it sheds the incoming
//! sample and counts the drop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::frame::{AudioSample, StreamMetadata, VideoSample};
use super::protocol::IngestMessage;
use super::stats::GatewayStats;

/// Per-kind channel capacities
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Roughly two seconds of video at 60 fps
    pub video_capacity: usize,
    pub audio_capacity: usize,
    pub metadata_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            video_capacity: 120,
            audio_capacity: 60,
            metadata_capacity: 4,
        }
    }
}

/// Producer half of the ingest queue
#[derive(Clone)]
pub struct IngestSender {
    video: mpsc::Sender<VideoSample>,
    audio: mpsc::Sender<AudioSample>,
    metadata: mpsc::Sender<StreamMetadata>,
    stats: Arc<GatewayStats>,
}

/// Consumer half of the ingest queue, owned by the distribution loop
pub struct IngestReceiver {
    pub video: mpsc::Receiver<VideoSample>,
    pub audio: mpsc::Receiver<AudioSample>,
    pub metadata: mpsc::Receiver<StreamMetadata>,
}

/// Create the bounded queue pair.
pub fn bounded(config: QueueConfig, stats: Arc<GatewayStats>) -> (IngestSender, IngestReceiver) {
    let (video_tx, video_rx) = mpsc::channel(config.video_capacity);
    let (audio_tx, audio_rx) = mpsc::channel(config.audio_capacity);
    let (metadata_tx, metadata_rx) = mpsc::channel(config.metadata_capacity);

    (
        IngestSender {
            video: video_tx,
            audio: audio_tx,
            metadata: metadata_tx,
            stats,
        },
        IngestReceiver {
            video: video_rx,
            audio: audio_rx,
            metadata: metadata_rx,
        },
    )
}

impl IngestSender {
    /// Publish a decoded message without blocking. A full queue drops the
    /// sample and increments the matching drop counter.
    pub fn publish(&self, msg: IngestMessage) {
        match msg {
            IngestMessage::Video(sample) => {
                if self.video.try_send(sample).is_err() {
                    self.stats.record_dropped_video();
                    warn!(
                        dropped = self.stats.dropped_video(),
                        "video queue full, dropping frame"
                    );
                } else {
                    self.stats.record_video_frame();
                }
            }
            IngestMessage::Audio(sample) => {
                if self.audio.try_send(sample).is_err() {
                    self.stats.record_dropped_audio();
                    warn!(
                        dropped = self.stats.dropped_audio(),
                        "audio queue full, dropping frame"
                    );
                } else {
                    self.stats.record_audio_frame();
                }
            }
            IngestMessage::Metadata(meta) => {
                if self.metadata.try_send(meta).is_err() {
                    warn!("metadata queue full, dropping metadata");
                } else {
                    self.stats.record_metadata();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Instant;

    fn video_sample(pts: i64) -> IngestMessage {
        IngestMessage::Video(VideoSample {
            pts,
            dts: pts,
            keyframe: false,
            width: 1280,
            height: 720,
            codec: Default::default(),
            payload: Bytes::from_static(b"frame"),
            received_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_overflow_drops_newest_and_counts() {
        let stats = Arc::new(GatewayStats::new());
        let config = QueueConfig {
            video_capacity: 30,
            audio_capacity: 4,
            metadata_capacity: 2,
        };
        let (tx, mut rx) = bounded(config, stats.clone());

        // 200 frames into a 30-slot queue with no consumer running.
        for pts in 0..200 {
            tx.publish(video_sample(pts));
        }

        assert_eq!(stats.dropped_video(), 170);
        assert_eq!(stats.snapshot().video_frames, 30);

        // Exactly the first 30 frames survive, in arrival order.
        for expected in 0..30 {
            let sample = rx.video.try_recv().expect("queued frame");
            assert_eq!(sample.pts, expected);
        }
        assert!(rx.video.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_kind_order_preserved() {
        let stats = Arc::new(GatewayStats::new());
        let (tx, mut rx) = bounded(QueueConfig::default(), stats);

        for pts in 0..10 {
            tx.publish(video_sample(pts));
        }
        for pts in 0..10 {
            let sample = rx.video.recv().await.unwrap();
            assert_eq!(sample.pts, pts);
        }
    }

    #[tokio::test]
    async fn test_metadata_published() {
        let stats = Arc::new(GatewayStats::new());
        let (tx, mut rx) = bounded(QueueConfig::default(), stats.clone());

        tx.publish(IngestMessage::Metadata(StreamMetadata {
            video_fps: 60,
            ..Default::default()
        }));

        let meta = rx.metadata.recv().await.unwrap();
        assert_eq!(meta.video_fps, 60);
        assert_eq!(stats.snapshot().metadata_messages, 1);
    }
}
