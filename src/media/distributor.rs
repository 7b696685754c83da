//! Distribution loop: single consumer of the ingest queue.
//!
//! Wraps each sample with a presentation duration and drives the peer
//! manager fan-out. Stream metadata mutates the duration default used for
//! subsequent video writes and is forwarded on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::frame::StreamMetadata;
use super::queue::IngestReceiver;
use crate::webrtc::manager::PeerManager;

/// Fallback frame rate when no metadata has announced one
pub const DEFAULT_VIDEO_FPS: u32 = 30;

/// How long the loop keeps draining queued samples after shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Single consumer of the ingest queue
pub struct Distributor {
    queue: IngestReceiver,
    peers: Arc<PeerManager>,
    metadata_tx: watch::Sender<Option<StreamMetadata>>,
}

impl Distributor {
    pub fn new(
        queue: IngestReceiver,
        peers: Arc<PeerManager>,
    ) -> (Self, watch::Receiver<Option<StreamMetadata>>) {
        let (metadata_tx, metadata_rx) = watch::channel(None);
        (
            Self {
                queue,
                peers,
                metadata_tx,
            },
            metadata_rx,
        )
    }

    /// Presentation duration for a video sample: 1/fps once metadata has
    /// announced the producer rate, 1/30 s before that.
    fn video_duration(fps: Option<u32>) -> Duration {
        Duration::from_secs(1) / fps.unwrap_or(DEFAULT_VIDEO_FPS)
    }

    /// Presentation duration for an audio sample, from its own sample count.
    fn audio_duration(sample_count: u32, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(sample_count as u64 * 1_000_000_000 / sample_rate as u64)
    }

    /// Run until shutdown, then drain briefly to reduce visible stalls.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("distribution loop started");
        let mut video_fps: Option<u32> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    self.drain(video_fps).await;
                    break;
                }

                meta = self.queue.metadata.recv() => match meta {
                    Some(meta) => {
                        video_fps = (meta.video_fps > 0).then_some(meta.video_fps);
                        let _ = self.metadata_tx.send(Some(meta));
                    }
                    None => break,
                },

                sample = self.queue.video.recv() => match sample {
                    Some(sample) => {
                        let duration = Self::video_duration(video_fps);
                        self.peers.write_video_sample(&sample, duration).await;
                    }
                    None => break,
                },

                sample = self.queue.audio.recv() => match sample {
                    Some(sample) => {
                        let duration = Self::audio_duration(sample.sample_count, sample.sample_rate);
                        self.peers.write_audio_sample(&sample, duration).await;
                    }
                    None => break,
                },
            }
        }

        debug!("distribution loop stopped");
    }

    async fn drain(&mut self, video_fps: Option<u32>) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,

                sample = self.queue.video.recv() => match sample {
                    Some(sample) => {
                        let duration = Self::video_duration(video_fps);
                        self.peers.write_video_sample(&sample, duration).await;
                    }
                    None => break,
                },

                sample = self.queue.audio.recv() => match sample {
                    Some(sample) => {
                        let duration = Self::audio_duration(sample.sample_count, sample.sample_rate);
                        self.peers.write_audio_sample(&sample, duration).await;
                    }
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::VideoSample;
    use crate::media::protocol::IngestMessage;
    use crate::media::queue::{self, QueueConfig};
    use crate::media::stats::GatewayStats;
    use crate::webrtc::config::PeerConfig;
    use bytes::Bytes;
    use std::time::Instant;

    #[test]
    fn test_video_duration_policy() {
        assert_eq!(Distributor::video_duration(None), Duration::from_secs(1) / 30);
        assert_eq!(Distributor::video_duration(Some(60)), Duration::from_secs(1) / 60);
        assert_eq!(Distributor::video_duration(Some(24)), Duration::from_secs(1) / 24);
    }

    #[test]
    fn test_audio_duration_from_sample_count() {
        // 960 samples at 48 kHz is a 20 ms frame.
        assert_eq!(
            Distributor::audio_duration(960, 48_000),
            Duration::from_millis(20)
        );
        assert_eq!(Distributor::audio_duration(480, 48_000), Duration::from_millis(10));
        assert_eq!(Distributor::audio_duration(960, 0), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_metadata_forwarded_and_loop_stops_on_shutdown() {
        let stats = Arc::new(GatewayStats::new());
        let (tx, rx) = queue::bounded(QueueConfig::default(), stats.clone());
        let peers = PeerManager::new(PeerConfig::default(), stats);
        let (distributor, mut metadata_rx) = Distributor::new(rx, peers);

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(distributor.run(shutdown_tx.subscribe()));

        tx.publish(IngestMessage::Metadata(StreamMetadata {
            video_fps: 60,
            ..Default::default()
        }));
        tx.publish(IngestMessage::Video(VideoSample {
            pts: 0,
            dts: 0,
            keyframe: true,
            width: 1280,
            height: 720,
            codec: Default::default(),
            payload: Bytes::from_static(b"frame"),
            received_at: Instant::now(),
        }));

        metadata_rx.changed().await.unwrap();
        assert_eq!(metadata_rx.borrow().as_ref().unwrap().video_fps, 60);

        let _ = shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
