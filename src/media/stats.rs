//! Rolling gateway counters and periodic summaries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::webrtc::manager::PeerManager;

/// Interval between structured statistics summaries
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared counters updated by the ingest, distribution and fan-out layers
pub struct GatewayStats {
    started_at: Instant,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    metadata_messages: AtomicU64,
    bytes_received: AtomicU64,
    dropped_video: AtomicU64,
    dropped_audio: AtomicU64,
    track_write_errors: AtomicU64,
    producer_connected: AtomicBool,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub metadata_messages: u64,
    pub bytes_received: u64,
    pub dropped_video: u64,
    pub dropped_audio: u64,
    pub track_write_errors: u64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            metadata_messages: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            dropped_video: AtomicU64::new(0),
            dropped_audio: AtomicU64::new(0),
            track_write_errors: AtomicU64::new(0),
            producer_connected: AtomicBool::new(false),
        }
    }

    pub fn record_video_frame(&self) {
        self.video_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_frame(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metadata(&self) {
        self.metadata_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped_video(&self) {
        self.dropped_video.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_audio(&self) {
        self.dropped_audio.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_track_write_error(&self) {
        self.track_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_producer_connected(&self, connected: bool) {
        self.producer_connected.store(connected, Ordering::Relaxed);
    }

    pub fn producer_connected(&self) -> bool {
        self.producer_connected.load(Ordering::Relaxed)
    }

    pub fn dropped_video(&self) -> u64 {
        self.dropped_video.load(Ordering::Relaxed)
    }

    pub fn dropped_audio(&self) -> u64 {
        self.dropped_audio.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            metadata_messages: self.metadata_messages.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            dropped_video: self.dropped_video.load(Ordering::Relaxed),
            dropped_audio: self.dropped_audio.load(Ordering::Relaxed),
            track_write_errors: self.track_write_errors.load(Ordering::Relaxed),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Format an uptime as a compact human-readable string (`"1h23m45s"`).
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Emit a structured summary every [`STATS_INTERVAL`] until shutdown.
pub async fn run_summary(
    stats: Arc<GatewayStats>,
    peers: Arc<PeerManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so every summary covers a
    // full interval.
    ticker.tick().await;

    let mut last = stats.snapshot();
    let mut last_at = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("statistics summary task stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last_at).as_secs_f64().max(f64::EPSILON);
        let current = stats.snapshot();

        info!(
            video_fps = (current.video_frames - last.video_frames) as f64 / elapsed,
            audio_fps = (current.audio_frames - last.audio_frames) as f64 / elapsed,
            bytes_per_sec = (current.bytes_received - last.bytes_received) as f64 / elapsed,
            total_video_frames = current.video_frames,
            total_audio_frames = current.audio_frames,
            total_bytes = current.bytes_received,
            dropped_video = current.dropped_video,
            dropped_audio = current.dropped_audio,
            track_write_errors = current.track_write_errors,
            connected_peers = peers.connected_peer_count(),
            producer_connected = stats.producer_connected(),
            "gateway statistics"
        );

        last = current;
        last_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(73)), "1m13s");
        assert_eq!(format_uptime(Duration::from_secs(3600 + 23 * 60 + 45)), "1h23m45s");
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
    }

    #[test]
    fn test_counters_and_snapshot() {
        let stats = GatewayStats::new();
        stats.record_video_frame();
        stats.record_video_frame();
        stats.record_audio_frame();
        stats.record_bytes(1024);
        stats.record_dropped_video();

        let snap = stats.snapshot();
        assert_eq!(snap.video_frames, 2);
        assert_eq!(snap.audio_frames, 1);
        assert_eq!(snap.bytes_received, 1024);
        assert_eq!(snap.dropped_video, 1);
        assert_eq!(snap.dropped_audio, 0);
    }

    #[test]
    fn test_producer_connected_flag() {
        let stats = GatewayStats::new();
        assert!(!stats.producer_connected());
        stats.set_producer_connected(true);
        assert!(stats.producer_connected());
        stats.set_producer_connected(false);
        assert!(!stats.producer_connected());
    }
}
