use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::config::GatewayConfig;
use crate::media::frame::StreamMetadata;
use crate::media::stats::GatewayStats;
use crate::webrtc::manager::PeerManager;

/// Application-wide state shared across signaling handlers
pub struct AppState {
    pub config: GatewayConfig,
    pub peers: Arc<PeerManager>,
    pub stats: Arc<GatewayStats>,
    /// Latest stream metadata announced by the producer, if any
    pub metadata: watch::Receiver<Option<StreamMetadata>>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        peers: Arc<PeerManager>,
        stats: Arc<GatewayStats>,
        metadata: watch::Receiver<Option<StreamMetadata>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers,
            stats,
            metadata,
            shutdown_tx,
        })
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
