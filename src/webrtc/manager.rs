//! Peer manager: owns the set of viewer sessions and fans media out to
//! all of them.
//!
//! The set is guarded by a reader/writer lock: fan-out copies the current
//! session list under the read side and releases it before touching any
//! transport, create/remove take the write side. Each session gets a
//! monitor task that turns state transitions into lifecycle hooks and
//! removal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use super::config::PeerConfig;
use super::peer::{LocalCandidateCallback, PeerSession, PeerState};
use super::signaling::IceCandidate;
use crate::error::{GatewayError, Result};
use crate::media::frame::{AudioSample, VideoSample};
use crate::media::stats::GatewayStats;

/// Concurrent session cap; offers beyond it are answered with 503.
pub const MAX_PEERS: usize = 16;

/// Per-session budget when closing; a session that exceeds it is abandoned.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle hook. Must not call back into the peer manager.
pub type PeerHook = Box<dyn Fn(&str) + Send + Sync>;

/// Summary of one session for status surfaces
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: String,
    pub state: String,
}

/// Owns the peer set and the fan-out path
pub struct PeerManager {
    config: PeerConfig,
    peers: RwLock<HashMap<String, Arc<PeerSession>>>,
    next_peer_seq: AtomicU64,
    connected_peers: AtomicUsize,
    stats: Arc<GatewayStats>,
    on_peer_connected: std::sync::Mutex<Option<PeerHook>>,
    on_peer_disconnected: std::sync::Mutex<Option<PeerHook>>,
    on_local_candidate: std::sync::Mutex<Option<LocalCandidateCallback>>,
}

impl PeerManager {
    pub fn new(config: PeerConfig, stats: Arc<GatewayStats>) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers: RwLock::new(HashMap::new()),
            next_peer_seq: AtomicU64::new(0),
            connected_peers: AtomicUsize::new(0),
            stats,
            on_peer_connected: std::sync::Mutex::new(None),
            on_peer_disconnected: std::sync::Mutex::new(None),
            on_local_candidate: std::sync::Mutex::new(None),
        })
    }

    /// Single-subscriber hook fired on the first transition into Connected.
    pub fn set_on_peer_connected(&self, hook: PeerHook) {
        *self.on_peer_connected.lock().expect("hook lock poisoned") = Some(hook);
    }

    /// Single-subscriber hook fired when a connected peer reaches a
    /// terminal state.
    pub fn set_on_peer_disconnected(&self, hook: PeerHook) {
        *self.on_peer_disconnected.lock().expect("hook lock poisoned") = Some(hook);
    }

    /// Out-of-band push for locally gathered candidates. Sessions created
    /// after registration invoke it per candidate; polling clients use
    /// [`PeerManager::drain_local_candidates`] instead.
    pub fn set_on_local_candidate(&self, callback: LocalCandidateCallback) {
        *self.on_local_candidate.lock().expect("hook lock poisoned") = Some(callback);
    }

    fn fire_connected(&self, peer_id: &str) {
        if let Some(hook) = self
            .on_peer_connected
            .lock()
            .expect("hook lock poisoned")
            .as_ref()
        {
            hook(peer_id);
        }
    }

    fn fire_disconnected(&self, peer_id: &str) {
        if let Some(hook) = self
            .on_peer_disconnected
            .lock()
            .expect("hook lock poisoned")
            .as_ref()
        {
            hook(peer_id);
        }
    }

    /// Mint an identifier unique for the process lifetime.
    fn mint_peer_id(&self) -> String {
        let seq = self.next_peer_seq.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("peer-{seq}-{}", &suffix[..8])
    }

    /// Create a session from a viewer offer and return its id plus the
    /// answer SDP.
    pub async fn create_peer(self: &Arc<Self>, offer_sdp: String) -> Result<(String, String)> {
        if self.peers.read().await.len() >= MAX_PEERS {
            return Err(GatewayError::Exhausted(MAX_PEERS));
        }

        let peer_id = self.mint_peer_id();
        let candidate_callback = self
            .on_local_candidate
            .lock()
            .expect("hook lock poisoned")
            .clone();
        let session =
            Arc::new(PeerSession::new(&self.config, peer_id.clone(), candidate_callback).await?);

        let answer = match session.handle_offer(offer_sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                // Never retain a session whose offer was rejected.
                if let Err(close_err) = session.close().await {
                    debug!("discarding rejected session {}: {}", peer_id, close_err);
                }
                return Err(e);
            }
        };

        self.peers
            .write()
            .await
            .insert(peer_id.clone(), session.clone());
        self.spawn_monitor(&session);

        info!(
            "peer {} created ({} active)",
            peer_id,
            self.peers.read().await.len()
        );
        Ok((peer_id, answer))
    }

    /// Watch one session's state: fire hooks on Connected, remove the
    /// session on terminal states.
    fn spawn_monitor(self: &Arc<Self>, session: &Arc<PeerSession>) {
        let manager = Arc::downgrade(self);
        let mut state_rx = session.state_watch();
        let peer_id = session.peer_id.clone();

        tokio::spawn(async move {
            let mut was_connected = false;
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    PeerState::Connected if !was_connected => {
                        was_connected = true;
                        if let Some(manager) = manager.upgrade() {
                            manager.connected_peers.fetch_add(1, Ordering::Relaxed);
                            manager.fire_connected(&peer_id);
                        }
                    }
                    PeerState::Failed | PeerState::Closed => {
                        if let Some(manager) = manager.upgrade() {
                            if state == PeerState::Failed {
                                warn!("peer {} failed, removing from peer set", peer_id);
                            }
                            if let Some(session) = manager.remove_peer(&peer_id).await {
                                if state == PeerState::Failed {
                                    if let Err(e) = session.close().await {
                                        debug!("peer {} close after failure: {}", peer_id, e);
                                    }
                                }
                            }
                            if was_connected {
                                manager.connected_peers.fetch_sub(1, Ordering::Relaxed);
                                manager.fire_disconnected(&peer_id);
                            }
                        }
                        return;
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Remove a session from the set; the caller owns the returned handle.
    async fn remove_peer(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        let removed = self.peers.write().await.remove(peer_id);
        if removed.is_some() {
            debug!("peer {} removed from peer set", peer_id);
        }
        removed
    }

    /// Delegate a trickle candidate to its session.
    pub async fn add_remote_candidate(
        &self,
        peer_id: &str,
        candidate: RTCIceCandidateInit,
    ) -> Result<()> {
        let session = self
            .peers
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownPeer(peer_id.to_string()))?;
        session.add_remote_candidate(candidate).await
    }

    /// Local candidates accumulated since the peer's last poll.
    pub async fn drain_local_candidates(&self, peer_id: &str) -> Result<Vec<IceCandidate>> {
        let session = self
            .peers
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownPeer(peer_id.to_string()))?;
        Ok(session.drain_local_candidates())
    }

    /// Fan a video sample out to every session in a writable state.
    ///
    /// The session list is copied under the read lock and released before
    /// any transport call. Individual write failures are counted and
    /// logged, never propagated.
    pub async fn write_video_sample(&self, sample: &VideoSample, duration: Duration) {
        let targets: Vec<Arc<PeerSession>> = {
            let peers = self.peers.read().await;
            peers.values().filter(|s| s.is_writable()).cloned().collect()
        };

        for session in targets {
            if let Err(e) = session.write_video(sample.payload.clone(), duration).await {
                self.stats.record_track_write_error();
                debug!("video write to peer {} failed: {}", session.peer_id, e);
            }
        }
    }

    /// Fan an audio sample out to every session in a writable state.
    pub async fn write_audio_sample(&self, sample: &AudioSample, duration: Duration) {
        let targets: Vec<Arc<PeerSession>> = {
            let peers = self.peers.read().await;
            peers.values().filter(|s| s.is_writable()).cloned().collect()
        };

        for session in targets {
            if let Err(e) = session.write_audio(sample.payload.clone(), duration).await {
                self.stats.record_track_write_error();
                debug!("audio write to peer {} failed: {}", session.peer_id, e);
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Peers currently in Connected, maintained by the monitor tasks.
    pub fn connected_peer_count(&self) -> usize {
        self.connected_peers.load(Ordering::Relaxed)
    }

    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .await
            .values()
            .map(|s| PeerInfo {
                peer_id: s.peer_id.clone(),
                state: s.state().to_string(),
            })
            .collect()
    }

    /// Close every session concurrently, bounding each close by
    /// [`SESSION_CLOSE_TIMEOUT`]; sessions that exceed it are abandoned.
    pub async fn close(&self) {
        let sessions: Vec<(String, Arc<PeerSession>)> =
            self.peers.write().await.drain().collect();
        let count = sessions.len();

        let mut closes: FuturesUnordered<_> = sessions
            .into_iter()
            .map(|(peer_id, session)| async move {
                match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, session.close()).await {
                    Err(_) => warn!("peer {} close timed out, abandoning", peer_id),
                    Ok(Err(e)) => warn!("peer {} close failed: {}", peer_id, e),
                    Ok(Ok(())) => {}
                }
            })
            .collect();
        while closes.next().await.is_some() {}

        if count > 0 {
            info!("closed {} peer sessions", count);
        }
    }
}
