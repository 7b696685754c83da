//! Viewer-facing WebRTC layer: peer sessions, the peer set, signaling
//! types and track writers.

pub mod config;
pub mod manager;
pub mod peer;
pub mod signaling;
pub mod track;

pub use config::PeerConfig;
pub use manager::{PeerManager, MAX_PEERS};
pub use peer::{PeerSession, PeerState};
