//! Media ingest pipeline: producer IPC, bounded queueing, distribution.

pub mod distributor;
pub mod frame;
pub mod ingest;
pub mod protocol;
pub mod queue;
pub mod stats;

pub use distributor::Distributor;
pub use frame::{AudioSample, StreamMetadata, VideoCodec, VideoSample};
pub use ingest::IpcServer;
pub use protocol::IngestMessage;
pub use stats::GatewayStats;
