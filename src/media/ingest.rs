//! Producer IPC ingest: unix-socket listener and framed read loop.
//!
//! Exactly one producer connection is active at a time; a second
//! connection replaces the first. Producer disconnects re-arm the
//! listener, and protocol errors drop the connection but never the
//! listener.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use super::protocol::{self, IngestMessage, MessageType, ProtocolError, MAX_MESSAGE_SIZE};
use super::queue::IngestSender;
use super::stats::GatewayStats;

/// Per-message read deadline; expiry at the idle point is a liveness tick,
/// not an error.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Unix-socket server accepting the capture producer
pub struct IpcServer {
    socket_path: PathBuf,
    queue: IngestSender,
    stats: Arc<GatewayStats>,
    shutdown: broadcast::Sender<()>,
}

impl IpcServer {
    pub fn new(
        socket_path: PathBuf,
        queue: IngestSender,
        stats: Arc<GatewayStats>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            socket_path,
            queue,
            stats,
            shutdown,
        }
    }

    /// Bind the listener, removing a stale socket file first.
    pub fn bind(&self) -> io::Result<UnixListener> {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(
            socket = %self.socket_path.display(),
            "IPC listener waiting for capture producer"
        );
        Ok(listener)
    }

    /// Accept loop. Runs until shutdown, then removes the socket file.
    pub async fn run(self, listener: UnixListener) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut reader: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            if let Some(old) = reader.take() {
                                if !old.is_finished() {
                                    // Exclusive producer: the newest connection wins.
                                    warn!("second producer connection, replacing the existing one");
                                    old.abort();
                                }
                            }
                            info!("capture producer connected");
                            reader = Some(self.spawn_reader(stream));
                        }
                        Err(e) => {
                            warn!("accept error: {}", e);
                        }
                    }
                }
            }
        }

        if let Some(handle) = reader.take() {
            handle.abort();
        }
        self.stats.set_producer_connected(false);
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove socket file: {}", e);
            }
        }
        info!("IPC listener stopped");
    }

    fn spawn_reader(&self, stream: UnixStream) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        let shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            stats.set_producer_connected(true);
            match run_connection(stream, queue, &stats, shutdown_rx).await {
                Ok(()) => info!("capture producer disconnected, waiting for reconnection"),
                Err(ConnectionError::Protocol(e)) => {
                    warn!("dropping producer connection: {}", e);
                }
                Err(ConnectionError::Io(e)) => {
                    warn!("producer read failed: {}", e);
                }
            }
            stats.set_producer_connected(false);
        })
    }
}

/// Read past the idle point with the message deadline applied; a stall in
/// the middle of a started message desyncs the stream and is `Truncated`.
async fn read_exact_deadline(
    stream: &mut UnixStream,
    buf: &mut [u8],
) -> Result<(), ConnectionError> {
    match timeout(READ_DEADLINE, stream.read_exact(buf)).await {
        Err(_) => Err(ProtocolError::Truncated.into()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Truncated.into())
        }
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(_)) => Ok(()),
    }
}

async fn run_connection(
    mut stream: UnixStream,
    queue: IngestSender,
    stats: &GatewayStats,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ConnectionError> {
    loop {
        let type_byte = tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            read = timeout(READ_DEADLINE, stream.read_u8()) => match read {
                // Idle deadline expiry: re-check shutdown and keep waiting.
                Err(_) => continue,
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(byte)) => byte,
            },
        };

        let msg_type = MessageType::try_from(type_byte)?;

        let mut len_buf = [0u8; 4];
        read_exact_deadline(&mut stream, &mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(len).into());
        }

        let mut body = vec![0u8; len as usize];
        read_exact_deadline(&mut stream, &mut body).await?;

        stats.record_bytes(1 + 4 + len as u64);

        let msg = protocol::decode_body(msg_type, Bytes::from(body))?;
        if let IngestMessage::Metadata(meta) = &msg {
            info!(
                video_width = meta.video_width,
                video_height = meta.video_height,
                video_codec = %meta.video_codec,
                video_fps = meta.video_fps,
                audio_sample_rate = meta.audio_sample_rate,
                audio_channels = meta.audio_channels,
                "received stream metadata"
            );
        }
        queue.publish(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::{StreamMetadata, VideoSample};
    use crate::media::queue::{self, QueueConfig};
    use std::time::Instant;
    use tokio::io::AsyncWriteExt;

    struct TestGateway {
        server: JoinHandle<()>,
        socket_path: PathBuf,
        queue_rx: queue::IngestReceiver,
        stats: Arc<GatewayStats>,
        shutdown: broadcast::Sender<()>,
        _dir: tempfile::TempDir,
    }

    fn start_gateway() -> TestGateway {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("gateway.sock");
        let stats = Arc::new(GatewayStats::new());
        let (queue_tx, queue_rx) = queue::bounded(QueueConfig::default(), stats.clone());
        let (shutdown, _) = broadcast::channel(1);

        let server = IpcServer::new(
            socket_path.clone(),
            queue_tx,
            stats.clone(),
            shutdown.clone(),
        );
        let listener = server.bind().unwrap();
        let handle = tokio::spawn(server.run(listener));

        TestGateway {
            server: handle,
            socket_path,
            queue_rx,
            stats,
            shutdown,
            _dir: dir,
        }
    }

    fn encoded_video(pts: i64) -> Vec<u8> {
        protocol::encode_message(&IngestMessage::Video(VideoSample {
            pts,
            dts: pts,
            keyframe: pts == 0,
            width: 1280,
            height: 720,
            codec: Default::default(),
            payload: Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65]),
            received_at: Instant::now(),
        }))
    }

    fn encoded_metadata() -> Vec<u8> {
        protocol::encode_message(&IngestMessage::Metadata(StreamMetadata {
            video_width: 1280,
            video_height: 720,
            video_codec: "h264".into(),
            video_fps: 30,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }))
    }

    async fn recv_video(gw: &mut TestGateway) -> VideoSample {
        timeout(Duration::from_secs(2), gw.queue_rx.video.recv())
            .await
            .expect("video frame within deadline")
            .expect("queue open")
    }

    #[tokio::test]
    async fn test_producer_reconnect_delivers_all_frames() {
        let mut gw = start_gateway();

        let mut conn = UnixStream::connect(&gw.socket_path).await.unwrap();
        conn.write_all(&encoded_metadata()).await.unwrap();
        for pts in 0..10 {
            conn.write_all(&encoded_video(pts)).await.unwrap();
        }
        conn.shutdown().await.unwrap();
        drop(conn);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut conn = UnixStream::connect(&gw.socket_path).await.unwrap();
        for pts in 10..20 {
            conn.write_all(&encoded_video(pts)).await.unwrap();
        }
        conn.shutdown().await.unwrap();
        drop(conn);

        for pts in 0..20 {
            let sample = recv_video(&mut gw).await;
            assert_eq!(sample.pts, pts);
        }

        let meta = gw.queue_rx.metadata.recv().await.unwrap();
        assert_eq!(meta.video_fps, 30);

        let _ = gw.shutdown.send(());
        timeout(Duration::from_secs(2), gw.server).await.unwrap().unwrap();
        assert!(!gw.socket_path.exists());
    }

    #[tokio::test]
    async fn test_oversized_message_drops_connection_not_listener() {
        let mut gw = start_gateway();

        let mut conn = UnixStream::connect(&gw.socket_path).await.unwrap();
        let mut bad = vec![MessageType::Video as u8];
        bad.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        conn.write_all(&bad).await.unwrap();

        // The listener survives; a fresh producer keeps streaming.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut conn = UnixStream::connect(&gw.socket_path).await.unwrap();
        conn.write_all(&encoded_video(7)).await.unwrap();

        let sample = recv_video(&mut gw).await;
        assert_eq!(sample.pts, 7);

        let _ = gw.shutdown.send(());
    }

    #[tokio::test]
    async fn test_exact_limit_message_accepted() {
        let mut gw = start_gateway();

        // A body of exactly 100 MiB passes the size check.
        let json = br#"{"pts":1,"dts":1,"keyframe":true,"width":1920,"height":1080,"codec":"h264"}"#;
        let payload_len = MAX_MESSAGE_SIZE as usize - json.len() - 1;
        let mut msg = vec![MessageType::Video as u8];
        msg.extend_from_slice(&MAX_MESSAGE_SIZE.to_be_bytes());
        msg.extend_from_slice(json);
        msg.push(0);
        msg.resize(msg.len() + payload_len, 0x65);

        let mut conn = UnixStream::connect(&gw.socket_path).await.unwrap();
        let writer = tokio::spawn(async move {
            conn.write_all(&msg).await.unwrap();
            conn.shutdown().await.unwrap();
            conn
        });

        let sample = timeout(Duration::from_secs(10), gw.queue_rx.video.recv())
            .await
            .expect("frame within deadline")
            .expect("queue open");
        assert_eq!(sample.payload.len(), payload_len);
        writer.await.unwrap();

        let _ = gw.shutdown.send(());
    }

    #[tokio::test]
    async fn test_second_producer_replaces_first() {
        let mut gw = start_gateway();

        let _first = UnixStream::connect(&gw.socket_path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut second = UnixStream::connect(&gw.socket_path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        second.write_all(&encoded_video(3)).await.unwrap();
        let sample = recv_video(&mut gw).await;
        assert_eq!(sample.pts, 3);
        assert!(gw.stats.producer_connected());

        let _ = gw.shutdown.send(());
    }
}
