use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_gateway::config::GatewayConfig;
use webrtc_gateway::media::distributor::Distributor;
use webrtc_gateway::media::ingest::IpcServer;
use webrtc_gateway::media::queue::{self, QueueConfig};
use webrtc_gateway::media::stats::{self, GatewayStats};
use webrtc_gateway::state::AppState;
use webrtc_gateway::web;
use webrtc_gateway::webrtc::{PeerConfig, PeerManager};

/// Overall budget for teardown after the shutdown signal
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::parse();
    init_logging(&config);
    config.validate()?;

    info!("starting webrtc-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.http_listen_addr,
        socket = %config.ipc_socket_path.display(),
        video_codec = %config.video_codec,
        max_bitrate_kbps = config.max_bitrate_kbps,
        "configuration loaded"
    );

    let stats = Arc::new(GatewayStats::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Peer manager with an empty ICE server list: host candidates are
    // enough on the LAN this gateway targets.
    let peer_config = PeerConfig {
        video_codec: config.video_codec,
        max_bitrate_kbps: Some(config.max_bitrate_kbps),
        ice_servers: vec![],
    };
    let peers = PeerManager::new(peer_config, stats.clone());
    peers.set_on_peer_connected(Box::new(|peer_id| {
        info!("peer {} connected", peer_id);
    }));
    peers.set_on_peer_disconnected(Box::new(|peer_id| {
        info!("peer {} disconnected", peer_id);
    }));

    // Ingest pipeline: producer socket -> bounded queue -> distribution.
    let (queue_tx, queue_rx) = queue::bounded(QueueConfig::default(), stats.clone());
    let ipc = IpcServer::new(
        config.ipc_socket_path.clone(),
        queue_tx,
        stats.clone(),
        shutdown_tx.clone(),
    );
    let ipc_listener = ipc.bind()?;
    let ipc_task = tokio::spawn(ipc.run(ipc_listener));

    let (distributor, metadata_rx) = Distributor::new(queue_rx, peers.clone());
    let distributor_task = tokio::spawn(distributor.run(shutdown_tx.subscribe()));

    let summary_task = tokio::spawn(stats::run_summary(
        stats.clone(),
        peers.clone(),
        shutdown_tx.subscribe(),
    ));

    let state = AppState::new(
        config.clone(),
        peers.clone(),
        stats.clone(),
        metadata_rx,
        shutdown_tx.clone(),
    );
    let app = web::create_router(state);

    let http_listener = tokio::net::TcpListener::bind(config.http_listen_addr).await?;
    info!("signaling server listening on http://{}", config.http_listen_addr);

    // Fan the OS signal into the process-wide shutdown channel.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = signal_tx.send(());
    });

    let mut server_shutdown = shutdown_tx.subscribe();
    axum::serve(http_listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        })
        .await?;
    info!("signaling server stopped");

    // Remaining teardown shares one bounded budget.
    let cleanup = async {
        let _ = ipc_task.await;
        let _ = distributor_task.await;
        let _ = summary_task.await;
        peers.close().await;
    };
    if tokio::time::timeout(SHUTDOWN_BUDGET, cleanup).await.is_err() {
        warn!("shutdown budget exceeded, abandoning remaining tasks");
    }

    info!("shutdown complete");
    Ok(())
}

fn init_logging(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
