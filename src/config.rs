//! Gateway configuration.
//!
//! Every option is available both as a CLI flag and as a `GATEWAY_*`
//! environment variable, with the flag taking precedence.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::{GatewayError, Result};
use crate::media::frame::VideoCodec;

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for the tracing `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Gateway configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "webrtc-gateway")]
#[command(version, about = "Host-side media gateway: HDMI capture to WebRTC viewers", long_about = None)]
pub struct GatewayConfig {
    /// Unix socket path for the capture producer connection
    #[arg(
        long,
        env = "GATEWAY_IPC_SOCKET_PATH",
        value_name = "PATH",
        default_value = "/tmp/elgato_stream.sock"
    )]
    pub ipc_socket_path: PathBuf,

    /// Bind address for the HTTP signaling server
    #[arg(
        long,
        env = "GATEWAY_HTTP_LISTEN_ADDR",
        value_name = "ADDR",
        default_value = "127.0.0.1:8080"
    )]
    pub http_listen_addr: SocketAddr,

    /// Comma-separated CORS origins; "*" disables origin checking
    #[arg(
        long,
        env = "GATEWAY_ALLOWED_ORIGINS",
        value_name = "ORIGINS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub allowed_origins: Vec<String>,

    /// Video track codec; must match the producer's output
    #[arg(
        long,
        env = "GATEWAY_VIDEO_CODEC",
        value_name = "CODEC",
        default_value = "h264"
    )]
    pub video_codec: VideoCodec,

    /// Maximum video bitrate advertised on the track, in kbps
    #[arg(
        long,
        env = "GATEWAY_MAX_BITRATE_KBPS",
        value_name = "KBPS",
        default_value_t = 5000
    )]
    pub max_bitrate_kbps: u32,

    /// Log verbosity
    #[arg(
        long,
        env = "GATEWAY_LOG_LEVEL",
        value_name = "LEVEL",
        default_value = "info"
    )]
    pub log_level: LogLevel,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ipc_socket_path.as_os_str().is_empty() {
            return Err(GatewayError::Config("IPC socket path cannot be empty".into()));
        }
        if self.allowed_origins.iter().all(|o| o.trim().is_empty()) {
            return Err(GatewayError::Config("allowed origins cannot be empty".into()));
        }
        if !(1..=100_000).contains(&self.max_bitrate_kbps) {
            return Err(GatewayError::Config(
                "max bitrate must be between 1 and 100000 kbps".into(),
            ));
        }
        Ok(())
    }

    /// True when any configured origin is the `*` wildcard.
    pub fn allow_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}
