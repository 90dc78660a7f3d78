//! KCP Echo Server
//!
//! Accepts KCP conversations from any number of UDP peers and sends every
//! message straight back to its sender.

use anyhow::Context;
use clap::Parser;
use kcp::io::Timer;
use kcp::{Clock, KcpSocket, SessionTable};
use kcp_cli::config::{Config, ServerConfig, TransportConfig};
use kcp_cli::stats::display_compact_stats;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Longest the loop sleeps in the socket, so new peers are served promptly
const MAX_WAIT: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "kcp-echo-server")]
#[command(about = "KCP echo server", long_about = None)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:39603")]
    listen: SocketAddr,

    /// Conversation id
    #[arg(long, default_value = "1001")]
    conv: u32,

    /// Latency profile (normal, nodelay-fast, aggressive-fast)
    #[arg(short, long, default_value = "aggressive-fast")]
    mode: String,

    /// TOML configuration file; its [server] table replaces the flags above
    #[arg(short, long)]
    config: Option<String>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long, default_value = "5")]
    stats: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        if let Some(path) = &self.config {
            let config = Config::from_file(path)
                .with_context(|| format!("Failed to load config '{}'", path))?;
            return config
                .server
                .ok_or_else(|| anyhow::anyhow!("No [server] table in '{}'", path));
        }

        Ok(ServerConfig {
            listen: self.listen,
            transport: TransportConfig {
                conv: self.conv,
                mode: self.mode.clone(),
                ..TransportConfig::default()
            },
            stats_interval_secs: self.stats,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    kcp_cli::init_logging(args.verbose);

    let config = args.server_config()?;
    let protocol = config.transport.to_protocol()?;

    let socket = Arc::new(KcpSocket::bind(config.listen)?);
    tracing::info!(
        "KCP echo server listening on {} (conv {}, mode {})",
        socket.local_addr()?,
        protocol.conv,
        protocol.mode
    );

    let mut sessions = SessionTable::udp(socket.clone(), protocol);
    let clock = Clock::new();
    let mut stats_timer = Timer::new(config.stats_interval());
    let mut buffer = vec![0u8; 65536];

    loop {
        let now = clock.now_ms();
        let wait = sessions.next_deadline(now).min(MAX_WAIT);

        if let Some((n, peer)) = socket.recv_from_timeout(&mut buffer, wait)? {
            let now = clock.now_ms();
            if let Err(e) = sessions.input(peer, &buffer[..n], now) {
                tracing::debug!(%peer, error = %e, "Malformed datagram");
            }

            if let Some(connection) = sessions.get_mut(&peer) {
                while let Some(message) = connection.recv() {
                    tracing::info!(
                        %peer,
                        size = message.len(),
                        "{}",
                        String::from_utf8_lossy(&message)
                    );
                    if let Err(e) = connection.send_bytes(message) {
                        tracing::warn!(%peer, error = %e, "Echo dropped");
                    }
                }
                // Answer without waiting for the next tick
                connection.flush(now);
            }
        }

        sessions.update(clock.now_ms());

        if config.stats_interval_secs > 0 && stats_timer.try_fire() {
            for (peer, connection) in sessions.iter_mut() {
                tracing::info!(%peer, "Session stats");
                display_compact_stats(&connection.stats(), clock.elapsed());
            }
        }
    }
}
