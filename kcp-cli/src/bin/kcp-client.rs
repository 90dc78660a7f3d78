//! KCP Echo Client
//!
//! Opens a conversation with an echo server and keeps a numbered ping
//! bouncing. Received datagrams can be dropped on purpose to watch the
//! protocol recover; lines typed on stdin are sent as extra messages.

use anyhow::Context;
use clap::Parser;
use crossbeam::channel::{self, Receiver, TryRecvError};
use kcp::{Clock, Connection, KcpSocket, RecvError, UdpOutput};
use kcp_cli::config::{ClientConfig, Config, TransportConfig};
use kcp_cli::echo::{first_ping, next_ping, ping_number};
use kcp_cli::stats::{display_compact_stats, display_connection_stats, SharedStats};
use rand::Rng;
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_WAIT: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "kcp-client")]
#[command(about = "KCP echo client", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:39603")]
    server: SocketAddr,

    /// Conversation id
    #[arg(long, default_value = "1001")]
    conv: u32,

    /// Latency profile (normal, nodelay-fast, aggressive-fast)
    #[arg(short, long, default_value = "normal")]
    mode: String,

    /// Percentage of received datagrams to drop
    #[arg(short, long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
    drop_rate: u8,

    /// Largest message accepted from the server
    #[arg(long, default_value = "1024")]
    max_recv_size: usize,

    /// Stop after this many echoes (0 runs forever)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Send lines read from stdin as extra messages
    #[arg(long)]
    stdin: bool,

    /// TOML configuration file; its [client] table replaces the flags above
    #[arg(short, long)]
    config: Option<String>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long, default_value = "1")]
    stats: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        if let Some(path) = &self.config {
            let config = Config::from_file(path)
                .with_context(|| format!("Failed to load config '{}'", path))?;
            return config
                .client
                .ok_or_else(|| anyhow::anyhow!("No [client] table in '{}'", path));
        }

        Ok(ClientConfig {
            server: self.server,
            transport: TransportConfig {
                conv: self.conv,
                mode: self.mode.clone(),
                ..TransportConfig::default()
            },
            drop_rate: self.drop_rate,
            max_recv_size: self.max_recv_size,
            count: self.count,
            stats_interval_secs: self.stats,
        })
    }
}

/// Forward stdin lines to the I/O loop
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn spawn_stats_reporter(shared: SharedStats, interval: Duration, clock: Clock) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        display_compact_stats(&shared.snapshot(), clock.elapsed());
    });
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    kcp_cli::init_logging(args.verbose);

    let config = args.client_config()?;
    let protocol = config.transport.to_protocol()?;
    let server = config.server;

    let socket = Arc::new(KcpSocket::bind_for(server)?);
    tracing::info!(
        "KCP client {} -> {} (conv {}, mode {}, drop {}%)",
        socket.local_addr()?,
        server,
        protocol.conv,
        protocol.mode,
        config.drop_rate
    );

    let mut connection = Connection::new(protocol, UdpOutput::new(socket.clone(), server));
    let clock = Clock::new();
    let shared = SharedStats::new();
    if config.stats_interval_secs > 0 {
        spawn_stats_reporter(shared.clone(), config.stats_interval(), clock);
    }
    let lines = args.stdin.then(spawn_stdin_reader);

    let mut rng = rand::thread_rng();
    let uid: u32 = rng.gen_range(10000..100000);
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    tracing::info!("uid: {}", uid);
    connection.send(first_ping(uid, unix_secs).as_bytes())?;

    let mut datagram = vec![0u8; 65536];
    let mut message = vec![0u8; config.max_recv_size];
    let mut echoes = 0u64;
    let mut dropped = 0u64;

    loop {
        let now = clock.now_ms();
        let wait = connection.next_deadline(now).min(MAX_WAIT);

        if let Some((n, from)) = socket.recv_from_timeout(&mut datagram, wait)? {
            if from != server {
                tracing::debug!(%from, "Ignoring datagram from unexpected peer");
            } else if rng.gen_range(0..100u8) < config.drop_rate {
                dropped += 1;
                tracing::debug!(dropped, "drop.");
            } else if let Err(e) = connection.input(&datagram[..n], clock.now_ms()) {
                tracing::debug!(error = %e, "Malformed datagram");
            }
        }

        loop {
            let len = match connection.recv_into(&mut message) {
                Ok(len) => len,
                Err(RecvError::WouldBlock) => break,
                Err(e @ RecvError::BufferTooSmall { .. }) => {
                    tracing::warn!(error = %e, "Discarding oversized message");
                    connection.recv();
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&message[..len]).into_owned();
            tracing::info!(size = len, "{}", text);
            if ping_number(&text).is_none() {
                continue;
            }
            echoes += 1;
            if config.count > 0 && echoes >= config.count {
                continue;
            }
            if let Some(reply) = next_ping(&text) {
                connection.send(reply.as_bytes())?;
            }
        }

        if let Some(lines) = &lines {
            loop {
                match lines.try_recv() {
                    Ok(line) => {
                        connection.send(line.as_bytes())?;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }

        connection.update(clock.now_ms());
        shared.publish(connection.stats());

        if config.count > 0 && echoes >= config.count && connection.waiting() == 0 {
            break;
        }
    }

    tracing::info!(echoes, dropped, "Done");
    display_connection_stats(&connection.stats());
    Ok(())
}
