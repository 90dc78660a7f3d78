//! KCP CLI Library
//!
//! Shared functionality for the KCP command-line tools.

pub mod config;
pub mod echo;
pub mod stats;

pub use config::{ClientConfig, Config, ConfigError, ServerConfig, TransportConfig};
pub use echo::{first_ping, next_ping, ping_number};
pub use stats::{display_compact_stats, display_connection_stats, format_bytes, SharedStats};

/// Initialise logging for a binary; `RUST_LOG` overrides the default level
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
