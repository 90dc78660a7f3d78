//! Statistics display and formatting

use kcp::ConnectionStats;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format an RTT given in milliseconds
pub fn format_rtt(rtt_ms: u32) -> String {
    if rtt_ms >= 1_000 {
        format!("{:.2}s", rtt_ms as f64 / 1_000.0)
    } else {
        format!("{}ms", rtt_ms)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Share of data segments that were retransmissions, in percent
pub fn retransmit_ratio(stats: &ConnectionStats) -> f64 {
    if stats.segments_sent == 0 {
        return 0.0;
    }
    let resent = stats.retransmissions + stats.fast_retransmissions;
    resent as f64 * 100.0 / stats.segments_sent as f64
}

/// Latest statistics published by the I/O loop for a reporter thread
#[derive(Debug, Clone, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<ConnectionStats>>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, stats: ConnectionStats) {
        *self.inner.lock() = stats;
    }

    pub fn snapshot(&self) -> ConnectionStats {
        *self.inner.lock()
    }
}

/// Render connection statistics as a table
pub fn render_connection_stats(stats: &ConnectionStats) -> String {
    let mut out = String::new();
    out.push_str("┌──────────────────────────────────────────────┐\n");
    out.push_str("│ CONNECTION STATISTICS                        │\n");
    out.push_str("├──────────────────────────────────────────────┤\n");
    out.push_str(&format!(
        "│ Messages:  {} sent / {} received\n",
        stats.messages_sent, stats.messages_received
    ));
    out.push_str(&format!(
        "│ Bytes:     {} sent / {} received\n",
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received)
    ));
    out.push_str(&format!(
        "│ Segments:  {} sent / {} received / {} dup\n",
        stats.segments_sent, stats.segments_received, stats.duplicates
    ));
    out.push_str(&format!(
        "│ Resent:    {} timeout / {} fast ({:.1}%)\n",
        stats.retransmissions,
        stats.fast_retransmissions,
        retransmit_ratio(stats)
    ));
    out.push_str(&format!(
        "│ RTT:       {} (rto {})\n",
        format_rtt(stats.rtt_ms),
        format_rtt(stats.rto_ms)
    ));
    out.push_str(&format!(
        "│ Window:    cwnd {} / remote {} / in flight {}\n",
        stats.congestion_window, stats.remote_window, stats.in_flight
    ));
    out.push_str("└──────────────────────────────────────────────┘");
    out
}

/// Display connection statistics
pub fn display_connection_stats(stats: &ConnectionStats) {
    println!("\n{}", render_connection_stats(stats));
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &ConnectionStats, elapsed: Duration) {
    tracing::info!(
        "[{:8}] msgs {}/{} | rtt {} | resent {:.1}% | in flight {} | waiting {}",
        format_duration(elapsed),
        stats.messages_sent,
        stats.messages_received,
        format_rtt(stats.rtt_ms),
        retransmit_ratio(stats),
        stats.in_flight,
        stats.waiting
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_format_rtt() {
        assert_eq!(format_rtt(45), "45ms");
        assert_eq!(format_rtt(2_500), "2.50s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_retransmit_ratio() {
        let stats = ConnectionStats {
            segments_sent: 200,
            retransmissions: 10,
            fast_retransmissions: 30,
            ..ConnectionStats::default()
        };
        assert_eq!(retransmit_ratio(&stats), 20.0);
        assert_eq!(retransmit_ratio(&ConnectionStats::default()), 0.0);
    }

    #[test]
    fn test_shared_stats_snapshot() {
        let shared = SharedStats::new();
        let reader = shared.clone();
        shared.publish(ConnectionStats {
            messages_sent: 3,
            ..ConnectionStats::default()
        });
        assert_eq!(reader.snapshot().messages_sent, 3);
    }

    #[test]
    fn test_render_mentions_counters() {
        let stats = ConnectionStats {
            messages_sent: 7,
            rtt_ms: 12,
            ..ConnectionStats::default()
        };
        let table = render_connection_stats(&stats);
        assert!(table.contains("7 sent"));
        assert!(table.contains("12ms"));
    }
}
