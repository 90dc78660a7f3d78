//! Congestion and flow control
//!
//! Window-based control counted in segments: slow start below `ssthresh`,
//! byte-counted congestion avoidance above it, and two decrease rules (a
//! mild one for fast retransmission, a hard reset for timeouts). The remote
//! advertised window caps everything, and [`WindowProbe`] keeps a
//! connection with a zero remote window from stalling forever.

use crate::sequence::time_diff;

/// Initial slow start threshold (segments)
pub const THRESH_INIT: u32 = 2;

/// Lower bound for the slow start threshold (segments)
pub const THRESH_MIN: u32 = 2;

/// First zero-window probe delay (ms)
pub const PROBE_INIT: u32 = 7_000;

/// Upper bound on the zero-window probe delay (ms)
pub const PROBE_LIMIT: u32 = 120_000;

/// Congestion control state
#[derive(Debug, Clone)]
pub struct CongestionController {
    /// Congestion window (segments)
    congestion_window: u32,
    /// Slow start threshold (segments)
    ssthresh: u32,
    /// Byte counter driving congestion avoidance growth
    incr: u32,
    /// Maximum segment payload (bytes)
    mss: u32,
    /// Window last advertised by the peer (segments)
    remote_window: u32,
    /// Local send window (segments)
    send_window: u32,
    /// Ignore the congestion window when computing the admission limit
    disabled: bool,
}

impl CongestionController {
    /// Create a new congestion controller
    ///
    /// # Arguments
    /// * `mss` - Maximum payload per segment in bytes
    /// * `send_window` - Local send window in segments
    /// * `initial_remote_window` - Remote window assumed before the peer speaks
    /// * `disabled` - Whether the congestion window is bypassed
    pub fn new(mss: usize, send_window: u32, initial_remote_window: u32, disabled: bool) -> Self {
        let mss = mss.min(u32::MAX as usize) as u32;
        CongestionController {
            congestion_window: 1,
            ssthresh: THRESH_INIT,
            incr: mss,
            mss,
            remote_window: initial_remote_window,
            send_window: send_window.max(1),
            disabled,
        }
    }

    /// Get current congestion window size
    pub fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    /// Get the slow start threshold
    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Get the last window advertised by the peer
    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    /// Maximum number of unacknowledged segments the sender may have out
    ///
    /// min(send window, remote window), further capped by the congestion
    /// window unless congestion control is disabled.
    pub fn window_limit(&self) -> u32 {
        let limit = self.send_window.min(self.remote_window);
        if self.disabled {
            limit
        } else {
            limit.min(self.congestion_window)
        }
    }

    /// Update flow window (from peer's advertised receive window)
    pub fn update_remote_window(&mut self, window: u16) {
        self.remote_window = window as u32;
    }

    /// Grow the window after the cumulative ack advanced
    pub fn on_ack_advance(&mut self) {
        if self.disabled || self.congestion_window >= self.remote_window {
            return;
        }

        let mss = self.mss;
        if self.congestion_window < self.ssthresh {
            // Slow start: one segment per advancing ack
            self.congestion_window += 1;
            self.incr = self.incr.saturating_add(mss);
        } else {
            // Congestion avoidance: roughly one segment per window of acks
            if self.incr < mss {
                self.incr = mss;
            }
            let step = (mss as u64 * mss as u64 / self.incr.max(1) as u64) as u32 + mss / 16;
            self.incr = self.incr.saturating_add(step);
            if (self.congestion_window as u64 + 1) * mss as u64 <= self.incr as u64 {
                let grown = (self.incr as u64 + mss as u64 - 1) / mss.max(1) as u64;
                self.congestion_window = grown.min(u32::MAX as u64) as u32;
            }
        }

        if self.congestion_window > self.remote_window {
            self.congestion_window = self.remote_window;
            self.incr = self.remote_window.saturating_mul(mss);
        }
    }

    /// Mild decrease after fast retransmission
    pub fn on_fast_retransmit(&mut self, in_flight: u32, fast_resend: u32) {
        if self.disabled {
            return;
        }
        self.ssthresh = (in_flight / 2).max(THRESH_MIN);
        self.congestion_window = self.ssthresh + fast_resend;
        self.incr = self.congestion_window.saturating_mul(self.mss);
    }

    /// Multiplicative decrease after a retransmission timeout
    pub fn on_timeout(&mut self) {
        if self.disabled {
            return;
        }
        self.ssthresh = (self.congestion_window / 2).max(THRESH_MIN);
        self.congestion_window = 1;
        self.incr = self.mss;
    }

    /// Get statistics
    pub fn stats(&self) -> CongestionStats {
        CongestionStats {
            congestion_window: self.congestion_window,
            remote_window: self.remote_window,
            ssthresh: self.ssthresh,
            slow_start: self.congestion_window < self.ssthresh,
        }
    }
}

/// Congestion control statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CongestionStats {
    /// Current congestion window
    pub congestion_window: u32,
    /// Window last advertised by the peer
    pub remote_window: u32,
    /// Slow start threshold
    pub ssthresh: u32,
    /// Whether in slow start phase
    pub slow_start: bool,
}

/// Zero-window probe timer
///
/// While the peer advertises a zero window nothing new may be sent, so
/// nothing would ever carry the peer's updated window back. The probe asks
/// for it after [`PROBE_INIT`] ms and backs off by half again each time, up
/// to [`PROBE_LIMIT`].
#[derive(Debug, Clone, Default)]
pub struct WindowProbe {
    /// Current probe delay (ms); 0 when idle
    wait: u32,
    /// Clock value at which the next probe fires
    deadline: u32,
}

impl WindowProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the timer; returns true when a window ask should be sent now
    pub fn poll(&mut self, remote_window: u32, now: u32) -> bool {
        if remote_window != 0 {
            self.wait = 0;
            self.deadline = 0;
            return false;
        }

        if self.wait == 0 {
            self.wait = PROBE_INIT;
            self.deadline = now.wrapping_add(self.wait);
            return false;
        }

        if time_diff(now, self.deadline) >= 0 {
            self.wait = (self.wait + self.wait / 2).clamp(PROBE_INIT, PROBE_LIMIT);
            self.deadline = now.wrapping_add(self.wait);
            return true;
        }
        false
    }

    /// Clock value of the next probe, if armed
    pub fn deadline(&self) -> Option<u32> {
        (self.wait != 0).then_some(self.deadline)
    }
}
