//! Connection configuration
//!
//! A [`Config`] is fixed at construction time. Operating modes bundle the
//! latency-related knobs into a closed set of presets; individual values can
//! still be overridden through the builder methods afterwards.

use crate::segment::HEADER_SIZE;
use std::fmt;
use std::str::FromStr;

/// Default MTU (bytes per datagram, header included)
pub const DEFAULT_MTU: usize = 1400;

/// Default send window (segments)
pub const DEFAULT_SEND_WINDOW: u16 = 32;

/// Default receive window (segments)
pub const DEFAULT_RECEIVE_WINDOW: u16 = 128;

/// Default retransmission timeout before any RTT sample (ms)
pub const DEFAULT_RTO: u32 = 200;

/// Default RTO floor when no-delay is off (ms)
pub const DEFAULT_MIN_RTO: u32 = 100;

/// RTO floor in no-delay modes (ms)
pub const NODELAY_MIN_RTO: u32 = 30;

/// RTO floor in the aggressive mode (ms)
pub const AGGRESSIVE_MIN_RTO: u32 = 10;

/// Upper RTO bound (ms)
pub const DEFAULT_MAX_RTO: u32 = 60_000;

/// Fast retransmissions allowed per segment before only timeouts apply
pub const DEFAULT_FAST_LIMIT: u32 = 5;

/// Latency profile presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Conservative: timer-driven retransmission, doubled RTO backoff,
    /// congestion control on, no fast retransmission.
    #[default]
    Normal,
    /// Low latency with congestion control: no-delay RTO handling and fast
    /// retransmission after two skipping acks.
    NoDelayFast,
    /// Lowest latency: no-delay, fast retransmission and congestion control
    /// disabled, with a 10 ms RTO floor.
    AggressiveFast,
}

/// Values a [`Mode`] stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeParams {
    /// Skip the RTO/8 grace on first transmission and back off by 1.5x
    pub nodelay: bool,
    /// Flush interval (ms)
    pub interval: u32,
    /// Fast retransmission threshold in skipping acks (0 disables)
    pub fast_resend: u32,
    /// Ignore the congestion window when admitting segments
    pub no_congestion_control: bool,
    /// RTO floor (ms)
    pub min_rto: u32,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Normal, Mode::NoDelayFast, Mode::AggressiveFast];

    pub fn params(self) -> ModeParams {
        match self {
            Mode::Normal => ModeParams {
                nodelay: false,
                interval: 10,
                fast_resend: 0,
                no_congestion_control: false,
                min_rto: DEFAULT_MIN_RTO,
            },
            Mode::NoDelayFast => ModeParams {
                nodelay: true,
                interval: 10,
                fast_resend: 2,
                no_congestion_control: false,
                min_rto: NODELAY_MIN_RTO,
            },
            Mode::AggressiveFast => ModeParams {
                nodelay: true,
                interval: 10,
                fast_resend: 2,
                no_congestion_control: true,
                min_rto: AGGRESSIVE_MIN_RTO,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::NoDelayFast => "nodelay-fast",
            Mode::AggressiveFast => "aggressive-fast",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" | "0" => Ok(Mode::Normal),
            "nodelay-fast" | "fast" => Ok(Mode::NoDelayFast),
            "aggressive-fast" | "aggressive" | "2" => Ok(Mode::AggressiveFast),
            other => Err(format!("Invalid mode: {}", other)),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Conversation id; must match the peer
    pub conv: u32,
    /// Send window (segments)
    pub send_window: u16,
    /// Receive window (segments)
    pub receive_window: u16,
    /// Preset the latency knobs were taken from
    pub mode: Mode,
    /// See [`ModeParams::nodelay`]
    pub nodelay: bool,
    /// Flush interval (ms)
    pub interval: u32,
    /// Fast retransmission threshold (0 disables)
    pub fast_resend: u32,
    /// Fast retransmissions per segment before falling back to timeouts (0 = unlimited)
    pub fast_limit: u32,
    /// Disable the congestion window
    pub no_congestion_control: bool,
    /// Maximum datagram size, header included
    pub mtu: usize,
    /// RTO floor (ms)
    pub min_rto: u32,
    /// RTO ceiling (ms)
    pub max_rto: u32,
    /// Multiplier applied to a segment's RTO on each timeout
    pub rto_backoff: f64,
}

impl Config {
    /// Create a configuration in [`Mode::Normal`]
    pub fn new(conv: u32) -> Self {
        Config {
            conv,
            send_window: DEFAULT_SEND_WINDOW,
            receive_window: DEFAULT_RECEIVE_WINDOW,
            mode: Mode::Normal,
            nodelay: false,
            interval: 10,
            fast_resend: 0,
            fast_limit: DEFAULT_FAST_LIMIT,
            no_congestion_control: false,
            mtu: DEFAULT_MTU,
            min_rto: DEFAULT_MIN_RTO,
            max_rto: DEFAULT_MAX_RTO,
            rto_backoff: 2.0,
        }
        .with_mode(Mode::Normal)
    }

    /// Apply a mode preset, replacing every knob it covers
    pub fn with_mode(mut self, mode: Mode) -> Self {
        let params = mode.params();
        self.mode = mode;
        self.nodelay = params.nodelay;
        self.interval = params.interval;
        self.fast_resend = params.fast_resend;
        self.no_congestion_control = params.no_congestion_control;
        self.min_rto = params.min_rto;
        self.rto_backoff = if params.nodelay { 1.5 } else { 2.0 };
        self
    }

    /// Set send and receive windows (segments, at least 1)
    pub fn with_windows(mut self, send_window: u16, receive_window: u16) -> Self {
        self.send_window = send_window.max(1);
        self.receive_window = receive_window.max(1);
        self
    }

    /// Set the MTU; values below the header size plus one byte are raised
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(HEADER_SIZE + 1);
        self
    }

    /// Set the MTU through the largest payload a single fragment may carry
    pub fn with_max_fragment_payload(self, payload: usize) -> Self {
        self.with_mtu(payload + HEADER_SIZE)
    }

    /// Set the flush interval, clamped to 10..=5000 ms
    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval.clamp(10, 5000);
        self
    }

    /// Set the RTO bounds (ms)
    pub fn with_rto_bounds(mut self, min_rto: u32, max_rto: u32) -> Self {
        self.min_rto = min_rto.max(1);
        self.max_rto = max_rto.max(self.min_rto);
        self
    }

    /// Override the fast retransmission threshold (0 disables)
    pub fn with_fast_resend(mut self, threshold: u32) -> Self {
        self.fast_resend = threshold;
        self
    }

    /// Override the timeout backoff multiplier (at least 1.0)
    pub fn with_rto_backoff(mut self, factor: f64) -> Self {
        self.rto_backoff = if factor.is_finite() { factor.max(1.0) } else { 2.0 };
        self
    }

    /// Largest payload carried by one fragment
    #[inline]
    pub fn max_fragment_payload(&self) -> usize {
        self.mtu - HEADER_SIZE
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(0)
    }
}
