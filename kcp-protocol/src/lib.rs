//! KCP Protocol Core Implementation
//!
//! This crate implements the per-connection engine of a KCP-style reliable
//! ARQ transport: segment framing, sliding-window send and receive queues,
//! selective and cumulative acknowledgement, RTT estimation, fast
//! retransmission, congestion and flow control, and fragmentation.
//!
//! The engine does no I/O and reads no clock. Datagrams go out through an
//! [`Output`], come in through [`Connection::input`], and time advances
//! through [`Connection::update`].

pub mod config;
pub mod congestion;
pub mod connection;
pub mod receive;
pub mod rtt;
pub mod segment;
pub mod send;
pub mod sequence;

pub use config::{Config, Mode, ModeParams};
pub use congestion::{CongestionController, CongestionStats, WindowProbe};
pub use connection::{Connection, ConnectionStats, Output};
pub use receive::{Arrival, ReceiveBuffer, RecvError};
pub use rtt::RttEstimator;
pub use segment::{peek_conv, Command, Segment, SegmentError, SegmentIter, HEADER_SIZE};
pub use send::{SendBuffer, SendError, MAX_FRAGMENTS};
pub use sequence::{time_diff, SeqNumber};
