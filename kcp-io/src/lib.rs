//! KCP I/O and Platform Abstraction
//!
//! This crate provides what the protocol engine deliberately leaves to its
//! caller: a UDP socket wrapper, a millisecond protocol clock and a table of
//! per-peer connections for listening endpoints.

pub mod session;
pub mod socket;
pub mod time;

pub use session::{SessionTable, UdpOutput};
pub use socket::{KcpSocket, SocketError};
pub use time::{Clock, Timer, Timestamp};
