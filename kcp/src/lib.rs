//! KCP - reliable ordered delivery over datagrams
//!
//! High-level Rust API: the protocol engine from [`protocol`] and the UDP
//! plumbing from [`io`].
//!
//! ```
//! use kcp::{Config, Connection};
//!
//! let mut wire = Vec::new();
//! let mut conn = Connection::new(Config::new(77), |datagram: &[u8]| {
//!     wire.push(datagram.to_vec());
//! });
//! conn.send(b"ping").unwrap();
//! conn.update(0);
//! drop(conn);
//! assert_eq!(wire.len(), 1);
//! ```

pub use kcp_io as io;
pub use kcp_protocol as protocol;

// Re-export commonly used types
pub use io::{Clock, KcpSocket, SessionTable, UdpOutput};
pub use protocol::{
    Config, Connection, ConnectionStats, Mode, Output, RecvError, SegmentError, SendError,
};
