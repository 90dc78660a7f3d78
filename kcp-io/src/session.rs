//! Per-peer connection table for listening endpoints
//!
//! A listener shares one socket among many peers. The table creates a
//! [`Connection`] the first time a datagram for the configured conversation
//! arrives from an unseen address and drives every connection once per tick.

use crate::socket::KcpSocket;
use kcp_protocol::{peek_conv, Config, Connection, Output, SegmentError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Output that sends each datagram to one peer over a shared socket
#[derive(Debug, Clone)]
pub struct UdpOutput {
    socket: Arc<KcpSocket>,
    peer: SocketAddr,
    failures: u64,
}

impl UdpOutput {
    pub fn new(socket: Arc<KcpSocket>, peer: SocketAddr) -> Self {
        UdpOutput {
            socket,
            peer,
            failures: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Datagrams the socket refused
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl Output for UdpOutput {
    fn output(&mut self, datagram: &[u8]) {
        // A failed send is a lost datagram; retransmission covers it
        if let Err(e) = self.socket.send_to(datagram, self.peer) {
            self.failures += 1;
            tracing::warn!(peer = %self.peer, len = datagram.len(), error = %e, "Send failed");
        }
    }
}

type OutputFactory<O> = Box<dyn FnMut(SocketAddr) -> O + Send>;

/// Connections keyed by peer address
pub struct SessionTable<O: Output> {
    config: Config,
    make_output: OutputFactory<O>,
    sessions: HashMap<SocketAddr, Connection<O>>,
}

impl SessionTable<UdpOutput> {
    /// Table whose connections answer over `socket`
    pub fn udp(socket: Arc<KcpSocket>, config: Config) -> Self {
        Self::new(config, move |peer| UdpOutput::new(socket.clone(), peer))
    }
}

impl<O: Output> SessionTable<O> {
    /// Create a table; `make_output` builds the output for each new peer
    pub fn new<F>(config: Config, make_output: F) -> Self
    where
        F: FnMut(SocketAddr) -> O + Send + 'static,
    {
        SessionTable {
            config,
            make_output: Box::new(make_output),
            sessions: HashMap::new(),
        }
    }

    /// Route a received datagram to the peer's connection
    ///
    /// Datagrams from unseen peers open a connection only when they carry
    /// the configured conversation id; anything else is dropped. Returns
    /// the number of segments processed.
    pub fn input(&mut self, peer: SocketAddr, datagram: &[u8], now: u32) -> Result<usize, SegmentError> {
        if !self.sessions.contains_key(&peer) {
            if peek_conv(datagram) != Some(self.config.conv) {
                tracing::trace!(%peer, len = datagram.len(), "Ignoring datagram from unknown peer");
                return Ok(0);
            }
            tracing::info!(%peer, conv = self.config.conv, "New session");
            let output = (self.make_output)(peer);
            self.sessions
                .insert(peer, Connection::new(self.config.clone(), output));
        }

        match self.sessions.get_mut(&peer) {
            Some(connection) => connection.input(datagram, now),
            None => Ok(0),
        }
    }

    /// Drive `update` on every connection
    pub fn update(&mut self, now: u32) {
        for connection in self.sessions.values_mut() {
            connection.update(now);
        }
    }

    /// Shortest wait any connection asks for
    pub fn next_deadline(&self, now: u32) -> Duration {
        self.sessions
            .values()
            .map(|connection| connection.next_deadline(now))
            .min()
            .unwrap_or_else(|| Duration::from_millis(self.config.interval as u64))
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<&Connection<O>> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &SocketAddr) -> Option<&mut Connection<O>> {
        self.sessions.get_mut(peer)
    }

    /// Drop a peer's connection; reaping idle peers is the caller's policy
    pub fn remove(&mut self, peer: &SocketAddr) -> Option<Connection<O>> {
        let removed = self.sessions.remove(peer);
        if removed.is_some() {
            tracing::info!(%peer, "Session removed");
        }
        removed
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SocketAddr, &mut Connection<O>)> {
        self.sessions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
