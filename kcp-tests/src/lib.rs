//! In-process links for driving two connections against each other.
//!
//! A [`LossyLink`] decides the fate of every datagram from a seeded RNG so
//! failures reproduce: each datagram is delivered with probability `px` and
//! additionally held back for one round with probability `pq`, which yields
//! late duplicates and reordering.

use bytes::Bytes;
use kcp::{Config, Connection, Output};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Output that keeps datagrams for the test to relay
#[derive(Debug, Default)]
pub struct Wire {
    pub queue: VecDeque<Bytes>,
}

impl Output for Wire {
    fn output(&mut self, datagram: &[u8]) {
        self.queue.push_back(Bytes::copy_from_slice(datagram));
    }
}

/// One direction of an unreliable link
#[derive(Debug)]
pub struct LossyLink {
    px: f64,
    pq: f64,
    rng: StdRng,
    delayed: VecDeque<Bytes>,
    /// Datagrams offered to the link
    pub offered: u64,
    /// Datagrams that never arrived
    pub dropped: u64,
}

impl LossyLink {
    /// `px` is the delivery probability, `pq` the probability of a late copy
    pub fn new(px: f64, pq: f64, seed: u64) -> Self {
        assert!((0.0..=1.0).contains(&px));
        assert!((0.0..=1.0).contains(&pq));
        LossyLink {
            px,
            pq,
            rng: StdRng::seed_from_u64(seed),
            delayed: VecDeque::new(),
            offered: 0,
            dropped: 0,
        }
    }

    pub fn reliable() -> Self {
        Self::new(1.0, 0.0, 0)
    }

    /// Decide the fate of `datagrams`; returns what arrives this round
    ///
    /// Copies held back by the previous round arrive after this round's
    /// datagrams.
    pub fn carry(&mut self, datagrams: impl IntoIterator<Item = Bytes>) -> Vec<Bytes> {
        let late: Vec<Bytes> = self.delayed.drain(..).collect();
        let mut arrived = Vec::new();
        for datagram in datagrams {
            self.offered += 1;
            let fate: f64 = self.rng.gen();
            let delivered = fate < self.px;
            let queued = fate < self.pq;
            if delivered {
                arrived.push(datagram.clone());
            }
            if queued {
                self.delayed.push_back(datagram);
            }
            if !delivered && !queued {
                self.dropped += 1;
            }
        }
        arrived.extend(late);
        arrived
    }
}

/// Two connections joined by a link in each direction
pub struct Pair {
    pub a: Connection<Wire>,
    pub b: Connection<Wire>,
    pub a_to_b: LossyLink,
    pub b_to_a: LossyLink,
    /// Shared protocol clock (ms)
    pub now: u32,
}

impl Pair {
    pub fn new(config_a: Config, config_b: Config, a_to_b: LossyLink, b_to_a: LossyLink) -> Self {
        Pair {
            a: Connection::new(config_a, Wire::default()),
            b: Connection::new(config_b, Wire::default()),
            a_to_b,
            b_to_a,
            now: 0,
        }
    }

    /// Identical configuration on both ends over a reliable link
    pub fn reliable(config: Config) -> Self {
        Self::new(
            config.clone(),
            config,
            LossyLink::reliable(),
            LossyLink::reliable(),
        )
    }

    /// Start the clock somewhere other than zero
    pub fn starting_at(mut self, now: u32) -> Self {
        self.now = now;
        self
    }

    /// Move A's queued datagrams across the link into B
    pub fn relay_a_to_b(&mut self) {
        let sent: Vec<Bytes> = self.a.output_mut().queue.drain(..).collect();
        for datagram in self.a_to_b.carry(sent) {
            self.b
                .input(&datagram, self.now)
                .expect("well-formed datagram");
        }
    }

    /// Move B's queued datagrams across the link into A
    pub fn relay_b_to_a(&mut self) {
        let sent: Vec<Bytes> = self.b.output_mut().queue.drain(..).collect();
        for datagram in self.b_to_a.carry(sent) {
            self.a
                .input(&datagram, self.now)
                .expect("well-formed datagram");
        }
    }

    /// Update both ends at the current time and relay in both directions
    pub fn step(&mut self) {
        self.a.update(self.now);
        self.relay_a_to_b();
        self.b.update(self.now);
        self.relay_b_to_a();
    }

    /// Advance the clock by `ms` and step
    pub fn tick(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
        self.step();
    }

    /// Everything B can deliver right now
    pub fn drain_b(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.b.recv()).collect()
    }

    /// Tick until B has delivered `count` messages or `max_ticks` pass
    pub fn run_until_delivered(&mut self, count: usize, tick_ms: u32, max_ticks: usize) -> Vec<Bytes> {
        let mut delivered = Vec::new();
        for _ in 0..max_ticks {
            self.tick(tick_ms);
            delivered.extend(self.drain_b());
            if delivered.len() >= count {
                break;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_link_delivers_everything() {
        let mut link = LossyLink::reliable();
        let sent = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        assert_eq!(link.carry(sent.clone()), sent);
        assert_eq!(link.dropped, 0);
    }

    #[test]
    fn test_partition_drops_everything() {
        let mut link = LossyLink::new(0.0, 0.0, 1);
        assert!(link.carry(vec![Bytes::from_static(b"a")]).is_empty());
        assert_eq!(link.dropped, 1);
    }

    #[test]
    fn test_duplicating_link_delivers_late_copy() {
        let mut link = LossyLink::new(1.0, 1.0, 1);
        let first = link.carry(vec![Bytes::from_static(b"a")]);
        assert_eq!(first.len(), 1);
        let second = link.carry(vec![Bytes::from_static(b"b")]);
        assert_eq!(second, vec![Bytes::from_static(b"b"), Bytes::from_static(b"a")]);
    }

    #[test]
    fn test_seeded_link_is_reproducible() {
        let datagrams: Vec<Bytes> = (0..50u8).map(|i| Bytes::from(vec![i])).collect();
        let mut one = LossyLink::new(0.5, 0.0, 42);
        let mut two = LossyLink::new(0.5, 0.0, 42);
        assert_eq!(one.carry(datagrams.clone()), two.carry(datagrams));
    }
}
