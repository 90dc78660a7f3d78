//! Connection engine
//!
//! Ties the send and receive pipelines to the timing and congestion state.
//! A [`Connection`] performs no I/O and reads no clock: the caller feeds
//! received datagrams to [`Connection::input`], drives timers through
//! [`Connection::update`] and receives outgoing datagrams through its
//! [`Output`].

use crate::config::Config;
use crate::congestion::{CongestionController, WindowProbe};
use crate::receive::{Arrival, ReceiveBuffer, RecvError};
use crate::rtt::RttEstimator;
use crate::segment::{Command, Segment, SegmentError, SegmentIter, HEADER_SIZE};
use crate::send::{SendBuffer, SendError, TransmitParams};
use crate::sequence::{time_diff, SeqNumber};
use bytes::{Bytes, BytesMut};
use std::time::Duration;

/// Clock differences beyond this (ms) are treated as a jump and resynchronised
const CLOCK_JUMP: i32 = 10_000;

/// Sink for outgoing datagrams
///
/// Called synchronously from [`Connection::flush`]. Transport failures are
/// the implementor's concern; the engine recovers from lost datagrams.
pub trait Output {
    fn output(&mut self, datagram: &[u8]);
}

impl<F> Output for F
where
    F: FnMut(&[u8]),
{
    fn output(&mut self, datagram: &[u8]) {
        self(datagram)
    }
}

/// Connection statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Data segments handed to the output, retransmissions included
    pub segments_sent: u64,
    /// Data segments accepted from the peer
    pub segments_received: u64,
    /// Application bytes accepted by `send`
    pub bytes_sent: u64,
    /// Application bytes delivered by `recv`
    pub bytes_received: u64,
    /// Messages accepted by `send`
    pub messages_sent: u64,
    /// Messages delivered by `recv`
    pub messages_received: u64,
    /// Retransmissions after an RTO expiry
    pub retransmissions: u64,
    /// Retransmissions triggered by skipping acks
    pub fast_retransmissions: u64,
    /// Data segments received more than once
    pub duplicates: u64,
    /// Ack segments emitted
    pub acks_sent: u64,
    /// Datagrams handed to the output
    pub datagrams_sent: u64,
    /// Segments dropped for carrying another conversation id
    pub conv_mismatches: u64,
    /// Smoothed round-trip time (ms)
    pub rtt_ms: u32,
    /// Current retransmission timeout (ms)
    pub rto_ms: u32,
    /// Congestion window (segments)
    pub congestion_window: u32,
    /// Window last advertised by the peer (segments)
    pub remote_window: u32,
    /// Unacknowledged segments
    pub in_flight: usize,
    /// Fragments queued or in flight
    pub waiting: usize,
}

/// Packs segments into datagrams no larger than the MTU
#[derive(Debug)]
struct Packer {
    buf: BytesMut,
    mtu: usize,
}

impl Packer {
    fn new(mtu: usize) -> Self {
        Packer {
            buf: BytesMut::with_capacity(mtu),
            mtu,
        }
    }

    fn push<O: Output>(&mut self, segment: &Segment, output: &mut O, stats: &mut ConnectionStats) {
        if !self.buf.is_empty() && self.buf.len() + segment.size() > self.mtu {
            self.finish(output, stats);
        }
        segment.put(&mut self.buf);
    }

    fn finish<O: Output>(&mut self, output: &mut O, stats: &mut ConnectionStats) {
        if self.buf.is_empty() {
            return;
        }
        output.output(&self.buf);
        self.buf.clear();
        stats.datagrams_sent += 1;
    }
}

/// One end of a reliable conversation
///
/// Generic over the [`Output`] so the caller's routing context (a socket and
/// peer address, a channel, a test harness) travels with the connection.
pub struct Connection<O: Output> {
    config: Config,
    output: O,
    send: SendBuffer,
    recv: ReceiveBuffer,
    rtt: RttEstimator,
    congestion: CongestionController,
    probe: WindowProbe,
    /// Ack obligations `(sn, ts)` for the next flush
    acks: Vec<(SeqNumber, u32)>,
    /// Peer asked for our window, or our window reopened
    tell_window: bool,
    packer: Packer,
    /// Clock value of the last `update`/`flush`
    current: u32,
    /// Clock value of the next scheduled flush
    ts_flush: u32,
    updated: bool,
    stats: ConnectionStats,
}

impl<O: Output> Connection<O> {
    /// Create a new connection
    pub fn new(mut config: Config, output: O) -> Self {
        config.mtu = config.mtu.max(HEADER_SIZE + 1);
        config.interval = config.interval.max(1);
        config.max_rto = config.max_rto.max(config.min_rto);

        let mss = config.max_fragment_payload();
        Connection {
            send: SendBuffer::new(config.conv, mss),
            recv: ReceiveBuffer::new(config.receive_window as u32),
            rtt: RttEstimator::new(config.min_rto, config.max_rto),
            congestion: CongestionController::new(
                mss,
                config.send_window as u32,
                config.receive_window as u32,
                config.no_congestion_control,
            ),
            probe: WindowProbe::new(),
            acks: Vec::new(),
            tell_window: false,
            packer: Packer::new(config.mtu),
            current: 0,
            ts_flush: 0,
            updated: false,
            stats: ConnectionStats::default(),
            output,
            config,
        }
    }

    /// Conversation id
    pub fn conv(&self) -> u32 {
        self.config.conv
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Queue a message for reliable delivery
    ///
    /// Returns the number of fragments it was split into. Nothing is sent
    /// until the next flush.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, SendError> {
        self.send_bytes(Bytes::copy_from_slice(data))
    }

    /// Queue a message without copying it
    pub fn send_bytes(&mut self, data: Bytes) -> Result<usize, SendError> {
        let len = data.len();
        let fragments = self.send.enqueue(data)?;
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += len as u64;
        tracing::trace!(conv = self.config.conv, len, fragments, "Message queued");
        Ok(fragments)
    }

    /// Take the next complete message, if any
    pub fn recv(&mut self) -> Option<Bytes> {
        let was_full = self.recv.is_full();
        let message = self.recv.pop_message()?;
        self.on_delivered(was_full, message.len());
        Some(message)
    }

    /// Copy the next complete message into `buf`
    pub fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        let was_full = self.recv.is_full();
        let len = self.recv.recv_into(buf)?;
        self.on_delivered(was_full, len);
        Ok(len)
    }

    fn on_delivered(&mut self, was_full: bool, len: usize) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += len as u64;
        if was_full && !self.recv.is_full() {
            // Peer may be stalled on our zero window
            self.tell_window = true;
        }
    }

    /// Size of the next complete message, if any
    pub fn peek_size(&self) -> Option<usize> {
        self.recv.peek_size()
    }

    /// Feed one received datagram
    ///
    /// Segments are applied in order. A malformed remainder stops decoding
    /// and is reported after the segments before it were applied. Returns the
    /// number of segments processed for this conversation.
    pub fn input(&mut self, data: &[u8], now: u32) -> Result<usize, SegmentError> {
        let una_before = self.send.oldest_unacked();
        let mut max_ack: Option<SeqNumber> = None;
        let mut processed = 0;
        let mut failure = None;

        for result in SegmentIter::new(Bytes::copy_from_slice(data)) {
            let segment = match result {
                Ok(segment) => segment,
                Err(err) => {
                    tracing::debug!(conv = self.config.conv, error = %err, "Dropping malformed input");
                    failure = Some(err);
                    break;
                }
            };

            if segment.conv != self.config.conv {
                tracing::trace!(
                    expected = self.config.conv,
                    actual = segment.conv,
                    "Ignoring segment for another conversation"
                );
                self.stats.conv_mismatches += 1;
                continue;
            }

            tracing::trace!(
                cmd = %segment.cmd,
                sn = %segment.sn,
                una = %segment.una,
                wnd = segment.wnd,
                len = segment.payload.len(),
                "Segment received"
            );
            processed += 1;

            self.congestion.update_remote_window(segment.wnd);
            self.send.acknowledge_up_to(segment.una);

            match segment.cmd {
                Command::Ack => {
                    let rtt = time_diff(now, segment.ts);
                    if rtt >= 0 {
                        self.rtt.update(rtt as u32);
                    }
                    self.send.acknowledge(segment.sn);
                    max_ack = Some(match max_ack {
                        Some(current) if current.ge(segment.sn) => current,
                        _ => segment.sn,
                    });
                }
                Command::Push => {
                    let (sn, ts) = (segment.sn, segment.ts);
                    let arrival = self.recv.insert(segment);
                    match arrival {
                        Arrival::Accepted => self.stats.segments_received += 1,
                        Arrival::Duplicate => self.stats.duplicates += 1,
                        Arrival::OutOfWindow => {
                            tracing::debug!(sn = %sn, "Data segment beyond receive window");
                        }
                    }
                    if arrival.needs_ack() {
                        self.acks.push((sn, ts));
                    }
                }
                Command::WindowAsk => self.tell_window = true,
                Command::WindowTell => {}
            }
        }

        if let Some(max_ack) = max_ack {
            self.send.record_fast_ack(max_ack);
        }
        if self.send.oldest_unacked().gt(una_before) {
            self.congestion.on_ack_advance();
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(processed),
        }
    }

    /// Advance timers; flushes once per interval
    ///
    /// `now` is a millisecond clock that may wrap. Must be called regularly
    /// even when no data moves.
    pub fn update(&mut self, now: u32) {
        self.current = now;
        if !self.updated {
            self.updated = true;
            self.ts_flush = now;
        }

        let mut slap = time_diff(now, self.ts_flush);
        if !(-CLOCK_JUMP..CLOCK_JUMP).contains(&slap) {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.config.interval);
            if time_diff(now, self.ts_flush) >= 0 {
                self.ts_flush = now.wrapping_add(self.config.interval);
            }
            self.flush(now);
        }
    }

    /// How long the caller may wait before the next `update`
    ///
    /// Advisory: calling earlier or later never corrupts state.
    pub fn next_deadline(&self, now: u32) -> Duration {
        if !self.updated {
            return Duration::ZERO;
        }

        let mut ts_flush = self.ts_flush;
        if !(-CLOCK_JUMP..CLOCK_JUMP).contains(&time_diff(now, ts_flush)) {
            ts_flush = now;
        }
        if time_diff(now, ts_flush) >= 0 {
            return Duration::ZERO;
        }

        let mut minimal = time_diff(ts_flush, now) as u32;
        let deadlines = self
            .send
            .earliest_resend(now)
            .into_iter()
            .chain(self.probe.deadline());
        for deadline in deadlines {
            let diff = time_diff(deadline, now);
            if diff <= 0 {
                return Duration::ZERO;
            }
            minimal = minimal.min(diff as u32);
        }

        Duration::from_millis(minimal.min(self.config.interval) as u64)
    }

    /// Emit pending acks, window probes and data now
    pub fn flush(&mut self, now: u32) {
        self.current = now;

        let Connection {
            config,
            output,
            send,
            recv,
            rtt,
            congestion,
            probe,
            acks,
            tell_window,
            packer,
            stats,
            ..
        } = self;

        let mut header = Segment::new(config.conv, Command::Ack);
        header.wnd = recv.unused_window();
        header.una = recv.next_expected();

        for (sn, ts) in acks.drain(..) {
            header.sn = sn;
            header.ts = ts;
            packer.push(&header, output, stats);
            stats.acks_sent += 1;
        }
        header.sn = SeqNumber::new(0);
        header.ts = 0;

        if probe.poll(congestion.remote_window(), now) {
            tracing::debug!(conv = config.conv, "Probing zero remote window");
            header.cmd = Command::WindowAsk;
            packer.push(&header, output, stats);
        }
        if std::mem::take(tell_window) {
            header.cmd = Command::WindowTell;
            packer.push(&header, output, stats);
        }

        let limit = congestion.window_limit();
        send.admit(limit);

        let params = TransmitParams {
            now,
            rto: rtt.rto(),
            max_rto: rtt.max_rto(),
            nodelay: config.nodelay,
            fast_resend: config.fast_resend,
            fast_limit: config.fast_limit,
            rto_backoff: config.rto_backoff,
            wnd: header.wnd,
            una: header.una,
        };
        let summary = send.transmit(&params, |segment| {
            tracing::trace!(sn = %segment.sn, frg = segment.frg, "Sending segment");
            packer.push(segment, output, stats);
        });
        packer.finish(output, stats);

        stats.segments_sent += summary.total() as u64;
        stats.retransmissions += summary.timeouts as u64;
        stats.fast_retransmissions += summary.fast as u64;

        if summary.fast > 0 {
            congestion.on_fast_retransmit(send.in_flight_span(), config.fast_resend);
            tracing::debug!(cwnd = congestion.congestion_window(), "Window reduced after fast retransmit");
        }
        if summary.timeouts > 0 {
            congestion.on_timeout();
            tracing::debug!(cwnd = congestion.congestion_window(), "Window reset after timeout");
        }
    }

    /// Unacknowledged segments
    pub fn in_flight(&self) -> usize {
        self.send.in_flight()
    }

    /// Fragments queued or in flight
    pub fn waiting(&self) -> usize {
        self.send.waiting()
    }

    /// Window last advertised by the peer
    pub fn remote_window(&self) -> u32 {
        self.congestion.remote_window()
    }

    /// Current admission limit (segments)
    pub fn window_limit(&self) -> u32 {
        self.congestion.window_limit()
    }

    /// Window we currently advertise
    pub fn local_window(&self) -> u16 {
        self.recv.unused_window()
    }

    /// Get connection statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            rtt_ms: self.rtt.srtt(),
            rto_ms: self.rtt.rto(),
            congestion_window: self.congestion.congestion_window(),
            remote_window: self.congestion.remote_window(),
            in_flight: self.send.in_flight(),
            waiting: self.send.waiting(),
            ..self.stats
        }
    }
}

impl<O: Output> std::fmt::Debug for Connection<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("conv", &self.config.conv)
            .field("current", &self.current)
            .field("in_flight", &self.send.in_flight())
            .field("waiting", &self.send.waiting())
            .field("pending", &self.recv.pending())
            .finish()
    }
}
