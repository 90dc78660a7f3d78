//! Send pipeline
//!
//! Application messages are fragmented into the pending queue, admitted into
//! the in-flight window as the window limit allows, and kept there until
//! acknowledged. Each flush walks the in-flight segments and decides which
//! need a first transmission, a timeout retransmission or a fast
//! retransmission.

use crate::segment::Segment;
use crate::sequence::{time_diff, SeqNumber};
use bytes::Bytes;
use std::collections::VecDeque;
use thiserror::Error;

/// Most fragments one message may be split into (the `frg` field is a u8)
pub const MAX_FRAGMENTS: usize = u8::MAX as usize + 1;

/// Send errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Payload too large: {size} bytes needs {fragments} fragments (max {max})")]
    PayloadTooLarge {
        size: usize,
        fragments: usize,
        max: usize,
    },
}

/// An admitted segment and its retransmission state
#[derive(Debug, Clone)]
struct InFlight {
    segment: Segment,
    /// Clock value at which the segment is resent if still unacked
    resend_ts: u32,
    /// Segment's own RTO (ms), backed off on each timeout
    rto: u32,
    /// Acks for later sequence numbers seen while this one was outstanding
    fast_ack: u32,
    /// Transmissions so far
    xmit: u32,
}

/// Inputs to one transmission pass
#[derive(Debug, Clone, Copy)]
pub struct TransmitParams {
    pub now: u32,
    /// Current RTO from the estimator (ms)
    pub rto: u32,
    pub max_rto: u32,
    pub nodelay: bool,
    /// Fast retransmission threshold (0 disables)
    pub fast_resend: u32,
    /// Fast retransmissions per segment (0 = unlimited)
    pub fast_limit: u32,
    pub rto_backoff: f64,
    /// Window to advertise in the outgoing headers
    pub wnd: u16,
    /// Cumulative ack to carry in the outgoing headers
    pub una: SeqNumber,
}

/// Outcome of one transmission pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitSummary {
    /// First transmissions
    pub fresh: u32,
    /// Retransmissions caused by an expired RTO
    pub timeouts: u32,
    /// Retransmissions caused by skipping acks
    pub fast: u32,
}

impl TransmitSummary {
    pub fn total(&self) -> u32 {
        self.fresh + self.timeouts + self.fast
    }
}

/// Send side of a connection
#[derive(Debug)]
pub struct SendBuffer {
    conv: u32,
    /// Maximum payload per fragment
    mss: usize,
    /// Fragments not yet admitted to the window
    queue: VecDeque<Segment>,
    /// Admitted, unacknowledged segments in sequence order
    flight: VecDeque<InFlight>,
    /// Next sequence number to assign (snd_nxt)
    next_seq: SeqNumber,
    /// Oldest unacknowledged sequence number (snd_una)
    oldest_unacked: SeqNumber,
}

impl SendBuffer {
    /// Create a new send buffer
    pub fn new(conv: u32, mss: usize) -> Self {
        SendBuffer {
            conv,
            mss: mss.max(1),
            queue: VecDeque::new(),
            flight: VecDeque::new(),
            next_seq: SeqNumber::new(0),
            oldest_unacked: SeqNumber::new(0),
        }
    }

    /// Split a message into fragments and queue them
    ///
    /// Returns the number of fragments queued.
    pub fn enqueue(&mut self, payload: Bytes) -> Result<usize, SendError> {
        let fragments = if payload.is_empty() {
            1
        } else {
            (payload.len() + self.mss - 1) / self.mss
        };

        if fragments > MAX_FRAGMENTS {
            return Err(SendError::PayloadTooLarge {
                size: payload.len(),
                fragments,
                max: MAX_FRAGMENTS,
            });
        }

        for index in 0..fragments {
            let start = (index * self.mss).min(payload.len());
            let end = (start + self.mss).min(payload.len());
            let frg = (fragments - index - 1) as u8;
            self.queue
                .push_back(Segment::push(self.conv, frg, payload.slice(start..end)));
        }

        Ok(fragments)
    }

    /// Admit queued fragments while `next_seq - oldest_unacked < limit`
    ///
    /// Returns how many were admitted.
    pub fn admit(&mut self, limit: u32) -> usize {
        let mut admitted = 0;
        while self.oldest_unacked.distance_to(self.next_seq) < limit.min(i32::MAX as u32) as i32 {
            let Some(mut segment) = self.queue.pop_front() else {
                break;
            };
            segment.sn = self.next_seq;
            self.next_seq.increment();
            self.flight.push_back(InFlight {
                segment,
                resend_ts: 0,
                rto: 0,
                fast_ack: 0,
                xmit: 0,
            });
            admitted += 1;
        }
        admitted
    }

    /// Run one transmission pass, handing each segment that goes out to `emit`
    pub fn transmit<F>(&mut self, params: &TransmitParams, mut emit: F) -> TransmitSummary
    where
        F: FnMut(&Segment),
    {
        let mut summary = TransmitSummary::default();
        let fast_resend = if params.fast_resend > 0 {
            params.fast_resend
        } else {
            u32::MAX
        };
        let grace = if params.nodelay { 0 } else { params.rto >> 3 };
        let now = params.now;

        for entry in self.flight.iter_mut() {
            let send = if entry.xmit == 0 {
                entry.rto = params.rto;
                entry.resend_ts = now.wrapping_add(entry.rto).wrapping_add(grace);
                summary.fresh += 1;
                true
            } else if time_diff(now, entry.resend_ts) >= 0 {
                let backed_off = (entry.rto as f64 * params.rto_backoff) as u64;
                entry.rto = backed_off
                    .max(entry.rto as u64)
                    .min(params.max_rto.max(1) as u64) as u32;
                entry.resend_ts = now.wrapping_add(entry.rto);
                summary.timeouts += 1;
                tracing::debug!(
                    sn = %entry.segment.sn,
                    xmit = entry.xmit,
                    rto = entry.rto,
                    "Retransmitting after timeout"
                );
                true
            } else if entry.fast_ack >= fast_resend
                && (params.fast_limit == 0 || entry.xmit <= params.fast_limit)
            {
                entry.fast_ack = 0;
                entry.resend_ts = now.wrapping_add(entry.rto);
                summary.fast += 1;
                tracing::debug!(sn = %entry.segment.sn, xmit = entry.xmit, "Fast retransmit");
                true
            } else {
                false
            };

            if send {
                entry.xmit += 1;
                entry.segment.ts = now;
                entry.segment.wnd = params.wnd;
                entry.segment.una = params.una;
                emit(&entry.segment);
            }
        }

        summary
    }

    /// Remove the segment with sequence number `sn`
    ///
    /// Returns true if it was in flight.
    pub fn acknowledge(&mut self, sn: SeqNumber) -> bool {
        if sn.lt(self.oldest_unacked) || sn.ge(self.next_seq) {
            return false;
        }
        let position = self.flight.iter().position(|entry| entry.segment.sn == sn);
        let removed = match position {
            Some(index) => self.flight.remove(index).is_some(),
            None => false,
        };
        self.shrink();
        removed
    }

    /// Remove every segment below `una`
    ///
    /// Returns how many were removed.
    pub fn acknowledge_up_to(&mut self, una: SeqNumber) -> usize {
        let mut count = 0;
        while let Some(front) = self.flight.front() {
            if front.segment.sn.lt(una) {
                self.flight.pop_front();
                count += 1;
            } else {
                break;
            }
        }
        self.shrink();
        count
    }

    /// Count a skipping ack against every outstanding segment below `max_ack`
    pub fn record_fast_ack(&mut self, max_ack: SeqNumber) {
        if max_ack.lt(self.oldest_unacked) || max_ack.ge(self.next_seq) {
            return;
        }
        for entry in self.flight.iter_mut() {
            if entry.segment.sn.lt(max_ack) {
                entry.fast_ack += 1;
            } else {
                break;
            }
        }
    }

    fn shrink(&mut self) {
        self.oldest_unacked = match self.flight.front() {
            Some(entry) => entry.segment.sn,
            None => self.next_seq,
        };
    }

    /// Earliest resend deadline among in-flight segments already sent
    pub fn earliest_resend(&self, now: u32) -> Option<u32> {
        self.flight
            .iter()
            .filter(|entry| entry.xmit > 0)
            .map(|entry| entry.resend_ts)
            .min_by_key(|ts| time_diff(*ts, now))
    }

    /// Number of unacknowledged segments in flight
    pub fn in_flight(&self) -> usize {
        self.flight.len()
    }

    /// Span of sequence numbers between the oldest unacked and the next to send
    pub fn in_flight_span(&self) -> u32 {
        self.oldest_unacked.distance_to(self.next_seq).max(0) as u32
    }

    /// Fragments waiting for admission
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Fragments queued or in flight
    pub fn waiting(&self) -> usize {
        self.queue.len() + self.flight.len()
    }

    /// Next sequence number to be assigned
    pub fn next_seq(&self) -> SeqNumber {
        self.next_seq
    }

    /// Oldest unacknowledged sequence number
    pub fn oldest_unacked(&self) -> SeqNumber {
        self.oldest_unacked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(now: u32) -> TransmitParams {
        TransmitParams {
            now,
            rto: 100,
            max_rto: 60_000,
            nodelay: true,
            fast_resend: 2,
            fast_limit: 5,
            rto_backoff: 2.0,
            wnd: 32,
            una: SeqNumber::new(0),
        }
    }

    fn sent(buffer: &mut SendBuffer, now: u32) -> Vec<u32> {
        let mut sns = Vec::new();
        buffer.transmit(&params(now), |seg| sns.push(seg.sn.as_raw()));
        sns
    }

    #[test]
    fn test_fragmentation() {
        let mut buffer = SendBuffer::new(1, 4);
        assert_eq!(buffer.enqueue(Bytes::from_static(b"0123456789")).unwrap(), 3);
        assert_eq!(buffer.queued(), 3);

        let frgs: Vec<u8> = buffer.queue.iter().map(|seg| seg.frg).collect();
        assert_eq!(frgs, vec![2, 1, 0]);
        assert_eq!(&buffer.queue[2].payload[..], b"89");
    }

    #[test]
    fn test_empty_message_is_one_fragment() {
        let mut buffer = SendBuffer::new(1, 4);
        assert_eq!(buffer.enqueue(Bytes::new()).unwrap(), 1);
    }

    #[test]
    fn test_payload_too_large() {
        let mut buffer = SendBuffer::new(1, 1);
        assert!(buffer.enqueue(Bytes::from(vec![0u8; MAX_FRAGMENTS])).is_ok());
        assert_eq!(
            buffer.enqueue(Bytes::from(vec![0u8; MAX_FRAGMENTS + 1])),
            Err(SendError::PayloadTooLarge {
                size: MAX_FRAGMENTS + 1,
                fragments: MAX_FRAGMENTS + 1,
                max: MAX_FRAGMENTS
            })
        );
    }

    #[test]
    fn test_admission_respects_limit() {
        let mut buffer = SendBuffer::new(1, 4);
        buffer.enqueue(Bytes::from(vec![0u8; 40])).unwrap();

        assert_eq!(buffer.admit(3), 3);
        assert_eq!(buffer.admit(3), 0);
        assert_eq!(buffer.in_flight(), 3);

        buffer.acknowledge(SeqNumber::new(1));
        // The gap at 0 still counts against the window
        assert_eq!(buffer.admit(3), 0);

        buffer.acknowledge(SeqNumber::new(0));
        assert_eq!(buffer.oldest_unacked(), SeqNumber::new(2));
        assert_eq!(buffer.admit(3), 2);
    }

    #[test]
    fn test_first_send_then_timeout() {
        let mut buffer = SendBuffer::new(1, 4);
        buffer.enqueue(Bytes::from_static(b"abc")).unwrap();
        buffer.admit(8);

        assert_eq!(sent(&mut buffer, 0), vec![0]);
        assert_eq!(sent(&mut buffer, 99), Vec::<u32>::new());
        assert_eq!(buffer.earliest_resend(99), Some(100));

        assert_eq!(sent(&mut buffer, 100), vec![0]);
        // Backed off to 200
        assert_eq!(buffer.earliest_resend(100), Some(300));
    }

    #[test]
    fn test_fast_retransmit() {
        let mut buffer = SendBuffer::new(1, 1);
        buffer.enqueue(Bytes::from_static(b"abcd")).unwrap();
        buffer.admit(8);
        sent(&mut buffer, 0);

        buffer.acknowledge(SeqNumber::new(2));
        buffer.record_fast_ack(SeqNumber::new(2));
        assert_eq!(sent(&mut buffer, 10), Vec::<u32>::new());

        buffer.acknowledge(SeqNumber::new(3));
        buffer.record_fast_ack(SeqNumber::new(3));
        let mut sns = Vec::new();
        let summary = buffer.transmit(&params(20), |seg| sns.push(seg.sn.as_raw()));
        assert_eq!(sns, vec![0, 1]);
        assert_eq!(summary.fast, 2);
        assert_eq!(summary.timeouts, 0);
    }

    #[test]
    fn test_cumulative_ack() {
        let mut buffer = SendBuffer::new(1, 1);
        buffer.enqueue(Bytes::from_static(b"abcd")).unwrap();
        buffer.admit(8);

        assert_eq!(buffer.acknowledge_up_to(SeqNumber::new(3)), 3);
        assert_eq!(buffer.in_flight(), 1);
        assert_eq!(buffer.oldest_unacked(), SeqNumber::new(3));
        assert!(!buffer.acknowledge(SeqNumber::new(1)));
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut buffer = SendBuffer::new(1, 1);
        buffer.next_seq = SeqNumber::new(u32::MAX - 1);
        buffer.oldest_unacked = SeqNumber::new(u32::MAX - 1);
        buffer.enqueue(Bytes::from_static(b"abcd")).unwrap();

        assert_eq!(buffer.admit(8), 4);
        assert_eq!(sent(&mut buffer, 0), vec![u32::MAX - 1, u32::MAX, 0, 1]);
        assert_eq!(buffer.next_seq(), SeqNumber::new(2));
        assert_eq!(buffer.in_flight_span(), 4);

        // Selective acks past the wrap skip the two older segments
        assert!(buffer.acknowledge(SeqNumber::new(0)));
        buffer.record_fast_ack(SeqNumber::new(0));
        assert!(buffer.acknowledge(SeqNumber::new(1)));
        buffer.record_fast_ack(SeqNumber::new(1));
        assert_eq!(buffer.in_flight(), 2);
        assert_eq!(buffer.oldest_unacked(), SeqNumber::new(u32::MAX - 1));

        let mut sns = Vec::new();
        let summary = buffer.transmit(&params(20), |seg| sns.push(seg.sn.as_raw()));
        assert_eq!(sns, vec![u32::MAX - 1, u32::MAX]);
        assert_eq!(summary.fast, 2);

        // A cumulative ack crossing zero clears the rest
        assert_eq!(buffer.acknowledge_up_to(SeqNumber::new(2)), 2);
        assert_eq!(buffer.in_flight(), 0);
        assert_eq!(buffer.oldest_unacked(), SeqNumber::new(2));
        assert!(!buffer.acknowledge(SeqNumber::new(u32::MAX)));
    }
}
