//! Receive pipeline
//!
//! Data segments land in an out-of-order buffer keyed by sequence number and
//! migrate into the ready queue once contiguous with `next_expected`. The
//! application drains whole messages from the ready queue; a message is only
//! released when every fragment of it is queued.

use crate::segment::Segment;
use crate::sequence::SeqNumber;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;

/// Receive errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecvError {
    #[error("No complete message is ready")]
    WouldBlock,

    #[error("Buffer too small: message is {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// What happened to an arriving data segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Stored for delivery
    Accepted,
    /// Already received; the ack obligation still stands
    Duplicate,
    /// Beyond the receive window; dropped without an ack
    OutOfWindow,
}

impl Arrival {
    /// Whether the sender should be acknowledged for this segment
    pub fn needs_ack(self) -> bool {
        !matches!(self, Arrival::OutOfWindow)
    }
}

/// Receive side of a connection
#[derive(Debug)]
pub struct ReceiveBuffer {
    /// Out-of-order segments, sorted by sequence number, all >= next_expected
    pending: VecDeque<Segment>,
    /// Contiguous segments waiting to be reassembled and delivered
    ready: VecDeque<Segment>,
    /// Next sequence number expected in order
    next_expected: SeqNumber,
    /// Receive window (segments)
    window: u32,
}

impl ReceiveBuffer {
    /// Create a new receive buffer
    pub fn new(window: u32) -> Self {
        ReceiveBuffer {
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            next_expected: SeqNumber::new(0),
            window,
        }
    }

    /// Next sequence number expected in order (sent as `una`)
    pub fn next_expected(&self) -> SeqNumber {
        self.next_expected
    }

    /// Receive window (segments)
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Free window to advertise to the peer
    pub fn unused_window(&self) -> u16 {
        self.ready_capacity()
            .saturating_sub(self.ready.len() as u32)
            .min(u16::MAX as u32) as u16
    }

    /// Number of segments held (out-of-order and ready)
    pub fn pending(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    /// Whether the ready queue is at capacity
    pub fn is_full(&self) -> bool {
        self.ready.len() as u32 >= self.ready_capacity()
    }

    /// The ready queue grows past the window when needed to finish the
    /// message at its head; otherwise a message with more fragments than the
    /// window could never be delivered.
    fn ready_capacity(&self) -> u32 {
        let head = self.ready.front().map_or(0, |seg| seg.frg as u32 + 1);
        self.window.max(head)
    }

    /// Accept an arriving data segment
    pub fn insert(&mut self, segment: Segment) -> Arrival {
        let sn = segment.sn;

        if sn.lt(self.next_expected) {
            return Arrival::Duplicate;
        }
        if !sn.in_window(self.next_expected, self.ready_capacity()) {
            return Arrival::OutOfWindow;
        }

        // Pending is sorted; scan from the back since arrivals are mostly in order
        let mut index = self.pending.len();
        while index > 0 {
            let existing = self.pending[index - 1].sn;
            if existing == sn {
                return Arrival::Duplicate;
            }
            if existing.lt(sn) {
                break;
            }
            index -= 1;
        }
        self.pending.insert(index, segment);

        self.promote();
        Arrival::Accepted
    }

    /// Move newly contiguous segments into the ready queue
    pub fn promote(&mut self) {
        while let Some(front) = self.pending.front() {
            if front.sn != self.next_expected || self.is_full() {
                break;
            }
            if let Some(segment) = self.pending.pop_front() {
                self.ready.push_back(segment);
                self.next_expected.increment();
            }
        }
    }

    /// Size of the next complete message, if one is ready
    pub fn peek_size(&self) -> Option<usize> {
        let front = self.ready.front()?;
        if front.frg == 0 {
            return Some(front.payload.len());
        }
        if self.ready.len() < front.frg as usize + 1 {
            return None;
        }

        let mut size = 0;
        for segment in &self.ready {
            size += segment.payload.len();
            if segment.frg == 0 {
                return Some(size);
            }
        }
        None
    }

    /// Pop the next complete message
    pub fn pop_message(&mut self) -> Option<Bytes> {
        let size = self.peek_size()?;

        let message = match self.ready.pop_front() {
            Some(first) if first.frg == 0 => first.payload,
            Some(first) => {
                let mut message = BytesMut::with_capacity(size);
                message.extend_from_slice(&first.payload);
                while let Some(segment) = self.ready.pop_front() {
                    message.extend_from_slice(&segment.payload);
                    if segment.frg == 0 {
                        break;
                    }
                }
                message.freeze()
            }
            None => return None,
        };

        self.promote();
        Some(message)
    }

    /// Copy the next complete message into `buf`
    pub fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        let size = self.peek_size().ok_or(RecvError::WouldBlock)?;
        if size > buf.len() {
            return Err(RecvError::BufferTooSmall {
                needed: size,
                capacity: buf.len(),
            });
        }
        let message = self.pop_message().ok_or(RecvError::WouldBlock)?;
        buf[..message.len()].copy_from_slice(&message);
        Ok(message.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(sn: u32, frg: u8, payload: &'static [u8]) -> Segment {
        let mut segment = Segment::push(1, frg, Bytes::from_static(payload));
        segment.sn = SeqNumber::new(sn);
        segment
    }

    #[test]
    fn test_in_order_delivery() {
        let mut buffer = ReceiveBuffer::new(32);
        assert_eq!(buffer.insert(data(0, 0, b"one")), Arrival::Accepted);
        assert_eq!(buffer.insert(data(1, 0, b"two")), Arrival::Accepted);

        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"one")));
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"two")));
        assert_eq!(buffer.pop_message(), None);
        assert_eq!(buffer.next_expected(), SeqNumber::new(2));
    }

    #[test]
    fn test_out_of_order_held_back() {
        let mut buffer = ReceiveBuffer::new(32);
        buffer.insert(data(1, 0, b"two"));
        assert_eq!(buffer.pop_message(), None);

        buffer.insert(data(0, 0, b"one"));
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"one")));
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"two")));
    }

    #[test]
    fn test_duplicates_dropped_not_overwritten() {
        let mut buffer = ReceiveBuffer::new(32);
        assert_eq!(buffer.insert(data(2, 0, b"first")), Arrival::Accepted);
        assert_eq!(buffer.insert(data(2, 0, b"second")), Arrival::Duplicate);

        buffer.insert(data(0, 0, b"a"));
        buffer.insert(data(1, 0, b"b"));
        assert_eq!(buffer.insert(data(0, 0, b"a")), Arrival::Duplicate);

        buffer.pop_message();
        buffer.pop_message();
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"first")));
    }

    #[test]
    fn test_window_violation() {
        let mut buffer = ReceiveBuffer::new(4);
        assert_eq!(buffer.insert(data(4, 0, b"x")), Arrival::OutOfWindow);
        assert!(!Arrival::OutOfWindow.needs_ack());
        assert_eq!(buffer.insert(data(3, 0, b"x")), Arrival::Accepted);
    }

    #[test]
    fn test_fragment_reassembly() {
        let mut buffer = ReceiveBuffer::new(32);
        buffer.insert(data(0, 2, b"he"));
        buffer.insert(data(1, 1, b"ll"));
        assert_eq!(buffer.peek_size(), None);
        assert_eq!(buffer.pop_message(), None);

        buffer.insert(data(2, 0, b"o"));
        assert_eq!(buffer.peek_size(), Some(5));
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn test_message_longer_than_window() {
        let mut buffer = ReceiveBuffer::new(1);
        assert_eq!(buffer.insert(data(0, 2, b"a")), Arrival::Accepted);
        assert_eq!(buffer.unused_window(), 2);
        assert_eq!(buffer.insert(data(1, 1, b"b")), Arrival::Accepted);
        assert_eq!(buffer.insert(data(2, 0, b"c")), Arrival::Accepted);
        assert_eq!(buffer.unused_window(), 0);

        // Held out of order while the ready queue is full
        assert_eq!(buffer.insert(data(3, 0, b"d")), Arrival::Accepted);
        assert_eq!(buffer.insert(data(6, 0, b"g")), Arrival::OutOfWindow);

        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"abc")));
        assert_eq!(buffer.unused_window(), 0);
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"d")));
        assert_eq!(buffer.unused_window(), 1);
    }

    #[test]
    fn test_full_queue_blocks_promotion() {
        let mut buffer = ReceiveBuffer::new(2);
        buffer.insert(data(0, 0, b"a"));
        buffer.insert(data(1, 0, b"b"));
        assert!(buffer.is_full());
        assert_eq!(buffer.unused_window(), 0);

        // Beyond the window measured from next_expected
        assert_eq!(buffer.insert(data(2, 0, b"c")), Arrival::Accepted);
        assert_eq!(buffer.next_expected(), SeqNumber::new(2));

        buffer.pop_message();
        assert_eq!(buffer.next_expected(), SeqNumber::new(3));
    }

    #[test]
    fn test_zero_window_never_panics() {
        let mut buffer = ReceiveBuffer::new(0);
        assert_eq!(buffer.insert(data(0, 0, b"a")), Arrival::OutOfWindow);
        assert_eq!(buffer.unused_window(), 0);
        assert_eq!(buffer.pop_message(), None);
    }

    #[test]
    fn test_recv_into() {
        let mut buffer = ReceiveBuffer::new(8);
        let mut small = [0u8; 2];
        assert_eq!(buffer.recv_into(&mut small), Err(RecvError::WouldBlock));

        buffer.insert(data(0, 0, b"hello"));
        assert_eq!(
            buffer.recv_into(&mut small),
            Err(RecvError::BufferTooSmall {
                needed: 5,
                capacity: 2
            })
        );

        let mut large = [0u8; 16];
        assert_eq!(buffer.recv_into(&mut large), Ok(5));
        assert_eq!(&large[..5], b"hello");
    }

    #[test]
    fn test_wraparound() {
        let mut buffer = ReceiveBuffer::new(8);
        buffer.next_expected = SeqNumber::new(u32::MAX);
        buffer.insert(data(0, 0, b"b"));
        buffer.insert(data(u32::MAX, 0, b"a"));

        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"a")));
        assert_eq!(buffer.pop_message(), Some(Bytes::from_static(b"b")));
        assert_eq!(buffer.next_expected(), SeqNumber::new(1));
    }
}
