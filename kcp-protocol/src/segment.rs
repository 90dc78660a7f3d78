//! KCP Segment Structures and Serialization
//!
//! Every segment is a 24-byte little-endian header followed by `len` payload
//! bytes. A single datagram may carry several segments back to back, so
//! decoding is done with [`SegmentIter`], which stops at the first malformed
//! remainder without discarding the segments already produced.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the segment header in bytes
pub const HEADER_SIZE: usize = 24;

/// Largest payload the 32-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Segment commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Data fragment
    Push = 81,
    /// Selective acknowledgement of one sequence number
    Ack = 82,
    /// Window probe: ask the peer for its receive window
    WindowAsk = 83,
    /// Window probe answer: tell the peer our receive window
    WindowTell = 84,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            81 => Some(Command::Push),
            82 => Some(Command::Ack),
            83 => Some(Command::WindowAsk),
            84 => Some(Command::WindowTell),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Push => "PUSH",
            Command::Ack => "ACK",
            Command::WindowAsk => "WASK",
            Command::WindowTell => "WINS",
        };
        f.write_str(name)
    }
}

/// A single protocol segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Conversation id shared by both peers
    pub conv: u32,
    /// Segment command
    pub cmd: Command,
    /// Fragments remaining after this one in the same message
    pub frg: u8,
    /// Sender's free receive window, in segments
    pub wnd: u16,
    /// Sender's clock (ms) when the segment was sent, echoed back in ACKs
    pub ts: u32,
    /// Sequence number (PUSH) or acknowledged sequence number (ACK)
    pub sn: SeqNumber,
    /// Sender's next expected sequence number (cumulative ack)
    pub una: SeqNumber,
    /// Payload data
    pub payload: Bytes,
}

impl Segment {
    /// Create a segment with an empty payload
    pub fn new(conv: u32, cmd: Command) -> Self {
        Segment {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: SeqNumber::new(0),
            una: SeqNumber::new(0),
            payload: Bytes::new(),
        }
    }

    /// Create a data segment carrying `payload`
    pub fn push(conv: u32, frg: u8, payload: Bytes) -> Self {
        Segment {
            frg,
            payload,
            ..Segment::new(conv, Command::Push)
        }
    }

    /// Total encoded size of the segment (header + payload)
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the segment into `buf`
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize, SegmentError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SegmentError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        self.put(buf);
        Ok(self.size())
    }

    /// Serialize the segment into a fresh buffer
    pub fn to_bytes(&self) -> Result<BytesMut, SegmentError> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Write header and payload without the length check.
    ///
    /// Callers guarantee the payload fits in the length field.
    pub(crate) fn put(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd.as_u8());
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn.as_raw());
        buf.put_u32_le(self.una.as_raw());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Parse one segment from the front of `buf`, advancing past it
    pub fn decode(buf: &mut Bytes) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_SIZE {
            return Err(SegmentError::Malformed {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        // Validate against a peek so a bad segment leaves `buf` untouched
        let mut header = &buf[..HEADER_SIZE];
        let conv = header.get_u32_le();
        let raw_cmd = header.get_u8();
        let frg = header.get_u8();
        let wnd = header.get_u16_le();
        let ts = header.get_u32_le();
        let sn = header.get_u32_le();
        let una = header.get_u32_le();
        let len = header.get_u32_le() as usize;

        let cmd = Command::from_u8(raw_cmd).ok_or(SegmentError::UnknownCommand(raw_cmd))?;

        let remaining = buf.len() - HEADER_SIZE;
        if len > remaining {
            return Err(SegmentError::TruncatedPayload {
                declared: len,
                remaining,
            });
        }

        buf.advance(HEADER_SIZE);
        let payload = buf.split_to(len);

        Ok(Segment {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn: SeqNumber::new(sn),
            una: SeqNumber::new(una),
            payload,
        })
    }
}

/// Peek at the conversation id of a datagram without decoding it
pub fn peek_conv(datagram: &[u8]) -> Option<u32> {
    if datagram.len() < 4 {
        return None;
    }
    let mut buf = datagram;
    Some(buf.get_u32_le())
}

/// Iterator over the segments packed in one datagram
///
/// Yields `Err` at most once: after a malformed remainder the iterator is
/// exhausted.
pub struct SegmentIter {
    buf: Bytes,
    failed: bool,
}

impl SegmentIter {
    pub fn new(datagram: Bytes) -> Self {
        SegmentIter {
            buf: datagram,
            failed: false,
        }
    }
}

impl Iterator for SegmentIter {
    type Item = Result<Segment, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        match Segment::decode(&mut self.buf) {
            Ok(segment) => Some(Ok(segment)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Segment parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Malformed segment: expected at least {expected} header bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("Truncated payload: header declares {declared} bytes, {remaining} remain")]
    TruncatedPayload { declared: usize, remaining: usize },

    #[error("Unknown command: {0}")]
    UnknownCommand(u8),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
