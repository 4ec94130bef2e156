//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers carries one [`Segment`]: a 20-byte
//! fixed header in network byte order followed by up to
//! [`MAX_SEGMENT_PAYLOAD`](crate::tcp::MAX_SEGMENT_PAYLOAD) payload bytes.
//! No I/O happens here, only byte-level transformation.
//!
//! ```text
//! --------------------------------------------------------
//! |  Source Port (16 bits)    |   Dest. Port (16 bits)   |
//! --------------------------------------------------------
//! |                Sequence Number (32 bits)             |
//! --------------------------------------------------------
//! |                 Ack. Number (32 bits)                |
//! --------------------------------------------------------
//! |Offset(4)|Reserved(6)|U|A|P|R|S|F|     Window(16)     |
//! --------------------------------------------------------
//! |   Checksum (16 bits)      |      Urgent Pointer(16)  |
//! --------------------------------------------------------
//! |                 Data (up to 1448 bytes)              |
//! --------------------------------------------------------
//! ```
//!
//! The checksum is the Internet checksum (RFC 1071) over a 12-byte
//! pseudo-header (source address, destination address, zero, protocol number
//! 6, segment length) followed by the header (checksum field zeroed) and the
//! payload, padded with a single zero byte if the total length is odd. A
//! computed checksum of zero is transmitted as all-ones so it can never be
//! confused with "checksum absent"; the verifier applies the same
//! substitution before comparing.

use crate::tcp::{flags, MAX_SEGMENT_PAYLOAD};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Byte length of the fixed header on the wire.
pub const HEADER_LEN: usize = 20;

/// Header length in 32-bit words; options are never emitted.
pub const DATA_OFFSET_WORDS: u8 = 5;

/// Protocol identifier carried in the pseudo-header.
pub const PROTOCOL_NUMBER: u8 = 6;

// Byte offsets of each field within the serialised header.
const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_OFFSET: usize = 12;
const OFF_FLAGS: usize = 13;
const OFF_WINDOW: usize = 14;
const OFF_CHECKSUM: usize = 16;
const OFF_URGENT: usize = 18;

/// A complete protocol segment.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The source port number
    pub src_port: u16,
    /// The destination port number
    pub dst_port: u16,
    /// Sequence number of the first payload octet (or the ISS when SYN is set)
    pub seq: u32,
    /// Next sequence number expected from the peer; meaningful when ACK is set
    pub ack: u32,
    /// Bitmask of [`flags`] constants; the upper two bits are reserved
    pub flags: u8,
    /// Advertised receive-window size in bytes
    pub wnd: u16,
    /// Urgent pointer; always zero in this protocol
    pub urgent: u16,
    /// 0..=1448 payload bytes
    pub payload: Vec<u8>,
}

impl Segment {
    /// Serialise this segment into a newly allocated byte vector with the
    /// checksum computed over `pseudo` + header + payload.
    pub fn encode(&self, pseudo: &PseudoHeader) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_OFFSET] = DATA_OFFSET_WORDS << 4;
        buf[OFF_FLAGS] = self.flags & 0b11_1111;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.wnd.to_be_bytes());
        // Checksum field stays zero while the checksum is computed.
        buf[OFF_URGENT..OFF_URGENT + 2].copy_from_slice(&self.urgent.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&pseudo.bytes(buf.len() as u16), &buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Segment`] from a raw datagram, verifying the checksum
    /// against `pseudo`.
    ///
    /// All errors are segment-local: the caller drops the datagram and keeps
    /// waiting, leaving recovery to the sender's retransmission timer.
    pub fn decode(buf: &[u8], pseudo: &PseudoHeader) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::TooShort);
        }
        let payload_len = buf.len() - HEADER_LEN;
        if payload_len > MAX_SEGMENT_PAYLOAD {
            return Err(SegmentError::TooLong(payload_len));
        }

        let data_offset = buf[OFF_OFFSET] >> 4;
        if data_offset != DATA_OFFSET_WORDS {
            return Err(SegmentError::UnexpectedOffset(data_offset));
        }

        let expected =
            u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);

        // Recompute with the checksum field zeroed.
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        let actual = internet_checksum(&pseudo.bytes(buf.len() as u16), &scratch);
        if actual != expected {
            return Err(SegmentError::Checksum { actual, expected });
        }

        Ok(Segment {
            src_port: u16::from_be_bytes([buf[OFF_SRC_PORT], buf[OFF_SRC_PORT + 1]]),
            dst_port: u16::from_be_bytes([buf[OFF_DST_PORT], buf[OFF_DST_PORT + 1]]),
            seq: u32::from_be_bytes(buf[OFF_SEQ..OFF_SEQ + 4].try_into().unwrap()),
            ack: u32::from_be_bytes(buf[OFF_ACK..OFF_ACK + 4].try_into().unwrap()),
            flags: buf[OFF_FLAGS] & 0b11_1111,
            wnd: u16::from_be_bytes([buf[OFF_WINDOW], buf[OFF_WINDOW + 1]]),
            urgent: u16::from_be_bytes([buf[OFF_URGENT], buf[OFF_URGENT + 1]]),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Checksum input derived from connection addressing; never transmitted.
///
/// Binds each segment's checksum to the endpoint addresses and the segment
/// length, so a datagram delivered to the wrong host fails verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoHeader {
    src: Ipv4Addr,
    dst: Ipv4Addr,
}

impl PseudoHeader {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self { src, dst }
    }

    /// The pseudo-header for traffic flowing the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }

    /// src(4) dst(4) zero(1) protocol(1) segment-length(2), big-endian.
    fn bytes(&self, segment_len: u16) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.src.octets());
        out[4..8].copy_from_slice(&self.dst.octets());
        out[9] = PROTOCOL_NUMBER;
        out[10..12].copy_from_slice(&segment_len.to_be_bytes());
        out
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("too few bytes to constitute a segment header")]
    TooShort,
    /// Payload beyond the largest a segment may carry.
    #[error("{0}-byte payload exceeds the {MAX_SEGMENT_PAYLOAD}-byte segment limit")]
    TooLong(usize),
    /// Data offset differs from the fixed five-word header.
    #[error("data offset {0} differs from the fixed five-word header")]
    UnexpectedOffset(u8),
    /// Checksum did not match the recomputed value.
    #[error("computed checksum {actual:#06x} did not match the header checksum {expected:#06x}")]
    Checksum { actual: u16, expected: u16 },
}

/// Compute the Internet checksum (RFC 1071) over `pseudo` followed by
/// `segment`.
///
/// Sums consecutive 16-bit big-endian words with end-around carry folding and
/// returns the one's complement. An odd trailing byte is padded with zero on
/// the right. A result of zero is substituted with all-ones.
fn internet_checksum(pseudo: &[u8; 12], segment: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for word in pseudo.chunks(2) {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    let mut chunks = segment.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    // Fold the carries back in.
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    match !(sum as u16) {
        0 => 0xffff,
        csum => csum,
    }
}
