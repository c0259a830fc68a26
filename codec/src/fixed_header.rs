// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::error::EncodeError;
use crate::remaining_length::{self, RemainingLength};

/// The MQTT control packet types this broker recognizes on the wire.
///
/// Anything outside this set (PUBREC/PUBREL/PUBCOMP, UNSUBSCRIBE, AUTH,
/// reserved type 0 or 15, ...) decodes to `Unknown` and is never replied
/// to; see the server loop's dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PacketType {
    Connect,
    ConnAck,
    Publish,
    PubAck,
    Subscribe,
    SubAck,
    PingReq,
    PingResp,
    Disconnect,
    Unknown(u8),
}

impl PacketType {
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Connect => 1,
            Self::ConnAck => 2,
            Self::Publish => 3,
            Self::PubAck => 4,
            Self::Subscribe => 8,
            Self::SubAck => 9,
            Self::PingReq => 12,
            Self::PingResp => 13,
            Self::Disconnect => 14,
            Self::Unknown(tag) => tag,
        }
    }
}

/// The one-byte type/flags prefix plus the Remaining Length, decoded as a
/// unit since the session buffer needs both to know how many bytes the
/// whole frame occupies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
    /// Total bytes the fixed header itself took (1 + 1..4).
    pub header_len: usize,
}

impl FixedHeader {
    /// QoS bits (1-2) of the flags nibble, only meaningful for PUBLISH.
    #[must_use]
    pub const fn qos(&self) -> u8 {
        (self.flags >> 1) & 0b11
    }

    /// Total bytes this frame occupies once the body is included.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.header_len + self.remaining_length as usize
    }
}

/// Outcome of attempting to parse a fixed header from the front of a
/// buffer. `Incomplete` leaves the buffer untouched by design: the caller
/// is expected to wait for more bytes and retry from offset 0 again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseOutcome {
    Complete(FixedHeader),
    Incomplete,
    Malformed,
}

/// Parse the fixed header at the start of `buf`.
#[must_use]
pub fn parse(buf: &[u8]) -> ParseOutcome {
    let Some(&first) = buf.first() else {
        return ParseOutcome::Incomplete;
    };
    let packet_type = PacketType::from_tag(first >> 4);
    let flags = first & 0x0F;

    match remaining_length::decode(&buf[1..]) {
        RemainingLength::Complete { value, bytes } => ParseOutcome::Complete(FixedHeader {
            packet_type,
            flags,
            remaining_length: value,
            header_len: 1 + bytes,
        }),
        RemainingLength::Incomplete => ParseOutcome::Incomplete,
        RemainingLength::Malformed => ParseOutcome::Malformed,
    }
}

/// Encode a fixed header: type/flags byte followed by the Remaining Length.
pub fn encode(
    packet_type: PacketType,
    flags: u8,
    remaining_length: u32,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    buf.push((packet_type.tag() << 4) | (flags & 0x0F));
    remaining_length::encode(remaining_length, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_on_empty_buffer() {
        assert_eq!(parse(&[]), ParseOutcome::Incomplete);
    }

    #[test]
    fn pingreq_has_zero_remaining_length() {
        match parse(&[0xC0, 0x00]) {
            ParseOutcome::Complete(header) => {
                assert_eq!(header.packet_type, PacketType::PingReq);
                assert_eq!(header.remaining_length, 0);
                assert_eq!(header.frame_len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_tagged() {
        match parse(&[0x00, 0x00]) {
            ParseOutcome::Complete(header) => {
                assert_eq!(header.packet_type, PacketType::Unknown(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut buf = Vec::new();
        encode(PacketType::Publish, 0b0010, 300, &mut buf).unwrap();
        match parse(&buf) {
            ParseOutcome::Complete(header) => {
                assert_eq!(header.packet_type, PacketType::Publish);
                assert_eq!(header.flags, 0b0010);
                assert_eq!(header.remaining_length, 300);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
