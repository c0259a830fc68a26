// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::connect::{self, ConnectFrame};
use crate::error::DecodeError;
use crate::fixed_header::{self, FixedHeader, PacketType};
use crate::publish::{self, PublishFrame};
use crate::subscribe::{self, SubscribeFrame};

/// One fully decoded MQTT control packet, ready for the protocol handler.
///
/// Created by [`decode`] from a byte slice that the session buffer has
/// already confirmed is a complete frame; consumed within the same
/// dispatch and never stored.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Connect(ConnectFrame),
    Publish(PublishFrame),
    Subscribe(SubscribeFrame),
    PingReq,
    Disconnect,
    /// A well-formed fixed header whose type this broker does not
    /// implement (PUBREC/PUBREL/PUBCOMP, UNSUBSCRIBE, AUTH, ...). Carries
    /// the raw numeric type for logging. Reserved/forbidden type 0 or 15
    /// is *not* represented here — it decodes to
    /// `DecodeError::ReservedPacketType` instead, the same malformed-frame
    /// path as a bad Remaining Length.
    Unknown(u8),
}

impl Frame {
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::Publish(_) => PacketType::Publish,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::PingReq => PacketType::PingReq,
            Self::Disconnect => PacketType::Disconnect,
            Self::Unknown(tag) => PacketType::Unknown(*tag),
        }
    }
}

/// Decode one complete frame (fixed header + body) from `raw`.
///
/// `raw` must already contain exactly `header_len + remaining_length`
/// bytes, as produced by the session buffer's extraction step; this
/// function does not itself handle fragmentation.
pub fn decode(raw: &[u8]) -> Result<Frame, DecodeError> {
    let header = match fixed_header::parse(raw) {
        fixed_header::ParseOutcome::Complete(header) => header,
        fixed_header::ParseOutcome::Incomplete => return Err(DecodeError::Incomplete),
        fixed_header::ParseOutcome::Malformed => return Err(DecodeError::MalformedLength),
    };
    if raw.len() < header.frame_len() {
        return Err(DecodeError::Incomplete);
    }
    let body = &raw[header.header_len..header.frame_len()];
    decode_body(&header, body)
}

fn decode_body(header: &FixedHeader, body: &[u8]) -> Result<Frame, DecodeError> {
    let mut ba = ByteArray::new(body);
    match header.packet_type {
        PacketType::Connect => connect::decode(&mut ba).map(Frame::Connect),
        PacketType::Publish => publish::decode(&mut ba, header.qos()).map(Frame::Publish),
        PacketType::Subscribe => {
            if header.flags != 0b0010 {
                return Err(DecodeError::MalformedFlags);
            }
            subscribe::decode(&mut ba, body.len()).map(Frame::Subscribe)
        }
        PacketType::PingReq => Ok(Frame::PingReq),
        PacketType::Disconnect => Ok(Frame::Disconnect),
        PacketType::ConnAck | PacketType::PubAck | PacketType::SubAck | PacketType::PingResp => {
            // The broker only ever encodes these, never decodes them from
            // a client; treat them the same as any other unimplemented
            // inbound type rather than special-casing "can't happen".
            Ok(Frame::Unknown(header.packet_type.tag()))
        }
        PacketType::Unknown(0) | PacketType::Unknown(15) => Err(DecodeError::ReservedPacketType),
        PacketType::Unknown(tag) => Ok(Frame::Unknown(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_connect() {
        let bytes = [
            0x10, 0x0C, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x00,
        ];
        let frame = decode(&bytes).unwrap();
        assert!(matches!(frame, Frame::Connect(ConnectFrame { client_id: None })));
    }

    #[test]
    fn decodes_pingreq() {
        assert_eq!(decode(&[0xC0, 0x00]).unwrap(), Frame::PingReq);
    }

    #[test]
    fn decodes_disconnect() {
        assert_eq!(decode(&[0xE0, 0x00]).unwrap(), Frame::Disconnect);
    }

    #[test]
    fn reserved_type_zero_is_a_decode_error() {
        assert_eq!(decode(&[0x00, 0x00]), Err(DecodeError::ReservedPacketType));
    }

    #[test]
    fn reserved_type_fifteen_is_a_decode_error() {
        assert_eq!(decode(&[0xF0, 0x00]), Err(DecodeError::ReservedPacketType));
    }

    #[test]
    fn merely_unsupported_type_is_unknown() {
        // PUBREC (type 5) is a valid-but-unimplemented type, distinct
        // from the reserved/forbidden 0 and 15.
        assert_eq!(decode(&[0x50, 0x00]).unwrap(), Frame::Unknown(5));
    }

    #[test]
    fn short_buffer_is_incomplete() {
        assert_eq!(decode(&[0x10, 0x0C, 0x00]), Err(DecodeError::Incomplete));
    }

    #[test]
    fn subscribe_with_wrong_reserved_flags_is_malformed() {
        // Same body as a valid SUBSCRIBE, but the fixed header's flag
        // nibble is 0b0000 instead of the required 0b0010.
        let bytes = [
            0x80, 0x09, 0x00, 0x01, 0x00, 0x04, b't', b'e', b's', b't', 0x00,
        ];
        assert_eq!(decode(&bytes), Err(DecodeError::MalformedFlags));
    }

    #[test]
    fn fragmentation_invariance() {
        let bytes = [
            0x82, 0x09, 0x00, 0x01, 0x00, 0x04, b't', b'e', b's', b't', 0x00,
        ];
        let whole = decode(&bytes).unwrap();
        // Decoding only ever happens once a full frame is assembled, so
        // feeding the identical byte sequence (regardless of how it was
        // chunked on the wire) must decode identically.
        let reassembled = decode(&bytes.to_vec()).unwrap();
        assert_eq!(whole, reassembled);
    }
}
