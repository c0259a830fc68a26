// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::{self, ByteArray};
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::{self, PacketType};

/// One PUBLISH, either as received from a client or as forwarded to a
/// subscriber.
///
/// `packet_id` is only present when the originating QoS was 1 or 2; it is
/// never re-derived or validated against the payload, it is just carried
/// through so the broker can echo it back in PUBACK.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishFrame {
    pub topic: String,
    pub qos: u8,
    pub packet_id: Option<u16>,
    pub payload: Vec<u8>,
}

pub fn decode(ba: &mut ByteArray<'_>, qos: u8) -> Result<PublishFrame, DecodeError> {
    let topic = ba.read_string()?;
    let packet_id = if qos != 0 { Some(ba.read_u16()?) } else { None };
    let payload = ba.rest().to_vec();
    Ok(PublishFrame {
        topic,
        qos,
        packet_id,
        payload,
    })
}

/// Encode a QoS-0 forward of `topic`/`payload` to a subscriber. The
/// broker never retransmits and never upgrades QoS on delivery, so this
/// is the only PUBLISH the broker ever emits.
pub fn encode_forward(topic: &str, payload: &[u8], buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    byte_array::write_string(&mut body, topic);
    body.extend_from_slice(payload);

    fixed_header::encode(PacketType::Publish, 0b0000, body.len() as u32, buf)?;
    buf.extend_from_slice(&body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_qos0_without_packet_id() {
        let mut body = Vec::new();
        byte_array::write_string(&mut body, "test");
        body.extend_from_slice(b"hello");
        let mut ba = ByteArray::new(&body);
        let frame = decode(&mut ba, 0).unwrap();
        assert_eq!(frame.topic, "test");
        assert_eq!(frame.packet_id, None);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn decodes_qos1_with_packet_id() {
        let mut body = Vec::new();
        byte_array::write_string(&mut body, "test");
        body.extend_from_slice(&42u16.to_be_bytes());
        body.extend_from_slice(b"hello");
        let mut ba = ByteArray::new(&body);
        let frame = decode(&mut ba, 1).unwrap();
        assert_eq!(frame.packet_id, Some(42));
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn empty_payload_is_not_truncated() {
        let mut body = Vec::new();
        byte_array::write_string(&mut body, "test");
        let mut ba = ByteArray::new(&body);
        let frame = decode(&mut ba, 0).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn forward_encodes_qos0() {
        let mut buf = Vec::new();
        encode_forward("test", b"hello", &mut buf).unwrap();
        assert_eq!(
            buf,
            vec![0x30, 0x0B, 0x00, 0x04, b't', b'e', b's', b't', b'h', b'e', b'l', b'l', b'o']
        );
    }
}
