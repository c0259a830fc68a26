// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::{self, ByteArray};
use crate::error::{DecodeError, EncodeError};
use crate::fixed_header::{self, PacketType};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribeFrame {
    pub packet_id: u16,
    pub topics: Vec<(String, u8)>,
}

pub fn decode(ba: &mut ByteArray<'_>, remaining_length: usize) -> Result<SubscribeFrame, DecodeError> {
    let packet_id = ba.read_u16()?;
    let mut topics = Vec::new();
    let mut consumed = 2; // packet id
    while consumed < remaining_length {
        let topic = ba.read_string()?;
        let qos = ba.read_byte()?;
        consumed += 2 + topic.len() + 1;
        topics.push((topic, qos));
    }
    if topics.is_empty() {
        return Err(DecodeError::EmptyTopicFilter);
    }
    Ok(SubscribeFrame { packet_id, topics })
}

/// Encode a SUBACK granting QoS 0 to every topic filter in order. The
/// broker never sends the 0x80 failure code.
pub fn encode_suback(packet_id: u16, topic_count: usize, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    let mut body = Vec::with_capacity(2 + topic_count);
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.extend(std::iter::repeat(0u8).take(topic_count));

    fixed_header::encode(PacketType::SubAck, 0b0000, body.len() as u32, buf)?;
    buf.extend_from_slice(&body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_topic() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_be_bytes());
        byte_array::write_string(&mut body, "test");
        body.push(0);
        let mut ba = ByteArray::new(&body);
        let frame = decode(&mut ba, body.len()).unwrap();
        assert_eq!(frame.packet_id, 1);
        assert_eq!(frame.topics, vec![("test".to_string(), 0)]);
    }

    #[test]
    fn zero_topics_is_malformed() {
        let body = 1u16.to_be_bytes();
        let mut ba = ByteArray::new(&body);
        assert_eq!(decode(&mut ba, body.len()), Err(DecodeError::EmptyTopicFilter));
    }

    #[test]
    fn suback_has_one_grant_per_topic() {
        let mut buf = Vec::new();
        encode_suback(1, 1, &mut buf).unwrap();
        assert_eq!(buf, vec![0x90, 0x03, 0x00, 0x01, 0x00]);
    }
}
