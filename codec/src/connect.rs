// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::DecodeError;

/// CONNECT payload, reduced to the one field the broker actually tracks.
///
/// Protocol name, protocol level, connect flags and keepalive are parsed
/// (to stay at the right cursor position and catch truncation) but
/// discarded: this broker does not authenticate, does not honor
/// clean-session semantics across reconnects, and does not enforce
/// keepalive timeouts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectFrame {
    /// `None` when the client sent a zero-length client id; the caller
    /// is responsible for substituting a placeholder.
    pub client_id: Option<String>,
}

pub fn decode(ba: &mut ByteArray<'_>) -> Result<ConnectFrame, DecodeError> {
    let _protocol_name = ba.read_string()?;
    let _protocol_level = ba.read_byte()?;
    let _connect_flags = ba.read_byte()?;
    let _keep_alive = ba.read_u16()?;
    let client_id = ba.read_string()?;
    Ok(ConnectFrame {
        client_id: if client_id.is_empty() {
            None
        } else {
            Some(client_id)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_client_id() {
        // CONNECT body for protocol "MQTT", level 4, clean session,
        // keepalive 60, client id "".
        let body = [
            0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x00,
        ];
        let mut ba = ByteArray::new(&body);
        let frame = decode(&mut ba).unwrap();
        assert_eq!(frame.client_id, None);
    }
}
