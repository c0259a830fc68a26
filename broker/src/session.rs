// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection identity, subscription set, and liveness.

use std::collections::BTreeSet;

use mio::net::TcpStream;

use crate::session_buffer::SessionBuffer;
use crate::types::SessionId;

/// Lifecycle stage of a connected client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// Socket accepted, no CONNECT seen yet.
    New,
    /// CONNECT processed, CONNACK sent, identifier known.
    Connected,
    /// DISCONNECT received, peer closed, or a send/decode error occurred;
    /// marked for removal at the next loop tick.
    Draining,
}

pub struct Session {
    pub id: SessionId,
    pub socket: TcpStream,
    pub status: Status,
    pub client_id: Option<String>,
    pub subscriptions: BTreeSet<String>,
    pub inbox: SessionBuffer,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, socket: TcpStream) -> Self {
        Self {
            id,
            socket,
            status: Status::New,
            client_id: None,
            subscriptions: BTreeSet::new(),
            inbox: SessionBuffer::new(),
        }
    }

    /// A stable placeholder for clients that connect with an empty
    /// client id, so log lines stay consistent across the session's
    /// lifetime instead of re-deriving a new name per line.
    #[must_use]
    pub fn placeholder_client_id(id: SessionId) -> String {
        format!("anonymous-{id}")
    }

    #[must_use]
    pub fn display_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("<new>")
    }

    #[must_use]
    pub const fn is_draining(&self) -> bool {
        matches!(self.status, Status::Draining)
    }

    pub fn mark_draining(&mut self) {
        self.status = Status::Draining;
    }
}
