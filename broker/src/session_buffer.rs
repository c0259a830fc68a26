// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection byte accumulator: turns arbitrarily fragmented reads
//! into zero or more complete frames.

use codec::fixed_header::{self, ParseOutcome};

/// Growable inbox for one session. Between dispatches it holds at most
/// one partial frame prefix; every complete frame is consumed as soon as
/// [`SessionBuffer::extract`] sees it.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    inbox: Vec<u8>,
}

/// One extraction attempt's result.
pub enum Extracted {
    /// A complete frame's raw bytes (fixed header + body), already
    /// removed from the inbox.
    Frame(Vec<u8>),
    /// Not enough bytes buffered for a full frame yet.
    NeedMore,
    /// The Remaining Length field itself was malformed (5th continuation
    /// byte). The caller decides the policy; this type never discards
    /// bytes on its own.
    Malformed,
}

impl SessionBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.inbox.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inbox.is_empty()
    }

    /// Pull one complete frame off the front of the inbox, if present.
    pub fn extract(&mut self) -> Extracted {
        match fixed_header::parse(&self.inbox) {
            ParseOutcome::Incomplete => Extracted::NeedMore,
            ParseOutcome::Malformed => Extracted::Malformed,
            ParseOutcome::Complete(header) => {
                let frame_len = header.frame_len();
                if self.inbox.len() < frame_len {
                    return Extracted::NeedMore;
                }
                let frame = self.inbox.drain(..frame_len).collect();
                Extracted::Frame(frame)
            }
        }
    }

    /// Discard one malformed frame's worth of bytes so the next
    /// `extract` call does not loop forever on the same garbage. Only
    /// meaningful to call right after `extract` returned `Malformed`:
    /// drops everything buffered, since a bad Remaining Length makes the
    /// true frame boundary unrecoverable.
    pub fn discard_malformed(&mut self) {
        self.inbox.clear();
    }
}
