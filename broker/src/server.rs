// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The event loop and protocol handler: accepts connections, multiplexes
//! readiness across every socket, feeds bytes into session buffers, and
//! dispatches decoded packets.
//!
//! Single-threaded and cooperative by design (see spec's concurrency
//! section): one `mio::Poll`, no per-session task, no lock anywhere in
//! this module. The session table and subscription index are local
//! variables owned by [`run_loop`], not ambient globals; they come into
//! existence after the listener binds and are dropped when the loop
//! returns.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use codec::frame::Frame;
use codec::publish::PublishFrame;
use codec::subscribe::SubscribeFrame;
use codec::{connect::ConnectFrame, fixed_header, response};

use crate::config::Config;
use crate::error::Error;
use crate::index::SubscriptionIndex;
use crate::session::{Session, Status};
use crate::session_buffer::Extracted;
use crate::types::SessionId;

const LISTENER_TOKEN: Token = Token(0);
const POLL_TICK: Duration = Duration::from_secs(1);
const READ_BUF_SIZE: usize = 4096;

/// Bind the listener and run until an interrupt signal arrives.
pub fn run_loop(config: Config) -> Result<(), Error> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|err| Error::from_string(crate::error::ErrorKind::IoError, err.to_string()))?;
    }
    run_until_stopped(config, &stop)
}

/// Same loop as [`run_loop`], but the caller supplies the stop flag
/// directly instead of wiring one to a signal handler. Lets integration
/// tests bind a real listener and tear it down deterministically instead
/// of sending the process a signal.
pub fn run_until_stopped(config: Config, stop: &Arc<AtomicBool>) -> Result<(), Error> {
    let mut poll = Poll::new()?;
    let mut listener = TcpListener::bind(config.bind_addr)?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
    log::info!("wiretapd listening on {}", config.bind_addr);

    let mut broker = Broker {
        poll,
        listener,
        sessions: HashMap::new(),
        index: SubscriptionIndex::new(),
        config,
        next_id: 1,
    };
    let mut events = Events::with_capacity(128);

    while !stop.load(Ordering::SeqCst) {
        match broker.poll.poll(&mut events, Some(POLL_TICK)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }

        for event in &events {
            if event.token() == LISTENER_TOKEN {
                broker.accept_all();
            } else {
                broker.handle_session_event(event.token());
            }
        }
        broker.reap_draining_sessions();
    }

    log::info!("shutdown requested, closing {} session(s)", broker.sessions.len());
    broker.shutdown();
    Ok(())
}

struct Broker {
    poll: Poll,
    listener: TcpListener,
    sessions: HashMap<Token, Session>,
    index: SubscriptionIndex,
    config: Config,
    next_id: SessionId,
}

impl Broker {
    /// Drain every pending connection off the listener. Stops at the
    /// first `WouldBlock`, same as any other readable-fd drain in this
    /// loop.
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut socket, addr)) => {
                    if self.sessions.len() >= self.config.max_clients {
                        log::warn!(
                            "rejecting {addr}: at capacity ({} session(s))",
                            self.config.max_clients
                        );
                        drop(socket);
                        continue;
                    }

                    let id = self.next_id;
                    self.next_id += 1;
                    let token = Token(id);

                    if let Err(err) = self.poll.registry().register(&mut socket, token, Interest::READABLE) {
                        log::warn!("failed to register session {id}: {err}");
                        continue;
                    }

                    log::info!("session {id} accepted from {addr}");
                    self.sessions.insert(token, Session::new(id, socket));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    break;
                }
            }
        }
    }

    /// Read whatever is available on `token`'s socket, extract every
    /// complete frame now buffered, and dispatch each in arrival order.
    fn handle_session_event(&mut self, token: Token) {
        if !self.read_into_inbox(token) {
            return;
        }

        let mut frames = Vec::new();
        loop {
            let Some(session) = self.sessions.get_mut(&token) else {
                return;
            };
            match session.inbox.extract() {
                Extracted::Frame(raw) => frames.push(raw),
                Extracted::NeedMore => break,
                Extracted::Malformed => {
                    log::warn!(
                        "session {}: malformed remaining length, discarding buffered bytes",
                        session.id
                    );
                    session.inbox.discard_malformed();
                    if self.config.disconnect_on_error {
                        session.mark_draining();
                    }
                    break;
                }
            }
        }

        for raw in frames {
            let Some(session) = self.sessions.get(&token) else {
                return;
            };
            if session.is_draining() {
                break;
            }
            self.dispatch_frame(token, &raw);
        }
    }

    /// Non-blocking read loop into the session's inbox. Returns `false`
    /// if the session was closed (orderly EOF or a read error) and the
    /// caller should stop processing it.
    fn read_into_inbox(&mut self, token: Token) -> bool {
        let Some(session) = self.sessions.get_mut(&token) else {
            return false;
        };

        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match session.socket.read(&mut buf) {
                Ok(0) => {
                    session.mark_draining();
                    return false;
                }
                Ok(n) => session.inbox.push(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return true,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("session {}: read failed: {err}", session.id);
                    session.mark_draining();
                    return false;
                }
            }
        }
    }

    /// Optionally log the raw frame, decode it, and apply per-type
    /// semantics. `raw` is exactly one complete fixed-header-plus-body
    /// frame, as produced by the session buffer.
    fn dispatch_frame(&mut self, token: Token, raw: &[u8]) {
        let id = match self.sessions.get(&token) {
            Some(session) => session.id,
            None => return,
        };

        if self.config.log.log_raw {
            let tag = match fixed_header::parse(raw) {
                fixed_header::ParseOutcome::Complete(header) => header.packet_type.tag(),
                _ => raw.first().map_or(0, |b| b >> 4),
            };
            log::info!("session {id}: raw type={tag} bytes={}", hex(raw));
        }

        match codec::decode(raw) {
            Ok(frame) => self.apply_frame(token, frame),
            Err(err) => {
                log::warn!("session {id}: malformed frame: {err}");
                if self.config.disconnect_on_error {
                    if let Some(session) = self.sessions.get_mut(&token) {
                        session.mark_draining();
                    }
                }
            }
        }
    }

    fn apply_frame(&mut self, token: Token, frame: Frame) {
        let id = match self.sessions.get(&token) {
            Some(session) => session.id,
            None => return,
        };

        // Permissive policy (the default): a non-CONNECT frame before
        // CONNECT is logged but still processed rather than rejected.
        if let Some(session) = self.sessions.get(&token) {
            if session.status == Status::New && !matches!(frame, Frame::Connect(_)) {
                log::warn!("session {id}: packet type {:?} received before CONNECT", frame.packet_type());
            }
        }

        match frame {
            Frame::Connect(connect) => self.on_connect(token, connect),
            Frame::Publish(publish) => self.on_publish(token, publish),
            Frame::Subscribe(subscribe) => self.on_subscribe(token, subscribe),
            Frame::PingReq => self.send_to(token, &response::pingresp()),
            Frame::Disconnect => {
                if let Some(session) = self.sessions.get_mut(&token) {
                    session.mark_draining();
                }
            }
            Frame::Unknown(tag) => {
                log::warn!("session {id}: unsupported packet type {tag}, no response sent");
            }
        }
    }

    fn on_connect(&mut self, token: Token, connect: ConnectFrame) {
        let Some(id) = self.sessions.get(&token).map(|s| s.id) else {
            return;
        };
        let client_id = connect.client_id.unwrap_or_else(|| Session::placeholder_client_id(id));

        if self.config.connect_delay_ms > 0 {
            // Exercises client-side connect timeouts; this intentionally
            // blocks the whole loop for the duration, matching the
            // single-threaded cooperative model.
            thread::sleep(Duration::from_millis(self.config.connect_delay_ms));
        }

        if let Some(session) = self.sessions.get_mut(&token) {
            session.client_id = Some(client_id.clone());
            session.status = Status::Connected;
        }
        log::info!("session {id} connected as {client_id}");
        self.send_to(token, &response::connack());
    }

    fn on_publish(&mut self, token: Token, publish: PublishFrame) {
        let Some(publisher_id) = self.sessions.get(&token).map(|s| s.id) else {
            return;
        };

        if self.config.log.log_payload {
            log::info!(
                "session {publisher_id}: publish topic={} payload={}",
                publish.topic,
                String::from_utf8_lossy(&publish.payload)
            );
        }

        let mut forward = Vec::new();
        if let Err(err) = codec::publish::encode_forward(&publish.topic, &publish.payload, &mut forward) {
            log::warn!("session {publisher_id}: failed to encode forward: {err}");
        } else {
            for subscriber_id in self.index.subscribers(&publish.topic) {
                if subscriber_id == publisher_id && !self.config.reflect {
                    continue;
                }
                self.send_to(Token(subscriber_id), &forward);
            }
        }

        // The broker never retransmits: PUBACK is sent once, regardless
        // of whether any forward above actually reached a subscriber.
        if publish.qos != 0 {
            if let Some(packet_id) = publish.packet_id {
                self.send_to(token, &response::puback(packet_id));
            }
        }
    }

    fn on_subscribe(&mut self, token: Token, subscribe: SubscribeFrame) {
        let Some(id) = self.sessions.get(&token).map(|s| s.id) else {
            return;
        };

        for (topic, _qos) in &subscribe.topics {
            self.index.add(topic, id);
        }
        if let Some(session) = self.sessions.get_mut(&token) {
            for (topic, _qos) in &subscribe.topics {
                session.subscriptions.insert(topic.clone());
            }
        }

        let mut buf = Vec::new();
        match codec::subscribe::encode_suback(subscribe.packet_id, subscribe.topics.len(), &mut buf) {
            Ok(()) => self.send_to(token, &buf),
            Err(err) => log::warn!("session {id}: failed to encode suback: {err}"),
        }
    }

    /// Write `bytes` to `token`'s socket. A short write or error marks
    /// the session Draining and stops further dispatch on it this tick;
    /// it is never the caller's job to retry.
    fn send_to(&mut self, token: Token, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(session) = self.sessions.get_mut(&token) else {
            return;
        };
        if let Err(err) = write_all_blocking(&mut session.socket, bytes) {
            log::warn!("session {}: send failed: {err}", session.id);
            session.mark_draining();
        }
    }

    fn reap_draining_sessions(&mut self) {
        let draining: Vec<Token> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_draining())
            .map(|(token, _)| *token)
            .collect();

        for token in draining {
            if let Some(mut session) = self.sessions.remove(&token) {
                let _ = self.poll.registry().deregister(&mut session.socket);
                self.index.drop_session(session.id);
                log::info!("session {} closed", session.id);
            }
        }
    }

    fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.sessions.keys().copied().collect();
        for token in tokens {
            if let Some(mut session) = self.sessions.remove(&token) {
                let _ = self.poll.registry().deregister(&mut session.socket);
            }
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
    }
}

/// Writes the whole buffer, treating a would-block as "stall until the
/// peer drains its receive window" rather than as a failure: this broker
/// applies no backpressure, so a slow subscriber is allowed to stall the
/// loop (see spec's concurrency/resource model).
fn write_all_blocking(stream: &mut TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formats_uppercase_pairs() {
        assert_eq!(hex(&[0x20, 0x02, 0x00, 0x00]), "20 02 00 00");
    }

    #[test]
    fn hex_of_empty_is_empty_string() {
        assert_eq!(hex(&[]), "");
    }
}
