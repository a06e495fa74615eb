//! The session reactor: a connection/session state machine driven by socket readiness edges,
//! timer ticks, and application calls (§4.3).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use hexplay::HexViewBuilder;
use log::{debug, trace, warn};

use mqtt_core::{
    Connack, Connect, DecodeError, Packet, PacketId, Puback, Publish, QoS, Subscribe, Unsubscribe,
};

use crate::callbacks::Callbacks;
use crate::config::Config;
use crate::error::{CallError, ReactorError};
use crate::scheduler::{Scheduler, Token};
use crate::socket::{ConnectStatus, RecvStatus, SendStatus, Socket};

/// `ReactorState` (§3): `Init -> Connecting -> Connack -> Connected -> Stopping -> Stopped`, with
/// `Error` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Init,
    Connecting,
    Connack,
    Connected,
    Stopping,
    Stopped,
    Error,
}

/// A handle to an application request, returned by `subscribe`/`unsubscribe`/`publish`.
///
/// `packet_id` is `None` for a QoS 0 publish, which is fire-and-forget and never enters
/// `pending_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub packet_id: Option<PacketId>,
}

/// The request kind an entry in `pending_ack` is waiting to be acknowledged, carrying the
/// original packet for retransmission on reconnect when `clean_session = false` (§3).
#[derive(Debug, Clone)]
enum AckKind {
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    PublishQos1(Publish),
}

impl AckKind {
    /// Rebuilds the outbound packet for replay after a `clean_session = false` reconnect,
    /// setting `dup` on a republished QoS 1 `Publish` as the wire format requires.
    fn replay_packet(&self) -> Packet {
        match self {
            AckKind::Subscribe(p) => Packet::Subscribe(p.clone()),
            AckKind::Unsubscribe(p) => Packet::Unsubscribe(p.clone()),
            AckKind::PublishQos1(p) => {
                let mut p = p.clone();
                p.dup = true;
                Packet::Publish(p)
            }
        }
    }
}

/// Tag carried by scheduler entries the reactor owns (§9): the scheduler never holds a closure
/// over the reactor, only this small `Copy` payload, which `Reactor::poll` interprets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Keepalive,
    PingTimeout,
}

/// Session state machine driving one logical MQTT connection over a [`Socket`] (§4.3).
///
/// Generic over the transport (`S`) and the application's callback set (`C`), following the
/// teacher's own decoupling of session logic from a concrete `TcpStream` via `io::{Sender,
/// Receiver}` traits.
pub struct Reactor<S, C> {
    config: Config,
    socket: S,
    callbacks: C,

    state: ReactorState,
    error: Option<ReactorError>,

    in_buf: BytesMut,
    out_buf: BytesMut,

    pending_send: VecDeque<Packet>,
    pending_ack: HashMap<PacketId, AckKind>,
    last_packet_id: PacketId,

    scheduler: Scheduler<TimerKind>,
    keepalive_token: Option<Token>,
    ping_timeout_token: Option<Token>,
}

const READ_CHUNK: usize = 4096;

impl<S: Socket, C: Callbacks> Reactor<S, C> {
    pub fn new(config: Config, socket: S, callbacks: C) -> Self {
        Reactor {
            config,
            socket,
            callbacks,
            state: ReactorState::Init,
            error: None,
            in_buf: BytesMut::new(),
            out_buf: BytesMut::new(),
            pending_send: VecDeque::new(),
            pending_ack: HashMap::new(),
            last_packet_id: 0,
            scheduler: Scheduler::new(),
            keepalive_token: None,
            ping_timeout_token: None,
        }
    }

    pub fn state(&self) -> ReactorState {
        self.state
    }

    pub fn error(&self) -> Option<&ReactorError> {
        self.error.as_ref()
    }

    /// Number of live scheduler entries the reactor owns; tests use this to detect timer leaks
    /// (§8 invariant 5: zero after `terminate()` or entry into `Error`).
    pub fn scheduler_len(&self) -> usize {
        self.scheduler.len()
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    /// Direct access to the underlying transport, e.g. for an adapter that needs to register the
    /// socket's file descriptor with its poll/select loop, or for tests driving a mock transport.
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, ReactorState::Stopped | ReactorState::Error)
    }

    // ---- application API (§4.3) ----------------------------------------------------------

    /// Initiates the connection. Expected synchronous outcome is `InProgress` (§4.3
    /// Init -> Connecting); an immediate hard error enters `Error(ConnectFailed)`.
    pub fn start(&mut self) -> Result<(), CallError> {
        if self.state != ReactorState::Init {
            return Err(CallError::Terminated);
        }

        match self.socket.connect(self.config.endpoint()) {
            Ok(ConnectStatus::InProgress) | Ok(ConnectStatus::Connected) => {
                debug!("connecting to {:?}", self.config.endpoint());
                self.state = ReactorState::Connecting;
                Ok(())
            }
            Err(err) => {
                self.fail(ReactorError::ConnectFailed(err.to_string()));
                Ok(())
            }
        }
    }

    /// Enqueues a graceful `Disconnect` and moves to `Stopping`; once it drains, the socket is
    /// closed and the state becomes `Stopped`. A no-op once already stopping/stopped.
    pub fn stop(&mut self) -> Result<(), CallError> {
        match self.state {
            ReactorState::Connack | ReactorState::Connected => {
                debug!("sending DISCONNECT");
                self.pending_send.push_back(Packet::Disconnect);
                self.state = ReactorState::Stopping;
                Ok(())
            }
            ReactorState::Stopping | ReactorState::Stopped => Ok(()),
            _ => Err(CallError::NotConnected),
        }
    }

    /// Aborts the session immediately, without a `Disconnect`, discarding queued packets and
    /// cancelling every timer the reactor owns (§5 Cancellation).
    pub fn terminate(&mut self) {
        if self.is_terminal() {
            return;
        }
        debug!("terminating session");
        self.socket.close();
        self.cancel_all_timers();
        self.pending_send.clear();
        self.pending_ack.clear();
        self.state = ReactorState::Stopped;
    }

    pub fn subscribe(&mut self, topics: Vec<(String, QoS)>) -> Result<Ticket, CallError> {
        self.ensure_connected()?;
        if topics.is_empty() {
            return Err(CallError::Reactor(ReactorError::ProtocolViolation(
                "subscribe requires at least one topic filter".into(),
            )));
        }

        let packet_id = self.alloc_packet_id()?;
        let packet = Subscribe { packet_id, topics };
        self.pending_ack
            .insert(packet_id, AckKind::Subscribe(packet.clone()));
        self.pending_send.push_back(Packet::Subscribe(packet));
        Ok(Ticket {
            packet_id: Some(packet_id),
        })
    }

    pub fn unsubscribe(&mut self, filters: Vec<String>) -> Result<Ticket, CallError> {
        self.ensure_connected()?;
        if filters.is_empty() {
            return Err(CallError::Reactor(ReactorError::ProtocolViolation(
                "unsubscribe requires at least one filter".into(),
            )));
        }

        let packet_id = self.alloc_packet_id()?;
        let packet = Unsubscribe { packet_id, filters };
        self.pending_ack
            .insert(packet_id, AckKind::Unsubscribe(packet.clone()));
        self.pending_send.push_back(Packet::Unsubscribe(packet));
        Ok(Ticket {
            packet_id: Some(packet_id),
        })
    }

    pub fn publish(
        &mut self,
        topic: impl Into<String>,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<Ticket, CallError> {
        self.ensure_connected()?;
        let topic = topic.into();

        match qos {
            QoS::AtMostOnce => {
                let packet = Packet::Publish(Publish {
                    dup: false,
                    qos,
                    retain,
                    topic,
                    packet_id: None,
                    payload,
                });
                packet.encoded_len().map_err(CallError::PayloadTooLarge)?;
                self.pending_send.push_back(packet);
                Ok(Ticket { packet_id: None })
            }
            QoS::AtLeastOnce => {
                // Validate encodability before allocating a packet id, so a rejected call never
                // consumes one; the placeholder id doesn't affect the encoded length (always 2
                // bytes whenever `packet_id` is `Some`, regardless of its value).
                let mut publish = Publish {
                    dup: false,
                    qos,
                    retain,
                    topic,
                    packet_id: Some(0),
                    payload,
                };
                Packet::Publish(publish.clone())
                    .encoded_len()
                    .map_err(CallError::PayloadTooLarge)?;

                let packet_id = self.alloc_packet_id()?;
                publish.packet_id = Some(packet_id);
                self.pending_ack
                    .insert(packet_id, AckKind::PublishQos1(publish.clone()));
                self.pending_send.push_back(Packet::Publish(publish));
                Ok(Ticket {
                    packet_id: Some(packet_id),
                })
            }
            // Open question (§9): no QoS 2 state-machine handling is specified upstream; the safe
            // default is to reject it at the call boundary rather than half-implement the
            // Pubrec/Pubrel/Pubcomp handshake.
            QoS::ExactlyOnce => Err(CallError::Reactor(ReactorError::ProtocolViolation(
                "QoS 2 publish is not supported".into(),
            ))),
        }
    }

    pub fn want_read(&self) -> bool {
        match self.state {
            ReactorState::Init | ReactorState::Connecting => false,
            ReactorState::Error | ReactorState::Stopped => false,
            ReactorState::Connack => self.out_buf.is_empty(),
            ReactorState::Connected | ReactorState::Stopping => true,
        }
    }

    pub fn want_write(&self) -> bool {
        match self.state {
            ReactorState::Init => false,
            ReactorState::Connecting => true,
            ReactorState::Error | ReactorState::Stopped => false,
            _ => !self.pending_send.is_empty() || !self.out_buf.is_empty(),
        }
    }

    /// Advances the logical clock, firing any due keepalive/ping-timeout entries (§4.2, §4.3).
    pub fn poll(&mut self, elapsed: Duration) {
        if self.is_terminal() {
            return;
        }

        for timer in self.scheduler.poll(elapsed) {
            if self.is_terminal() {
                break;
            }
            match timer {
                TimerKind::Keepalive => self.handle_keepalive_fired(),
                TimerKind::PingTimeout => self.handle_ping_timeout_fired(),
            }
        }
    }

    /// Drives outbound I/O: completes the connect handshake's `SO_ERROR` check, then flushes
    /// `pending_send`/`out_buf` to the socket (§4.3 write discipline).
    pub fn write(&mut self) -> Result<(), CallError> {
        if self.is_terminal() {
            return Ok(());
        }

        if self.state == ReactorState::Connecting {
            self.advance_connecting();
            if self.is_terminal() {
                return Ok(());
            }
        }

        self.flush_out_buf();
        Ok(())
    }

    /// Drives inbound I/O: drains available bytes from the socket into the inbound buffer, then
    /// decodes and dispatches as many complete packets as are available (§4.3 read discipline).
    pub fn read(&mut self) -> Result<(), CallError> {
        if self.is_terminal() {
            return Ok(());
        }

        loop {
            match self.socket.recv(READ_CHUNK) {
                Ok(RecvStatus::Data(bytes)) => {
                    trace!(
                        "read {} bytes:\n{}",
                        bytes.len(),
                        HexViewBuilder::new(&bytes).finish()
                    );
                    self.in_buf.extend_from_slice(&bytes);
                }
                Ok(RecvStatus::WouldBlock) => break,
                Ok(RecvStatus::Closed) => {
                    self.fail(ReactorError::PeerDisconnect);
                    return Ok(());
                }
                Err(err) => {
                    self.fail(ReactorError::SocketError(err.to_string()));
                    return Ok(());
                }
            }
        }

        self.decode_available();
        Ok(())
    }

    // ---- internals -------------------------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), CallError> {
        if self.is_terminal() {
            return Err(CallError::Terminated);
        }
        if self.state != ReactorState::Connected {
            return Err(CallError::NotConnected);
        }
        Ok(())
    }

    /// §4.4: the smallest id in `[1, 65535]` not currently in `pending_ack`, starting the search
    /// one past the previously issued id and wrapping.
    fn alloc_packet_id(&mut self) -> Result<PacketId, CallError> {
        if self.pending_ack.len() >= u16::MAX as usize {
            let err = ReactorError::TooManyInFlight;
            self.fail(err.clone());
            return Err(CallError::Reactor(err));
        }

        let mut candidate = self.last_packet_id.wrapping_add(1);
        if candidate == 0 {
            candidate = 1;
        }
        let start = candidate;

        loop {
            if !self.pending_ack.contains_key(&candidate) {
                self.last_packet_id = candidate;
                return Ok(candidate);
            }
            candidate = candidate.wrapping_add(1);
            if candidate == 0 {
                candidate = 1;
            }
            if candidate == start {
                let err = ReactorError::TooManyInFlight;
                self.fail(err.clone());
                return Err(CallError::Reactor(err));
            }
        }
    }

    fn build_connect_packet(&self) -> Connect {
        Connect {
            client_id: self.config.client_id().to_string(),
            clean_session: self.config.clean_session_enabled(),
            keep_alive_s: self.config.keepalive_period_s(),
            username: self.config.username().map(str::to_string),
            password: self.config.password().map(<[u8]>::to_vec),
            will: self.config.will().cloned(),
        }
    }

    /// §4.3 Connecting -> Connack: checks `SO_ERROR`, and on success enqueues the `Connect`
    /// packet and transitions the state; the packet has not necessarily drained to the socket
    /// yet (`want_read` waits on that separately, see its own doc comment).
    fn advance_connecting(&mut self) {
        match self.socket.take_error() {
            Ok(None) => {}
            Ok(Some(err)) => {
                self.fail(ReactorError::SocketError(err.to_string()));
                return;
            }
            Err(err) => {
                self.fail(ReactorError::SocketError(err.to_string()));
                return;
            }
        }

        let connect = self.build_connect_packet();
        trace!("sending CONNECT for client_id={:?}", connect.client_id);
        self.pending_send.push_back(Packet::Connect(connect));
        self.state = ReactorState::Connack;
    }

    /// Moves every queued packet into the byte buffer, then pushes as much of it to the socket
    /// as will go without blocking. A short write leaves the remainder for the next call.
    fn flush_out_buf(&mut self) {
        while let Some(packet) = self.pending_send.pop_front() {
            packet
                .encode(&mut self.out_buf)
                .expect("packet queued by the reactor always satisfies the wire invariants");
        }

        while !self.out_buf.is_empty() {
            match self.socket.send(&self.out_buf) {
                Ok(SendStatus::Sent(n)) => {
                    trace!(
                        "wrote {} bytes:\n{}",
                        n,
                        HexViewBuilder::new(&self.out_buf[..n]).finish()
                    );
                    self.out_buf.advance(n);
                    self.note_write_activity();
                }
                Ok(SendStatus::WouldBlock) => break,
                Ok(SendStatus::Closed) => {
                    self.fail(ReactorError::SocketError("transport closed on send".into()));
                    return;
                }
                Err(err) => {
                    self.fail(ReactorError::SocketError(err.to_string()));
                    return;
                }
            }
        }

        if self.out_buf.is_empty() && self.state == ReactorState::Stopping {
            self.socket.close();
            self.cancel_all_timers();
            self.state = ReactorState::Stopped;
        }
    }

    /// Re-arms the keepalive deadline on every successful outbound write (§4.3 Keepalive
    /// algorithm). A `keep_alive_s` of `0` disables keepalive entirely.
    fn note_write_activity(&mut self) {
        let period = self.config.keepalive_period_s();
        if period == 0 {
            return;
        }
        if let Some(token) = self.keepalive_token.take() {
            self.scheduler.cancel(token);
        }
        self.keepalive_token = Some(
            self.scheduler
                .add(Duration::from_secs(u64::from(period)), TimerKind::Keepalive),
        );
    }

    fn handle_keepalive_fired(&mut self) {
        if self.state != ReactorState::Connected {
            return;
        }
        debug!("keepalive elapsed, sending PINGREQ");
        self.pending_send.push_back(Packet::Pingreq);

        let half = Duration::from_millis(u64::from(self.config.keepalive_period_s()) * 500);
        self.ping_timeout_token = Some(self.scheduler.add(half, TimerKind::PingTimeout));
    }

    fn handle_ping_timeout_fired(&mut self) {
        self.ping_timeout_token = None;
        warn!("no PINGRESP within the keepalive response window");
        self.fail(ReactorError::KeepaliveTimeout);
    }

    fn decode_available(&mut self) {
        loop {
            match mqtt_core::decode(&self.in_buf) {
                Ok((consumed, packet)) => {
                    self.in_buf.advance(consumed);
                    self.dispatch_inbound(packet);
                    if self.is_terminal() {
                        return;
                    }
                }
                Err(DecodeError::Underflow) => break,
                Err(err) => {
                    self.fail(ReactorError::MalformedPacket(err));
                    return;
                }
            }
        }
    }

    fn dispatch_inbound(&mut self, packet: Packet) {
        match self.state {
            ReactorState::Connack => match packet {
                Packet::Connack(connack) => self.handle_connack(connack),
                other => {
                    self.fail(ReactorError::ProtocolViolation(format!(
                        "expected CONNACK, got {:?}",
                        other.packet_type()
                    )));
                }
            },
            ReactorState::Connected | ReactorState::Stopping => {
                self.handle_connected_packet(packet);
            }
            _ => {
                self.fail(ReactorError::ProtocolViolation(
                    "unexpected packet for current state".into(),
                ));
            }
        }
    }

    fn handle_connack(&mut self, connack: Connack) {
        if !connack.return_code.is_accepted() {
            self.fail(ReactorError::ConnackRefused(connack.return_code));
            return;
        }
        if self.config.clean_session_enabled() && connack.session_present {
            self.fail(ReactorError::ProtocolViolation(
                "CONNACK session_present set despite clean_session=true".into(),
            ));
            return;
        }

        debug!("CONNACK accepted, session_present={}", connack.session_present);
        self.state = ReactorState::Connected;
        self.callbacks.on_connack(&connack);

        if !self.config.clean_session_enabled() {
            let replays: Vec<Packet> = self.pending_ack.values().map(AckKind::replay_packet).collect();
            self.pending_send.extend(replays);
        }
    }

    fn handle_connected_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Suback(suback) => match self.pending_ack.remove(&suback.packet_id) {
                Some(AckKind::Subscribe(_)) => self.callbacks.on_suback(&suback),
                _ => self.fail(ReactorError::ProtocolViolation(format!(
                    "unexpected SUBACK for packet id {}",
                    suback.packet_id
                ))),
            },
            Packet::Unsuback(unsuback) => match self.pending_ack.remove(&unsuback.packet_id) {
                Some(AckKind::Unsubscribe(_)) => self.callbacks.on_unsuback(&unsuback),
                _ => self.fail(ReactorError::ProtocolViolation(format!(
                    "unexpected UNSUBACK for packet id {}",
                    unsuback.packet_id
                ))),
            },
            Packet::Puback(puback) => match self.pending_ack.remove(&puback.packet_id) {
                Some(AckKind::PublishQos1(_)) => self.callbacks.on_puback(&puback),
                _ => self.fail(ReactorError::ProtocolViolation(format!(
                    "unexpected PUBACK for packet id {}",
                    puback.packet_id
                ))),
            },
            Packet::Publish(publish) => self.handle_inbound_publish(publish),
            Packet::Pingresp => {
                if let Some(token) = self.ping_timeout_token.take() {
                    self.scheduler.cancel(token);
                }
            }
            Packet::Pubrec(_) | Packet::Pubrel(_) | Packet::Pubcomp(_) => {
                self.fail(ReactorError::ProtocolViolation(
                    "QoS 2 is not supported".into(),
                ));
            }
            other => {
                self.fail(ReactorError::ProtocolViolation(format!(
                    "unexpected {:?} packet from broker",
                    other.packet_type()
                )));
            }
        }
    }

    fn handle_inbound_publish(&mut self, publish: Publish) {
        match publish.qos {
            QoS::AtMostOnce => self.callbacks.on_publish(&publish),
            QoS::AtLeastOnce => {
                let packet_id = publish
                    .packet_id
                    .expect("qos>0 publish always carries a packet id");
                self.callbacks.on_publish(&publish);
                self.pending_send.push_back(Packet::Puback(Puback { packet_id }));
            }
            QoS::ExactlyOnce => {
                self.fail(ReactorError::ProtocolViolation(
                    "QoS 2 publish is not supported".into(),
                ));
            }
        }
    }

    fn cancel_all_timers(&mut self) {
        if let Some(token) = self.keepalive_token.take() {
            self.scheduler.cancel(token);
        }
        if let Some(token) = self.ping_timeout_token.take() {
            self.scheduler.cancel(token);
        }
    }

    /// Absorbs `err` into the terminal `Error` state (§7), closing the socket and cancelling
    /// every timer the reactor owns. Invokes `on_disconnect` if the session had reached
    /// `Connack`/`Connected`/`Stopping`, `on_connect_fail` otherwise.
    fn fail(&mut self, err: ReactorError) {
        if self.is_terminal() {
            return;
        }

        let reached_connack = matches!(
            self.state,
            ReactorState::Connack | ReactorState::Connected | ReactorState::Stopping
        );

        warn!("reactor entering Error state: {}", err);

        self.state = ReactorState::Error;
        self.socket.close();
        self.cancel_all_timers();
        self.pending_send.clear();
        if self.config.clean_session_enabled() {
            self.pending_ack.clear();
        }

        if reached_connack {
            self.callbacks.on_disconnect(Some(&err));
        } else {
            self.callbacks.on_connect_fail(&err);
        }

        self.error = Some(err);
    }
}
