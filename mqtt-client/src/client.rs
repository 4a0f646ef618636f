//! The stateful driver that turns user operations into protocol packet
//! exchanges.
//!
//! `Client` owns the send buffer (interpreted as a [`MessageQueue`]
//! arena), the receive buffer, the packet identifier generator, and the
//! user's publish callback. Every public operation enqueues a packet and
//! returns immediately; [`Client::sync`] is the only place bytes actually
//! cross the [`Transport`].

use std::collections::HashSet;
use std::time::Instant;

use mqtt_core::{
    Connect, ConnectReturnCode, Error, LastWill, Packet, Publish, PublishAck, PublishComplete,
    PublishFlags, PublishReceived, PublishRelease, QoS, Subscribe, SubscribeReturnCode, Type,
    Unsubscribe,
};
use mqtt_queue::{MessageQueue, State};

use crate::config::ClientConfig;
use crate::lock::ClientLock;
use crate::transport::{Progress, Transport};
use crate::types::{ConnectOptions, PublishData};

/// Sentinel packet id used for queue bookkeeping on control types that
/// carry no real packet identifier on the wire (CONNECT, PINGREQ). Safe
/// because the spec permits at most one outstanding instance of each.
const NO_PACKET_ID: u16 = 0;

struct Inner<T> {
    transport: T,
    send_buf: Vec<u8>,
    curr: usize,
    queue_tail: usize,
    epoch: Instant,
    recv_buf: Vec<u8>,
    recv_len: usize,
    pid: mqtt_pid::PidGenerator,
    error: Option<Error>,
    config: ClientConfig,
    callback: Box<dyn FnMut(&PublishData<'_>)>,
    time_of_last_send: Instant,
    /// QoS 2 packet ids already delivered to the callback, awaiting the
    /// PUBREL that closes the inbound handshake. Used to suppress a
    /// duplicate delivery on a retransmitted PUBLISH when
    /// [`ClientConfig::suppress_duplicate_qos2_delivery`] is set.
    qos2_delivered: HashSet<u16>,
}

/// Reattaches the arena view over `send_buf` from its saved cursor pair.
/// A free function (not a method) so it can be called with explicit,
/// disjoint field borrows from inside [`recv_available`] alongside a
/// decoded packet still borrowing `recv_buf`.
fn attach(send_buf: &mut [u8], curr: usize, queue_tail: usize, epoch: Instant) -> MessageQueue<'_> {
    MessageQueue::attach(send_buf, curr, queue_tail, epoch)
}

fn enqueue(
    send_buf: &mut [u8],
    curr: &mut usize,
    queue_tail: &mut usize,
    epoch: Instant,
    packet: &Packet,
    control_type: Type,
    packet_id: u16,
) -> Result<usize, Error> {
    let size = mqtt_codec::packed_size(packet)?;
    let mut q = attach(send_buf, *curr, *queue_tail, epoch);
    let buf = q.register(size, control_type, packet_id)?;
    let n = mqtt_codec::pack_packet(buf, packet)?;
    let (new_curr, new_tail) = q.cursors();
    *curr = new_curr;
    *queue_tail = new_tail;
    Ok(n)
}

fn find_and_complete(
    send_buf: &mut [u8],
    curr: usize,
    queue_tail: usize,
    epoch: Instant,
    control_type: Type,
    packet_id: u16,
) -> bool {
    let mut q = attach(send_buf, curr, queue_tail, epoch);
    match q.find(control_type, packet_id) {
        Some(i) => {
            q.set_state(i, State::Complete);
            true
        }
        None => false,
    }
}

/// Applies the effect of one decoded inbound packet: callback dispatch,
/// queue bookkeeping, and any response packet it provokes.
///
/// A free function, not an `Inner` method: `packet` borrows the caller's
/// `recv_buf`, so the rest of `Inner`'s fields must be passed in as
/// separate, disjoint borrows rather than through a `&mut self` receiver.
#[allow(clippy::too_many_arguments)]
fn dispatch(
    packet: &Packet,
    send_buf: &mut [u8],
    curr: &mut usize,
    queue_tail: &mut usize,
    epoch: Instant,
    callback: &mut dyn FnMut(&PublishData<'_>),
    qos2_delivered: &mut HashSet<u16>,
    suppress_duplicate_qos2_delivery: bool,
) -> Result<(), Error> {
    match packet {
        Packet::ConnectAck(ack) => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::CONNECT, NO_PACKET_ID) {
                return Err(Error::AckOfUnknown(NO_PACKET_ID));
            }
            ack.return_code.ok().map_err(Error::ConnectionRefused)?;
            log::info!("connected (session_present={})", ack.session_present);
            Ok(())
        }
        Packet::Publish(p) => {
            let data = PublishData {
                topic_name: p.topic_name,
                payload: p.payload,
                qos: p.qos,
                retain: p.retain,
                dup: p.dup,
                packet_id: p.packet_id,
            };
            match p.qos {
                QoS::AtMostOnce => {
                    callback(&data);
                }
                QoS::AtLeastOnce => {
                    let id = p
                        .packet_id
                        .ok_or(Error::MalformedResponse("qos 1 publish missing packet id"))?;
                    callback(&data);
                    let ack = Packet::PublishAck(PublishAck { packet_id: id });
                    enqueue(send_buf, curr, queue_tail, epoch, &ack, Type::PUBACK, id)?;
                }
                QoS::ExactlyOnce => {
                    let id = p
                        .packet_id
                        .ok_or(Error::MalformedResponse("qos 2 publish missing packet id"))?;
                    let already_delivered = qos2_delivered.contains(&id);
                    if !already_delivered || !suppress_duplicate_qos2_delivery {
                        callback(&data);
                    }
                    qos2_delivered.insert(id);
                    let ack = Packet::PublishReceived(PublishReceived { packet_id: id });
                    enqueue(send_buf, curr, queue_tail, epoch, &ack, Type::PUBREC, id)?;
                }
            }
            Ok(())
        }
        Packet::PublishAck(ack) => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::PUBLISH, ack.packet_id) {
                return Err(Error::AckOfUnknown(ack.packet_id));
            }
            Ok(())
        }
        Packet::PublishReceived(ack) => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::PUBLISH, ack.packet_id) {
                return Err(Error::AckOfUnknown(ack.packet_id));
            }
            let rel = Packet::PublishRelease(PublishRelease {
                packet_id: ack.packet_id,
            });
            enqueue(send_buf, curr, queue_tail, epoch, &rel, Type::PUBREL, ack.packet_id)?;
            Ok(())
        }
        Packet::PublishRelease(rel) => {
            qos2_delivered.remove(&rel.packet_id);
            let comp = Packet::PublishComplete(PublishComplete {
                packet_id: rel.packet_id,
            });
            enqueue(send_buf, curr, queue_tail, epoch, &comp, Type::PUBCOMP, rel.packet_id)?;
            Ok(())
        }
        Packet::PublishComplete(ack) => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::PUBREL, ack.packet_id) {
                return Err(Error::AckOfUnknown(ack.packet_id));
            }
            Ok(())
        }
        Packet::SubscribeAck(ack) => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::SUBSCRIBE, ack.packet_id) {
                return Err(Error::AckOfUnknown(ack.packet_id));
            }
            if ack
                .status
                .iter()
                .any(|s| matches!(s, SubscribeReturnCode::Failure))
            {
                log::warn!("subscribe {} partially refused: {:?}", ack.packet_id, ack.status);
            } else {
                log::info!("subscribe {} acknowledged: {:?}", ack.packet_id, ack.status);
            }
            Ok(())
        }
        Packet::UnsubscribeAck(ack) => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::UNSUBSCRIBE, ack.packet_id) {
                return Err(Error::AckOfUnknown(ack.packet_id));
            }
            Ok(())
        }
        Packet::Pong => {
            if !find_and_complete(send_buf, *curr, *queue_tail, epoch, Type::PINGREQ, NO_PACKET_ID) {
                return Err(Error::AckOfUnknown(NO_PACKET_ID));
            }
            Ok(())
        }
        Packet::Connect(_)
        | Packet::Subscribe(_)
        | Packet::Unsubscribe(_)
        | Packet::Disconnect
        | Packet::Ping => Err(Error::MalformedResponse(
            "received a client-to-broker packet type from the broker",
        )),
    }
}

/// True if a record of `control_type` whose first payload byte encodes
/// `flags` completes the instant it is fully written, with no further
/// acknowledgment expected.
fn completes_on_write(send_buf: &[u8], start: usize, control_type: Type) -> bool {
    match control_type {
        Type::PUBLISH => send_buf[start] & PublishFlags::QOS.bits() == 0,
        Type::PUBACK | Type::PUBREC | Type::PUBCOMP | Type::PINGRESP | Type::DISCONNECT => true,
        _ => false,
    }
}

impl<T: Transport> Inner<T> {
    fn queue(&mut self) -> MessageQueue<'_> {
        attach(&mut self.send_buf, self.curr, self.queue_tail, self.epoch)
    }

    fn check_error(&self) -> Result<(), Error> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn is_pending(&mut self, control_type: Type, packet_id: u16) -> bool {
        let q = self.queue();
        (0..q.length()).any(|i| {
            let r = q.get(i).expect("index within length()");
            r.control_type == control_type && r.packet_id == packet_id && r.state != State::Complete
        })
    }

    fn enqueue(&mut self, packet: &Packet, control_type: Type, packet_id: u16) -> Result<usize, Error> {
        enqueue(
            &mut self.send_buf,
            &mut self.curr,
            &mut self.queue_tail,
            self.epoch,
            packet,
            control_type,
            packet_id,
        )
    }

    fn connect(&mut self, options: &ConnectOptions) -> Result<usize, Error> {
        self.check_error()?;
        if self.is_pending(Type::CONNECT, NO_PACKET_ID) {
            return Err(Error::InvalidArgument(
                "a CONNECT is already awaiting CONNACK",
            ));
        }
        if options.password.is_some() && options.user_name.is_none() {
            return Err(Error::InvalidArgument("password requires a user name"));
        }
        let last_will = options.last_will.map(|w| LastWill {
            qos: w.qos,
            retain: w.retain,
            topic_name: w.topic,
            message: w.message,
        });
        let packet = Packet::Connect(Connect {
            clean_session: options.clean_session,
            keep_alive: options.keep_alive,
            client_id: options.client_id,
            last_will,
            user_name: options.user_name,
            password: options.password,
        });
        self.enqueue(&packet, Type::CONNECT, NO_PACKET_ID)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<usize, Error> {
        self.check_error()?;
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(self.pid.next_pid())
        };
        let packet = Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic_name: topic,
            packet_id,
            payload,
        });
        self.enqueue(&packet, Type::PUBLISH, packet_id.unwrap_or(NO_PACKET_ID))
    }

    fn subscribe(&mut self, subscriptions: &[(&str, QoS)]) -> Result<usize, Error> {
        self.check_error()?;
        if subscriptions.is_empty() {
            return Err(Error::InvalidArgument(
                "subscribe requires at least one topic filter",
            ));
        }
        let packet_id = self.pid.next_pid();
        let packet = Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions: subscriptions.to_vec(),
        });
        self.enqueue(&packet, Type::SUBSCRIBE, packet_id)
    }

    fn unsubscribe(&mut self, topic_filters: &[&str]) -> Result<usize, Error> {
        self.check_error()?;
        if topic_filters.is_empty() {
            return Err(Error::InvalidArgument(
                "unsubscribe requires at least one topic filter",
            ));
        }
        let packet_id = self.pid.next_pid();
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topic_filters: topic_filters.to_vec(),
        });
        self.enqueue(&packet, Type::UNSUBSCRIBE, packet_id)
    }

    fn ping(&mut self) -> Result<usize, Error> {
        self.check_error()?;
        self.enqueue(&Packet::Ping, Type::PINGREQ, NO_PACKET_ID)
    }

    fn disconnect(&mut self) -> Result<usize, Error> {
        self.check_error()?;
        self.enqueue(&Packet::Disconnect, Type::DISCONNECT, NO_PACKET_ID)
    }

    fn retransmit_timeouts(&mut self) {
        let len = self.queue().length();
        let now = Instant::now();
        for i in 0..len {
            let (state, time_sent, control_type, start) = {
                let q = self.queue();
                match q.get(i) {
                    Some(r) => (r.state, r.time_sent, r.control_type, r.start),
                    None => continue,
                }
            };
            if state != State::AwaitingAck {
                continue;
            }
            let elapsed = match time_sent {
                Some(t) => now.saturating_duration_since(t),
                None => continue,
            };
            if elapsed > self.config.response_timeout {
                if control_type == Type::PUBLISH {
                    self.send_buf[start] |= PublishFlags::DUP.bits();
                }
                self.queue().mark_unsent(i);
                log::debug!("retransmitting {:?} after {:?} unacknowledged", control_type, elapsed);
            }
        }
    }

    fn send_pending(&mut self) -> Result<(), Error> {
        if self.error.is_some() {
            return Ok(());
        }
        let len = self.queue().length();
        for i in 0..len {
            let (control_type, start, size, sent, state) = {
                let q = self.queue();
                match q.get(i) {
                    Some(r) => (r.control_type, r.start, r.size, r.sent, r.state),
                    None => continue,
                }
            };
            if state != State::Unsent {
                continue;
            }
            let chunk = &self.send_buf[start + sent..start + size];
            if chunk.is_empty() {
                continue;
            }
            match self.transport.send(chunk) {
                Ok(Progress::Some(n)) if n > 0 => {
                    self.time_of_last_send = Instant::now();
                    let new_sent = sent + n;
                    if new_sent >= size {
                        if completes_on_write(&self.send_buf, start, control_type) {
                            self.queue().set_state(i, State::Complete);
                        } else {
                            let now = self.time_of_last_send;
                            self.queue().mark_sent(i, now);
                        }
                    } else {
                        self.queue().set_sent(i, new_sent);
                    }
                }
                Ok(Progress::Some(_)) | Ok(Progress::WouldBlock) => {}
                Err(e) => {
                    self.error = Some(e.clone());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn recv_available(&mut self) -> Result<(), Error> {
        if self.error.is_some() {
            return Ok(());
        }
        if self.recv_len < self.recv_buf.len() {
            match self.transport.recv(&mut self.recv_buf[self.recv_len..]) {
                Ok(Progress::Some(n)) => self.recv_len += n,
                Ok(Progress::WouldBlock) => {}
                Err(e) => {
                    self.error = Some(e.clone());
                    return Err(e);
                }
            }
        }

        loop {
            let decoded = mqtt_codec::unpack_packet(&self.recv_buf[..self.recv_len]);
            let (consumed, packet) = match decoded {
                Ok(Some(v)) => v,
                Ok(None) => break,
                Err(e) => {
                    self.error = Some(e.clone());
                    return Err(e);
                }
            };

            let result = dispatch(
                &packet,
                &mut self.send_buf,
                &mut self.curr,
                &mut self.queue_tail,
                self.epoch,
                &mut *self.callback,
                &mut self.qos2_delivered,
                self.config.suppress_duplicate_qos2_delivery,
            );
            self.recv_buf.copy_within(consumed..self.recv_len, 0);
            self.recv_len -= consumed;

            if let Err(e) = result {
                if e.is_sticky() {
                    self.error = Some(e.clone());
                    return Err(e);
                }
                log::warn!("dropping a decoded packet: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn maybe_ping(&mut self) -> Result<(), Error> {
        if self.error.is_some() {
            return Ok(());
        }
        let now = Instant::now();
        if now.saturating_duration_since(self.time_of_last_send) < self.config.keep_alive {
            return Ok(());
        }
        if self.is_pending(Type::PINGREQ, NO_PACKET_ID) {
            return Ok(());
        }
        self.enqueue(&Packet::Ping, Type::PINGREQ, NO_PACKET_ID)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), Error> {
        if self.error.is_some() {
            return Ok(());
        }
        self.retransmit_timeouts();
        self.send_pending()?;
        self.recv_available()?;
        self.maybe_ping()?;
        self.queue().clean();
        Ok(())
    }
}

/// A non-blocking client for the protocol core: connect, publish,
/// subscribe, unsubscribe, ping, and disconnect, driven by periodic
/// calls to [`Client::sync`].
///
/// Every public method takes `&self`: with the default `sync` feature,
/// [`ClientLock`] serializes them behind a `Mutex` so the client can be
/// shared across threads (one calling `sync` in a loop, others calling
/// `publish`); disabling default features swaps in a `RefCell` for a
/// caller that has proven single-threaded access.
pub struct Client<T: Transport> {
    inner: ClientLock<Inner<T>>,
}

impl<T: Transport> Client<T> {
    /// Builds a client over `transport`, with a send arena of
    /// `send_capacity` bytes and a receive buffer of `recv_capacity`
    /// bytes, both sized once and never reallocated. `callback` is
    /// invoked synchronously from [`Client::sync`] for every inbound
    /// PUBLISH.
    pub fn new(
        transport: T,
        send_capacity: usize,
        recv_capacity: usize,
        config: ClientConfig,
        callback: impl FnMut(&PublishData<'_>) + 'static,
    ) -> Self {
        let now = Instant::now();
        Client {
            inner: ClientLock::new(Inner {
                transport,
                send_buf: vec![0u8; send_capacity],
                curr: 0,
                queue_tail: send_capacity,
                epoch: now,
                recv_buf: vec![0u8; recv_capacity],
                recv_len: 0,
                pid: mqtt_pid::PidGenerator::new(config.pid_seed),
                error: None,
                config,
                callback: Box::new(callback),
                time_of_last_send: now,
                qos2_delivered: HashSet::new(),
            }),
        }
    }

    /// The client's sticky error, if any. Once set, every operation and
    /// `sync` return the same error until [`Client::reinit`].
    pub fn error(&self) -> Option<Error> {
        self.inner.with_mut(|inner| inner.error.clone())
    }

    /// Clears the sticky error and the outgoing queue and receive
    /// buffer, readying the client for a fresh CONNECT. Does not touch
    /// the transport; callers are responsible for establishing a new
    /// connection first.
    pub fn reinit(&self) {
        self.inner.with_mut(|inner| {
            inner.error = None;
            inner.curr = 0;
            inner.queue_tail = inner.send_buf.len();
            inner.recv_len = 0;
            inner.qos2_delivered.clear();
        });
    }

    /// Serializes and enqueues a CONNECT. Rejected while a prior CONNECT
    /// is still awaiting CONNACK, or while the sticky error is set.
    pub fn connect(&self, options: &ConnectOptions) -> Result<usize, Error> {
        self.inner.with_mut(|inner| inner.connect(options))
    }

    /// Serializes and enqueues a PUBLISH. `qos` determines whether a
    /// fresh packet id is drawn and which acknowledgment, if any, the
    /// message awaits.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<usize, Error> {
        self.inner
            .with_mut(|inner| inner.publish(topic, payload, qos, retain))
    }

    /// Serializes and enqueues a SUBSCRIBE covering every `(filter, qos)`
    /// pair in `subscriptions`.
    pub fn subscribe(&self, subscriptions: &[(&str, QoS)]) -> Result<usize, Error> {
        self.inner.with_mut(|inner| inner.subscribe(subscriptions))
    }

    /// Serializes and enqueues an UNSUBSCRIBE covering every filter in
    /// `topic_filters`.
    pub fn unsubscribe(&self, topic_filters: &[&str]) -> Result<usize, Error> {
        self.inner.with_mut(|inner| inner.unsubscribe(topic_filters))
    }

    /// Serializes and enqueues a PINGREQ, unless one is already queued
    /// and unanswered.
    pub fn ping(&self) -> Result<usize, Error> {
        self.inner.with_mut(|inner| inner.ping())
    }

    /// Serializes and enqueues a DISCONNECT. No acknowledgment is
    /// expected; the caller remains responsible for closing the
    /// transport.
    pub fn disconnect(&self) -> Result<usize, Error> {
        self.inner.with_mut(|inner| inner.disconnect())
    }

    /// Drives one tick of the protocol: retransmits timed-out
    /// `AWAITING_ACK` entries, drains the outgoing queue to the
    /// transport, decodes and dispatches whatever has arrived, enqueues
    /// a keep-alive PINGREQ if due, and compacts the queue. A no-op once
    /// the sticky error is set.
    pub fn sync(&self) -> Result<(), Error> {
        self.inner.with_mut(|inner| inner.sync())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// A transport double backed by in-memory byte queues: reads drain a
    /// caller-seeded inbound queue, writes accumulate into an outbound
    /// buffer the test can inspect.
    #[derive(Clone)]
    struct MockTransport {
        inbound: Arc<Mutex<VecDeque<u8>>>,
        outbound: Arc<Mutex<Vec<u8>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            MockTransport {
                inbound: Arc::new(Mutex::new(VecDeque::new())),
                outbound: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().extend(bytes.iter().copied());
        }

        fn outbound_bytes(&self) -> Vec<u8> {
            self.outbound.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, buf: &[u8]) -> Result<Progress, Error> {
            self.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(Progress::Some(buf.len()))
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<Progress, Error> {
            let mut inbound = self.inbound.lock().unwrap();
            if inbound.is_empty() {
                return Ok(Progress::WouldBlock);
            }
            let n = buf.len().min(inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = inbound.pop_front().unwrap();
            }
            Ok(Progress::Some(n))
        }
    }

    fn test_client(transport: MockTransport) -> Client<MockTransport> {
        Client::new(transport, 1024, 1024, ClientConfig::default(), |_| {})
    }

    #[test]
    fn connect_serializes_expected_bytes() {
        let client = test_client(MockTransport::new());
        let options = ConnectOptions {
            client_id: "liam",
            keep_alive: 120,
            clean_session: false,
            last_will: None,
            user_name: None,
            password: None,
        };
        let n = client.connect(&options).unwrap();
        assert_eq!(n, 18);
    }

    #[test]
    fn connect_while_awaiting_connack_is_rejected() {
        let client = test_client(MockTransport::new());
        let options = ConnectOptions::default();
        client.connect(&options).unwrap();
        assert!(matches::matches!(
            client.connect(&options),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn qos0_publish_completes_without_waiting() {
        let client = test_client(MockTransport::new());
        client.publish("topic1", b"0123456789", QoS::AtMostOnce, true).unwrap();
        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 0, "qos0 publish is swept by clean()");
        });
    }

    #[test]
    fn qos1_publish_awaits_puback() {
        let client = test_client(MockTransport::new());
        client.publish("topic1", b"payload", QoS::AtLeastOnce, false).unwrap();
        client.sync().unwrap();

        let packet_id = client.inner.with_mut(|inner| {
            let q = inner.queue();
            assert_eq!(q.length(), 1);
            let r = q.get(0).unwrap();
            assert_eq!(r.state, State::AwaitingAck);
            r.packet_id
        });

        let mut puback = [0u8; 4];
        let n = mqtt_codec::pack_publish_ack(&mut puback, &PublishAck { packet_id }).unwrap();
        let transport = client.inner.with_mut(|inner| {
            // re-derive the transport handle to seed inbound bytes
            inner.transport.clone()
        });
        transport.push_inbound(&puback[..n]);

        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 0);
        });
    }

    #[test]
    fn qos2_handshake_runs_publish_to_completion() {
        let client = test_client(MockTransport::new());
        client.publish("topic1", b"payload", QoS::ExactlyOnce, false).unwrap();
        client.sync().unwrap();

        let packet_id = client
            .inner
            .with_mut(|inner| inner.queue().get(0).unwrap().packet_id);

        let transport = client.inner.with_mut(|inner| inner.transport.clone());
        let mut buf = [0u8; 4];
        let n = mqtt_codec::pack_publish_received(&mut buf, &PublishReceived { packet_id }).unwrap();
        transport.push_inbound(&buf[..n]);

        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            let q = inner.queue();
            assert_eq!(q.length(), 1, "PUBREL takes the PUBLISH's place");
            let r = q.get(0).unwrap();
            assert_eq!(r.control_type, Type::PUBREL);
            assert_eq!(r.state, State::AwaitingAck);
        });

        let n = mqtt_codec::pack_publish_complete(&mut buf, &PublishComplete { packet_id }).unwrap();
        transport.push_inbound(&buf[..n]);
        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 0);
        });
    }

    #[test]
    fn inbound_publish_qos2_invokes_callback_once_per_id() {
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        let deliveries_clone = deliveries.clone();
        let transport = MockTransport::new();
        let client = Client::new(transport.clone(), 1024, 1024, ClientConfig::default(), move |data| {
            deliveries_clone.lock().unwrap().push(data.payload.to_vec());
        });

        let publish = Publish {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic_name: "topic1",
            packet_id: Some(7),
            payload: b"hello",
        };
        let mut buf = [0u8; 64];
        let n = mqtt_codec::pack_publish(&mut buf, &publish).unwrap();
        transport.push_inbound(&buf[..n]);
        // retransmitted duplicate with the same id, still awaiting PUBCOMP
        transport.push_inbound(&buf[..n]);

        client.sync().unwrap();

        assert_eq!(deliveries.lock().unwrap().len(), 1, "duplicate suppressed by default");
    }

    #[test]
    fn connack_refusal_sets_sticky_error() {
        let transport = MockTransport::new();
        let client = test_client(transport.clone());
        client.connect(&ConnectOptions::default()).unwrap();

        let ack = mqtt_core::ConnectAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        };
        let mut buf = [0u8; 8];
        let n = mqtt_codec::pack_connect_ack(&mut buf, &ack).unwrap();
        transport.push_inbound(&buf[..n]);

        assert!(client.sync().is_err());
        assert!(matches::matches!(client.error(), Some(Error::ConnectionRefused(_))));

        // the error latches: further operations are refused
        assert!(matches::matches!(
            client.publish("t", b"x", QoS::AtMostOnce, false),
            Err(Error::ConnectionRefused(_))
        ));

        client.reinit();
        assert!(client.error().is_none());
    }

    #[test]
    fn subscribe_awaits_suback() {
        let transport = MockTransport::new();
        let client = test_client(transport.clone());
        client
            .subscribe(&[("a/b", QoS::AtMostOnce), ("c/d", QoS::AtLeastOnce)])
            .unwrap();
        client.sync().unwrap();

        let packet_id = client
            .inner
            .with_mut(|inner| inner.queue().get(0).unwrap().packet_id);

        let ack = mqtt_core::SubscribeAck {
            packet_id,
            status: vec![
                SubscribeReturnCode::Success(QoS::AtMostOnce),
                SubscribeReturnCode::Success(QoS::AtLeastOnce),
            ],
        };
        let mut buf = [0u8; 16];
        let n = mqtt_codec::pack_subscribe_ack(&mut buf, &ack).unwrap();
        transport.push_inbound(&buf[..n]);

        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 0);
        });
    }

    #[test]
    fn ping_awaits_pingresp_and_is_not_duplicated() {
        let transport = MockTransport::new();
        let client = test_client(transport.clone());
        client.ping().unwrap();
        client.sync().unwrap();

        // a second sync before PINGRESP arrives must not enqueue another PINGREQ
        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 1);
        });

        let mut buf = [0u8; 2];
        let n = mqtt_codec::pack_pong(&mut buf).unwrap();
        transport.push_inbound(&buf[..n]);
        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 0);
        });
    }

    #[test]
    fn disconnect_has_no_pending_acknowledgment() {
        let client = test_client(MockTransport::new());
        client.disconnect().unwrap();
        client.sync().unwrap();
        client.inner.with_mut(|inner| {
            assert_eq!(inner.queue().length(), 0);
        });
    }
}
