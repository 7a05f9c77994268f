//! Per-connection stream state
//!
//! The engine is sans-IO: every entry point ([`Stream::write`],
//! [`Stream::handle_packet`], [`Stream::close`], [`Stream::due_resends`])
//! returns a [`StreamActions`] describing packets to transmit, payloads to
//! deliver and lifecycle events. The session task that owns the stream map
//! performs all socket IO and holds the single retransmission timer, so no
//! timer can outlive a destroyed stream.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use eeplink_protocol::destination::{Destination, LocalDestination};
use eeplink_protocol::packet::{replay_guard_nacks, Packet, PacketFlags, DEFAULT_RESEND_DELAY};

use crate::error::{Result, StreamError};

/// Stream ids are chosen uniformly from `[1, 4_000_000_000]`.
pub const MAX_STREAM_ID: u32 = 4_000_000_000;

/// Interval between retransmissions of an unacked packet.
pub const RESEND_INTERVAL: Duration = Duration::from_secs(DEFAULT_RESEND_DELAY as u64);

/// Total time a packet may stay unacked before the stream is destroyed.
pub const RESEND_CEILING: Duration = Duration::from_secs(300);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, nothing sent yet
    Init,
    /// Initiator sent its SYNC, no reply yet
    SynSent,
    /// Both directions live
    Established,
    /// A CLOSE has been sent, unacked data may remain in flight
    Closing,
    /// Terminal
    Closed,
}

/// Lifecycle notifications produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// First packet exchanged in both directions.
    Established,
    /// The remote asked to close; delivery of buffered data continues.
    RemoteClosed,
    /// Terminal: the stream is gone. `Ok` is a clean close.
    Closed(std::result::Result<(), StreamError>),
}

/// Everything a call into the engine wants the driver to do.
#[derive(Debug, Default)]
pub struct StreamActions {
    /// Packets to transmit, in order. Signatures are already attached
    /// where required.
    pub send: Vec<Packet>,
    /// Payload chunks to hand to the application, in sequence order.
    pub delivered: Vec<Vec<u8>>,
    /// Sequence numbers whose packets were acked and retired.
    pub retired: Vec<u32>,
    /// Lifecycle events, in order.
    pub events: Vec<StreamEvent>,
}

impl StreamActions {
    fn merge(&mut self, mut other: StreamActions) {
        self.send.append(&mut other.send);
        self.delivered.append(&mut other.delivered);
        self.retired.append(&mut other.retired);
        self.events.append(&mut other.events);
    }
}

struct SentPacket {
    packet: Packet,
    first_send: Instant,
    last_send: Instant,
}

/// One reliable connection.
pub struct Stream {
    id: u32,
    remote_id: u32,
    initiator: bool,
    state: StreamState,
    local: Arc<LocalDestination>,
    remote: Option<Destination>,
    from_port: u16,
    to_port: u16,
    next_seq: u32,
    /// Highest contiguous received sequence; `None` until the first one.
    ack_through: Option<u32>,
    missing: BTreeSet<u32>,
    received: BTreeMap<u32, Vec<u8>>,
    sent: BTreeMap<u32, SentPacket>,
    close_sent: bool,
    remote_requested_close: bool,
}

fn random_stream_id() -> u32 {
    rand::thread_rng().gen_range(1..=MAX_STREAM_ID)
}

impl Stream {
    /// Create an initiating stream towards `remote`. Nothing is sent until
    /// the first [`Stream::write`].
    pub fn connect(
        local: Arc<LocalDestination>,
        remote: Destination,
        from_port: u16,
        to_port: u16,
    ) -> Self {
        Stream {
            id: random_stream_id(),
            remote_id: 0,
            initiator: true,
            state: StreamState::Init,
            local,
            remote: Some(remote),
            from_port,
            to_port,
            next_seq: 0,
            ack_through: None,
            missing: BTreeSet::new(),
            received: BTreeMap::new(),
            sent: BTreeMap::new(),
            close_sent: false,
            remote_requested_close: false,
        }
    }

    /// Create a responding stream for an incoming SYNC. The SYNC itself is
    /// then fed through [`Stream::handle_packet`].
    ///
    /// The responder's first data packet uses sequence 1; 0 is reserved
    /// for the initiator's SYNC and for pure acks.
    pub fn accept(local: Arc<LocalDestination>, from_port: u16, to_port: u16) -> Self {
        Stream {
            id: random_stream_id(),
            remote_id: 0,
            initiator: false,
            state: StreamState::Init,
            local,
            remote: None,
            from_port,
            to_port,
            next_seq: 1,
            ack_through: None,
            missing: BTreeSet::new(),
            received: BTreeMap::new(),
            sent: BTreeMap::new(),
            close_sent: false,
            remote_requested_close: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn remote(&self) -> Option<&Destination> {
        self.remote.as_ref()
    }

    pub fn from_port(&self) -> u16 {
        self.from_port
    }

    pub fn to_port(&self) -> u16 {
        self.to_port
    }

    /// Sequence numbers still awaiting an ack from the remote.
    pub fn unacked(&self) -> impl Iterator<Item = u32> + '_ {
        self.sent.keys().copied()
    }

    /// The NACK set currently advertised to the remote.
    pub fn missing_packets(&self) -> impl Iterator<Item = u32> + '_ {
        self.missing.iter().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    fn next_expected(&self) -> u32 {
        self.ack_through.map_or(0, |a| a.wrapping_add(1))
    }

    fn base_packet(&self) -> Packet {
        Packet {
            send_stream_id: self.remote_id,
            receive_stream_id: self.id,
            sequence: 0,
            ack_through: self.ack_through.unwrap_or(0),
            nacks: Vec::new(),
            resend_delay: DEFAULT_RESEND_DELAY,
            ..Default::default()
        }
    }

    /// Queue application data. The initiator's first write produces the
    /// signed SYNC carrying the replay guard and the FROM destination.
    pub fn write(&mut self, data: &[u8], now: Instant) -> Result<(u32, StreamActions)> {
        match self.state {
            StreamState::Closed => return Err(StreamError::Closed),
            _ if self.close_sent => return Err(StreamError::Closed),
            StreamState::Init if !self.initiator => return Err(StreamError::NotConnected),
            _ => {}
        }

        let mut actions = StreamActions::default();
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut packet = self.base_packet();
        packet.sequence = seq;
        packet.payload = data.to_vec();

        if self.state == StreamState::Init {
            // initiator SYNC: sequence 0, remote stream id still unknown
            let remote = self.remote.clone().ok_or(StreamError::NotConnected)?;
            packet.send_stream_id = 0;
            packet.ack_through = 0;
            packet.nacks = replay_guard_nacks(&remote);
            packet.flags.set(PacketFlags::SYNCHRONIZE);
            packet.flags.set(PacketFlags::NO_ACK);
            packet.flags.set(PacketFlags::FROM_INCLUDED);
            packet.from = Some(self.local.destination().clone());
            packet.sign_and_encode(&self.local)?;
            self.state = StreamState::SynSent;
        } else {
            packet.nacks = self.missing.iter().copied().collect();
            if self.ack_through.is_none() {
                packet.flags.set(PacketFlags::NO_ACK);
            }
        }

        self.sent.insert(
            seq,
            SentPacket {
                packet: packet.clone(),
                first_send: now,
                last_send: now,
            },
        );
        actions.send.push(packet);
        Ok((seq, actions))
    }

    /// Ask the remote to close. In-flight data keeps retransmitting until
    /// acked; the stream reports [`StreamEvent::Closed`] once drained.
    pub fn close(&mut self, now: Instant) -> Result<StreamActions> {
        if self.close_sent || self.state == StreamState::Closed {
            return Ok(StreamActions::default());
        }
        let mut actions = StreamActions::default();
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut packet = self.base_packet();
        packet.sequence = seq;
        packet.nacks = self.missing.iter().copied().collect();
        packet.flags.set(PacketFlags::CLOSE);
        if self.ack_through.is_none() {
            packet.flags.set(PacketFlags::NO_ACK);
        }
        packet.sign_and_encode(&self.local)?;

        self.sent.insert(
            seq,
            SentPacket {
                packet: packet.clone(),
                first_send: now,
                last_send: now,
            },
        );
        self.close_sent = true;
        self.state = StreamState::Closing;
        actions.send.push(packet);
        Ok(actions)
    }

    /// Feed one incoming packet through the state machine.
    pub fn handle_packet(&mut self, packet: &Packet, _now: Instant) -> StreamActions {
        let mut actions = StreamActions::default();
        if self.state == StreamState::Closed {
            return actions;
        }

        // a packet must be addressed to this stream, come from an unknown
        // remote (SYNC), or name us as the intended receiver
        if packet.send_stream_id != 0
            && packet.send_stream_id != self.id
            && packet.receive_stream_id != self.id
        {
            debug!(
                stream = self.id,
                send_stream_id = packet.send_stream_id,
                "dropping packet for a different stream"
            );
            return actions;
        }

        let verify_against = packet.from.as_ref().or(self.remote.as_ref());
        if packet.requires_signature() {
            let verified = match verify_against {
                Some(remote) => packet.verify(remote, self.local.destination()),
                None => false,
            };
            if !verified {
                warn!(stream = self.id, "dropping packet with bad signature");
                return actions;
            }
        }

        if packet.is_sync() {
            if self.remote.is_none() {
                self.remote = packet.from.clone();
            }
            if !self.initiator && self.remote_id == 0 {
                self.remote_id = packet.receive_stream_id;
            }
        }
        // the initiator learns the responder's stream id from its first reply
        if self.initiator && self.remote_id == 0 && packet.receive_stream_id != 0 {
            self.remote_id = packet.receive_stream_id;
        }

        if matches!(self.state, StreamState::Init | StreamState::SynSent) {
            self.state = StreamState::Established;
            actions.events.push(StreamEvent::Established);
        }

        if packet.is_reset() {
            self.destroy(&mut actions, Err(StreamError::Reset));
            return actions;
        }

        // retire everything acked through `ack_through`, minus the nacks
        if !packet.is_no_ack() {
            let retired: Vec<u32> = self
                .sent
                .range(..=packet.ack_through)
                .map(|(seq, _)| *seq)
                .filter(|seq| !packet.nacks.contains(seq))
                .collect();
            for seq in retired {
                self.sent.remove(&seq);
                actions.retired.push(seq);
            }
        }

        if packet.is_close() && !self.remote_requested_close {
            self.remote_requested_close = true;
            actions.events.push(StreamEvent::RemoteClosed);
        }

        if packet.is_ackable() {
            actions.merge(self.receive_ackable(packet));
        }

        self.check_done(&mut actions);
        actions
    }

    /// Reassembly plus the answering pure ack.
    fn receive_ackable(&mut self, packet: &Packet) -> StreamActions {
        let mut actions = StreamActions::default();
        let n = packet.sequence;
        let next = self.next_expected();

        let duplicate =
            self.ack_through.is_some_and(|a| n <= a) || self.received.contains_key(&n);
        if !duplicate {
            if n == next {
                if !packet.payload.is_empty() {
                    actions.delivered.push(packet.payload.clone());
                }
                self.ack_through = Some(n);
                // drain buffered contiguous successors
                while let Some(payload) = self.received.remove(&self.next_expected()) {
                    let seq = self.next_expected();
                    if !payload.is_empty() {
                        actions.delivered.push(payload);
                    }
                    self.ack_through = Some(seq);
                }
            } else if n > next {
                self.received.insert(n, packet.payload.clone());
                for gap in next..n {
                    if !self.received.contains_key(&gap) {
                        self.missing.insert(gap);
                    }
                }
            }
        }
        self.missing.remove(&n);

        let mut ack = self.base_packet();
        ack.ack_through = self.ack_through.map_or(n, |a| a.max(n));
        ack.nacks = self.missing.iter().copied().filter(|m| *m < n).collect();
        if packet.is_close() {
            // final ack of the close handshake carries CLOSE and a signature
            ack.flags.set(PacketFlags::CLOSE);
            match ack.sign_and_encode(&self.local) {
                Ok(_) => actions.send.push(ack),
                Err(e) => warn!(stream = self.id, error = %e, "failed to sign close ack"),
            }
            self.destroy(&mut actions, Ok(()));
        } else {
            actions.send.push(ack);
        }
        actions
    }

    /// Retransmit every due packet; destroy the stream when one has been
    /// in flight past the ceiling.
    pub fn due_resends(&mut self, now: Instant) -> StreamActions {
        let mut actions = StreamActions::default();
        if self.state == StreamState::Closed {
            return actions;
        }
        let expired = self
            .sent
            .values()
            .any(|sp| now.duration_since(sp.first_send) >= RESEND_CEILING);
        if expired {
            warn!(stream = self.id, "packet resend failed, destroying stream");
            self.destroy(&mut actions, Err(StreamError::ResendFailed));
            return actions;
        }
        for sp in self.sent.values_mut() {
            if now.duration_since(sp.last_send) >= RESEND_INTERVAL {
                sp.last_send = now;
                actions.send.push(sp.packet.clone());
            }
        }
        actions
    }

    fn destroy(&mut self, actions: &mut StreamActions, result: std::result::Result<(), StreamError>) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        self.sent.clear();
        self.received.clear();
        self.missing.clear();
        actions.events.push(StreamEvent::Closed(result));
    }

    fn check_done(&mut self, actions: &mut StreamActions) {
        if self.state == StreamState::Closing && self.close_sent && self.sent.is_empty() {
            self.destroy(actions, Ok(()));
        }
    }
}
