//! Stream routing for a session
//!
//! Incoming packets are matched against the open streams by receive
//! stream id, then by send stream id. A SYNC with send stream id 0 that
//! matches nothing creates a responding stream.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use eeplink_protocol::destination::LocalDestination;
use eeplink_protocol::packet::Packet;

use crate::stream::Stream;

/// Where an incoming packet was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Belongs to an existing stream.
    Existing(u32),
    /// A fresh responder stream was created for it.
    NewResponder(u32),
    /// Matched nothing; the packet was dropped.
    Dropped,
}

/// All open streams of one session, keyed by local stream id.
pub struct StreamMap {
    local: Arc<LocalDestination>,
    streams: HashMap<u32, Stream>,
}

impl StreamMap {
    pub fn new(local: Arc<LocalDestination>) -> Self {
        StreamMap {
            local,
            streams: HashMap::new(),
        }
    }

    pub fn local(&self) -> &Arc<LocalDestination> {
        &self.local
    }

    /// Open an initiating stream; returns its id.
    pub fn connect(
        &mut self,
        remote: eeplink_protocol::Destination,
        from_port: u16,
        to_port: u16,
    ) -> u32 {
        loop {
            let stream = Stream::connect(self.local.clone(), remote.clone(), from_port, to_port);
            let id = stream.id();
            if self.streams.contains_key(&id) {
                continue;
            }
            self.streams.insert(id, stream);
            return id;
        }
    }

    /// Decide which stream an incoming packet belongs to. `src_port` and
    /// `dst_port` come from the datagram framing and seed the ports of a
    /// newly accepted stream.
    pub fn route(&mut self, packet: &Packet, src_port: u16, dst_port: u16) -> Routed {
        if self.streams.contains_key(&packet.receive_stream_id) {
            return Routed::Existing(packet.receive_stream_id);
        }
        if self.streams.contains_key(&packet.send_stream_id) {
            return Routed::Existing(packet.send_stream_id);
        }
        if packet.is_sync() && packet.send_stream_id == 0 {
            loop {
                let stream = Stream::accept(self.local.clone(), dst_port, src_port);
                let id = stream.id();
                if self.streams.contains_key(&id) {
                    continue;
                }
                self.streams.insert(id, stream);
                return Routed::NewResponder(id);
            }
        }
        debug!(
            send_stream_id = packet.send_stream_id,
            receive_stream_id = packet.receive_stream_id,
            "packet matches no stream, dropping"
        );
        Routed::Dropped
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Stream> {
        self.streams.remove(&id)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.streams.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Drop streams that reached their terminal state.
    pub fn cleanup(&mut self) {
        self.streams.retain(|_, stream| !stream.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamState;
    use eeplink_crypto::SigType;
    use std::time::Instant;

    fn local() -> Arc<LocalDestination> {
        Arc::new(LocalDestination::generate(SigType::Ed25519))
    }

    #[test]
    fn syn_with_zero_send_id_creates_responder() {
        let alice = local();
        let bob = local();

        let mut alice_map = StreamMap::new(alice);
        let mut bob_map = StreamMap::new(bob.clone());

        let alice_id = alice_map.connect(bob.destination().clone(), 5, 13);
        let (_, actions) = alice_map
            .get_mut(alice_id)
            .unwrap()
            .write(b"data1", Instant::now())
            .unwrap();

        let routed = bob_map.route(&actions.send[0], 5, 13);
        let bob_id = match routed {
            Routed::NewResponder(id) => id,
            other => panic!("expected a new responder, got {other:?}"),
        };
        // accepted stream swaps the ports: its from-port is our side
        assert_eq!(bob_map.get(bob_id).unwrap().from_port(), 13);
        assert_eq!(bob_map.get(bob_id).unwrap().to_port(), 5);

        let bob_actions = bob_map
            .get_mut(bob_id)
            .unwrap()
            .handle_packet(&actions.send[0], Instant::now());
        assert_eq!(bob_actions.delivered, vec![b"data1".to_vec()]);
        assert_eq!(
            bob_map.get(bob_id).unwrap().state(),
            StreamState::Established
        );

        // the reply routes back to the existing responder stream
        let reply = &bob_actions.send[0];
        assert_eq!(
            bob_map.route(reply, 0, 0),
            Routed::Existing(bob_id),
            "receive stream id matches first"
        );
    }

    #[test]
    fn unmatched_non_syn_is_dropped() {
        let mut map = StreamMap::new(local());
        let packet = Packet {
            send_stream_id: 1234,
            receive_stream_id: 5678,
            sequence: 1,
            ..Default::default()
        };
        assert_eq!(map.route(&packet, 0, 0), Routed::Dropped);
        assert!(map.is_empty());
    }

    #[test]
    fn cleanup_drops_closed_streams() {
        let bob = local();
        let mut map = StreamMap::new(local());
        let id = map.connect(bob.destination().clone(), 0, 0);
        assert_eq!(map.len(), 1);
        let start = Instant::now();
        map.get_mut(id).unwrap().write(b"x", start).unwrap();
        map.get_mut(id)
            .unwrap()
            .due_resends(start + crate::stream::RESEND_CEILING);
        map.cleanup();
        assert!(map.is_empty());
    }
}
