//! I2CP router-control client
//!
//! A binary length-tagged protocol straight to the router: the client
//! builds its own leaseset and moves raw message payloads, so streams and
//! datagrams ride the in-crate streaming engine and datagram codecs
//! rather than the SAM bridge's.
//!
//! All protocol state lives in one actor task per session. It multiplexes
//! three sources: frames from the router socket, commands from the
//! application handles, and a one-second tick driving retransmissions and
//! lookup timeouts. Handles talk to the actor over channels only.

pub(crate) mod leaseset;
pub(crate) mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use eeplink_protocol::datagram::{
    self, DatagramInfo, PROTO_RAW_DATAGRAM, PROTO_REPLIABLE_DATAGRAM, PROTO_STREAMING,
};
use eeplink_protocol::destination::{Destination, LocalDestination};
use eeplink_protocol::encoding::b64_pad;
use eeplink_protocol::Packet;
use eeplink_streaming::{Routed, StreamActions, StreamError, StreamEvent, StreamMap};

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::events::{ReceivedDatagram, SubsessionStyle};
use crate::lookup::LookupCache;

use leaseset::{create_leaseset2, EncryptionKeys, Lease2};
use messages::{msg_type, session_status, DeliveryOutcome};

/// Largest frame accepted from the router.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A destination string longer than this is a literal Base64 destination.
const MAX_HOSTNAME_LEN: usize = 387;

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cpEvent {
    /// The router accepted CreateSession; the session is usable.
    SessionCreated { session_id: u16 },
    /// The connection is gone or the router refused the session.
    Disconnected { reason: String },
}

enum SubsessionSink {
    Stream(mpsc::Sender<I2cpStream>),
    Datagram(mpsc::Sender<ReceivedDatagram>),
    Raw(mpsc::Sender<Vec<u8>>),
}

struct SubsessionReg {
    style: SubsessionStyle,
    listen_port: u16,
    sink: SubsessionSink,
}

enum Command {
    CreateStream {
        destination: Destination,
        from_port: u16,
        to_port: u16,
        reply: oneshot::Sender<Result<I2cpStream>>,
    },
    StreamWrite {
        id: u32,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    StreamClose {
        id: u32,
    },
    SendRepliable {
        destination: Destination,
        from_port: u16,
        to_port: u16,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendRaw {
        destination: Destination,
        from_port: u16,
        to_port: u16,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Lookup {
        name: String,
        reply: oneshot::Sender<Result<Destination>>,
    },
    Register(SubsessionReg),
    Close,
}

/// A reliable stream carried over I2CP datagrams. Writes resolve once the
/// remote has acked the packet; reads yield payload chunks in order.
pub struct I2cpStream {
    id: u32,
    remote: Option<Destination>,
    cmd: mpsc::Sender<Command>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl I2cpStream {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn remote(&self) -> Option<&Destination> {
        self.remote.as_ref()
    }

    /// Queue `data` on the stream; resolves when the remote acks it.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd
            .send(Command::StreamWrite {
                id: self.id,
                data: data.to_vec(),
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// The next in-order payload chunk; `None` once the stream is done.
    pub async fn read(&self) -> Option<Vec<u8>> {
        self.incoming.lock().await.recv().await
    }

    pub async fn close(&self) -> Result<()> {
        self.cmd
            .send(Command::StreamClose { id: self.id })
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

impl std::fmt::Debug for I2cpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cpStream")
            .field("id", &self.id)
            .field("remote", &self.remote.as_ref().map(|d| d.short_name()))
            .finish()
    }
}

/// A STREAM subsession over I2CP: dial out or accept inbound streams.
pub struct I2cpStreamSubsession {
    cmd: mpsc::Sender<Command>,
    listen_port: u16,
    incoming: Mutex<mpsc::Receiver<I2cpStream>>,
}

impl I2cpStreamSubsession {
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub async fn create_stream(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
    ) -> Result<I2cpStream> {
        let (tx, rx) = oneshot::channel();
        self.cmd
            .send(Command::CreateStream {
                destination: destination.clone(),
                from_port,
                to_port,
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// The next accepted inbound stream.
    pub async fn accept(&self) -> Option<I2cpStream> {
        self.incoming.lock().await.recv().await
    }
}

/// A repliable DATAGRAM subsession over I2CP.
pub struct I2cpDatagramSubsession {
    cmd: mpsc::Sender<Command>,
    listen_port: u16,
    incoming: Mutex<mpsc::Receiver<ReceivedDatagram>>,
}

impl I2cpDatagramSubsession {
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Send a signed repliable datagram. Resolves once the router reports
    /// a message status for it.
    pub async fn send_repliable(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
        payload: &[u8],
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd
            .send(Command::SendRepliable {
                destination: destination.clone(),
                from_port,
                to_port,
                payload: payload.to_vec(),
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    pub async fn recv(&self) -> Option<ReceivedDatagram> {
        self.incoming.lock().await.recv().await
    }
}

/// A RAW subsession over I2CP: unsigned, payload-only, unfiltered.
pub struct I2cpRawSubsession {
    cmd: mpsc::Sender<Command>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl I2cpRawSubsession {
    pub async fn send_raw(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
        payload: &[u8],
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd
            .send(Command::SendRaw {
                destination: destination.clone(),
                from_port,
                to_port,
                payload: payload.to_vec(),
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.incoming.lock().await.recv().await
    }
}

/// A session on the router's I2CP port.
pub struct I2cpSession {
    cmd: mpsc::Sender<Command>,
    events: Mutex<mpsc::Receiver<I2cpEvent>>,
    local: Arc<LocalDestination>,
    stream_subs: Mutex<HashMap<String, Arc<I2cpStreamSubsession>>>,
    datagram_subs: Mutex<HashMap<String, Arc<I2cpDatagramSubsession>>>,
    raw_subs: Mutex<HashMap<String, Arc<I2cpRawSubsession>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl I2cpSession {
    /// Dial the router and start the session handshake. Await
    /// [`I2cpSession::wait_ready`] (or watch [`I2cpSession::next_event`])
    /// before sending.
    pub async fn connect(config: SessionConfig, local: LocalDestination) -> Result<I2cpSession> {
        let stream = TcpStream::connect(config.i2cp_addr()).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(&[messages::PROTOCOL_BYTE]).await?;
        write_half
            .write_all(&messages::frame(msg_type::GET_DATE, &messages::get_date()?))
            .await?;
        write_half.flush().await?;

        let local = Arc::new(local);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (msg_tx, msg_rx) = mpsc::channel(64);

        let reader_task = tokio::spawn(read_loop(read_half, msg_tx));
        let actor = Actor {
            local: local.clone(),
            writer: write_half,
            cmd_tx: cmd_tx.clone(),
            events: event_tx,
            session_id: None,
            create_session_sent: false,
            streams: StreamMap::new(local.clone()),
            stream_sinks: HashMap::new(),
            write_waiters: HashMap::new(),
            send_waiters: HashMap::new(),
            lookups: HashMap::new(),
            lookup_cache: LookupCache::new(),
            subsessions: Vec::new(),
            enc_keys: EncryptionKeys::generate(),
            next_nonce: 1,
            next_request_id: 0,
            lookup_timeout: Duration::from_secs(config.lookup_timeout_secs),
        };
        let actor_task = tokio::spawn(actor.run(msg_rx, cmd_rx));

        Ok(I2cpSession {
            cmd: cmd_tx,
            events: Mutex::new(event_rx),
            local,
            stream_subs: Mutex::new(HashMap::new()),
            datagram_subs: Mutex::new(HashMap::new()),
            raw_subs: Mutex::new(HashMap::new()),
            tasks: vec![reader_task, actor_task],
        })
    }

    pub fn local_destination(&self) -> &LocalDestination {
        &self.local
    }

    /// The next lifecycle event.
    pub async fn next_event(&self) -> Option<I2cpEvent> {
        self.events.lock().await.recv().await
    }

    /// Wait for the router to confirm the session.
    pub async fn wait_ready(&self) -> Result<u16> {
        loop {
            match self.next_event().await {
                Some(I2cpEvent::SessionCreated { session_id }) => return Ok(session_id),
                Some(I2cpEvent::Disconnected { reason }) => {
                    return Err(ClientError::SessionRejected(reason))
                }
                None => return Err(ClientError::SessionClosed),
            }
        }
    }

    /// Get or create the STREAM subsession named `app_name`. Idempotent.
    pub async fn stream_subsession(
        &self,
        app_name: &str,
        listen_port: u16,
    ) -> Result<Arc<I2cpStreamSubsession>> {
        let mut subs = self.stream_subs.lock().await;
        if let Some(existing) = subs.get(app_name) {
            return Ok(existing.clone());
        }
        let (tx, rx) = mpsc::channel(16);
        self.register(SubsessionStyle::Stream, listen_port, SubsessionSink::Stream(tx))
            .await?;
        let sub = Arc::new(I2cpStreamSubsession {
            cmd: self.cmd.clone(),
            listen_port,
            incoming: Mutex::new(rx),
        });
        subs.insert(app_name.to_string(), sub.clone());
        Ok(sub)
    }

    /// Get or create the repliable DATAGRAM subsession named `app_name`.
    pub async fn datagram_subsession(
        &self,
        app_name: &str,
        listen_port: u16,
    ) -> Result<Arc<I2cpDatagramSubsession>> {
        let mut subs = self.datagram_subs.lock().await;
        if let Some(existing) = subs.get(app_name) {
            return Ok(existing.clone());
        }
        let (tx, rx) = mpsc::channel(64);
        self.register(
            SubsessionStyle::Datagram,
            listen_port,
            SubsessionSink::Datagram(tx),
        )
        .await?;
        let sub = Arc::new(I2cpDatagramSubsession {
            cmd: self.cmd.clone(),
            listen_port,
            incoming: Mutex::new(rx),
        });
        subs.insert(app_name.to_string(), sub.clone());
        Ok(sub)
    }

    /// Get or create the RAW subsession named `app_name`.
    pub async fn raw_subsession(
        &self,
        app_name: &str,
        listen_port: u16,
    ) -> Result<Arc<I2cpRawSubsession>> {
        let mut subs = self.raw_subs.lock().await;
        if let Some(existing) = subs.get(app_name) {
            return Ok(existing.clone());
        }
        let (tx, rx) = mpsc::channel(64);
        self.register(SubsessionStyle::Raw, listen_port, SubsessionSink::Raw(tx))
            .await?;
        let sub = Arc::new(I2cpRawSubsession {
            cmd: self.cmd.clone(),
            incoming: Mutex::new(rx),
        });
        subs.insert(app_name.to_string(), sub.clone());
        Ok(sub)
    }

    async fn register(
        &self,
        style: SubsessionStyle,
        listen_port: u16,
        sink: SubsessionSink,
    ) -> Result<()> {
        self.cmd
            .send(Command::Register(SubsessionReg {
                style,
                listen_port,
                sink,
            }))
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    /// Resolve a host name through the router, consulting the session
    /// cache first. Inputs longer than 387 characters are literal Base64
    /// destinations and are parsed directly.
    pub async fn name_lookup(&self, name: &str) -> Result<Destination> {
        if name.len() > MAX_HOSTNAME_LEN {
            return Ok(Destination::from_base64(&b64_pad(name))?);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd
            .send(Command::Lookup {
                name: name.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Tear the session down.
    pub async fn close(&self) {
        let _ = self.cmd.send(Command::Close).await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<(u8, Vec<u8>)> {
    let mut head = [0u8; 5];
    reader.read_exact(&mut head).await?;
    let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit"),
        ));
    }
    let msg_type = head[4];
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((msg_type, payload))
}

async fn read_loop(mut reader: OwnedReadHalf, tx: mpsc::Sender<(u8, Vec<u8>)>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "router connection closed");
                break;
            }
        }
    }
}

struct PendingLookup {
    name: String,
    reply: oneshot::Sender<Result<Destination>>,
    deadline: Instant,
}

struct Actor {
    local: Arc<LocalDestination>,
    writer: OwnedWriteHalf,
    cmd_tx: mpsc::Sender<Command>,
    events: mpsc::Sender<I2cpEvent>,
    session_id: Option<u16>,
    create_session_sent: bool,
    streams: StreamMap,
    stream_sinks: HashMap<u32, mpsc::Sender<Vec<u8>>>,
    write_waiters: HashMap<(u32, u32), oneshot::Sender<Result<()>>>,
    send_waiters: HashMap<u32, oneshot::Sender<Result<()>>>,
    lookups: HashMap<u32, PendingLookup>,
    lookup_cache: LookupCache,
    subsessions: Vec<SubsessionReg>,
    enc_keys: EncryptionKeys,
    next_nonce: u32,
    next_request_id: u16,
    lookup_timeout: Duration,
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn unix_secs() -> u32 {
    (unix_ms() / 1000) as u32
}

impl Actor {
    async fn run(
        mut self,
        mut msg_rx: mpsc::Receiver<(u8, Vec<u8>)>,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = msg_rx.recv() => match msg {
                    Some((msg_type, payload)) => match self.on_message(msg_type, payload).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!(error = %e, "session failed");
                            let _ = self
                                .events
                                .send(I2cpEvent::Disconnected { reason: e.to_string() })
                                .await;
                            break;
                        }
                    },
                    None => {
                        let _ = self
                            .events
                            .send(I2cpEvent::Disconnected {
                                reason: "connection closed".to_string(),
                            })
                            .await;
                        break;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close) | None => break,
                    Some(cmd) => self.on_command(cmd).await,
                },
                _ = tick.tick() => self.on_tick().await,
            }
        }
    }

    async fn send_frame(&mut self, msg_type: u8, payload: &[u8]) -> Result<()> {
        self.writer
            .write_all(&messages::frame(msg_type, payload))
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Returns `Ok(false)` when the session should shut down cleanly.
    async fn on_message(&mut self, msg_type: u8, payload: Vec<u8>) -> Result<bool> {
        match msg_type {
            msg_type::SET_DATE => {
                // the date itself is only a wake signal
                if !self.create_session_sent {
                    self.create_session_sent = true;
                    let config = messages::create_session(&self.local, unix_ms())?;
                    self.send_frame(msg_type::CREATE_SESSION, &config).await?;
                }
            }
            msg_type::SESSION_STATUS => {
                let status = messages::parse_session_status(&payload)?;
                match status.status {
                    session_status::CREATED => {
                        info!(session_id = status.session_id, "I2CP session created");
                        self.session_id = Some(status.session_id);
                        let _ = self
                            .events
                            .send(I2cpEvent::SessionCreated {
                                session_id: status.session_id,
                            })
                            .await;
                    }
                    session_status::UPDATED => {
                        debug!(session_id = status.session_id, "session updated")
                    }
                    other => {
                        let reason = match other {
                            session_status::DESTROYED => "session destroyed",
                            session_status::INVALID => "session invalid",
                            session_status::REFUSED => "session refused",
                            _ => "unknown session status",
                        };
                        let _ = self
                            .events
                            .send(I2cpEvent::Disconnected {
                                reason: reason.to_string(),
                            })
                            .await;
                        return Ok(false);
                    }
                }
            }
            msg_type::REQUEST_VARIABLE_LEASESET => {
                let (session_id, leases) = messages::parse_request_variable_leaseset(&payload)?;
                let lease2s: Vec<Lease2> = leases.iter().map(Lease2::from_lease).collect();
                debug!(count = lease2s.len(), "publishing leaseset");
                let payload = create_leaseset2(
                    session_id,
                    &self.local,
                    &lease2s,
                    &self.enc_keys,
                    unix_secs(),
                )?;
                self.send_frame(msg_type::CREATE_LEASESET2, &payload).await?;
            }
            msg_type::MESSAGE_PAYLOAD => {
                let msg = messages::parse_message_payload(&payload)?;
                self.on_payload(msg.payload).await;
            }
            msg_type::MESSAGE_STATUS => {
                let status = messages::parse_message_status(&payload)?;
                let outcome = messages::classify_message_status(status.status);
                match self.send_waiters.remove(&status.nonce) {
                    Some(waiter) => {
                        let result = match outcome {
                            DeliveryOutcome::Failed => Err(ClientError::MessageFailed {
                                status: status.status,
                            }),
                            _ => Ok(()),
                        };
                        let _ = waiter.send(result);
                    }
                    None => {
                        if outcome == DeliveryOutcome::Failed {
                            warn!(
                                status = status.status,
                                nonce = status.nonce,
                                "message delivery failed"
                            );
                        }
                    }
                }
            }
            msg_type::HOST_REPLY => {
                let reply = messages::parse_host_reply(&payload)?;
                if let Some(pending) = self.lookups.remove(&reply.request_id) {
                    match reply.destination {
                        Some(destination) if reply.result == 0 => {
                            self.lookup_cache
                                .insert(pending.name, destination.clone());
                            let _ = pending.reply.send(Ok(destination));
                        }
                        _ => {
                            let _ = pending.reply.send(Err(ClientError::LookupFailed(format!(
                                "router result code {}",
                                reply.result
                            ))));
                        }
                    }
                }
            }
            msg_type::DISCONNECT => {
                let reason = parse_disconnect_reason(&payload);
                warn!(reason = %reason, "router disconnected us");
                let _ = self.events.send(I2cpEvent::Disconnected { reason }).await;
                return Ok(false);
            }
            other => {
                // forward compatibility: newer routers may talk more
                debug!(msg_type = other, "skipping unknown message type");
            }
        }
        Ok(true)
    }

    /// Demultiplex one gzip-framed payload from the router.
    async fn on_payload(&mut self, frame: Vec<u8>) {
        let (info, raw) = match datagram::decompress(&frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "dropping undecodable payload");
                return;
            }
        };
        match info.protocol {
            PROTO_STREAMING => {
                let packet = match Packet::decode(&raw) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable stream packet");
                        return;
                    }
                };
                match self.streams.route(&packet, info.src_port, info.dst_port) {
                    Routed::Existing(id) => {
                        let actions = match self.streams.get_mut(id) {
                            Some(stream) => stream.handle_packet(&packet, Instant::now()),
                            None => return,
                        };
                        self.apply_stream_actions(id, actions).await;
                    }
                    Routed::NewResponder(id) => {
                        let actions = match self.streams.get_mut(id) {
                            Some(stream) => stream.handle_packet(&packet, Instant::now()),
                            None => return,
                        };
                        let (tx, rx) = mpsc::channel(64);
                        self.stream_sinks.insert(id, tx);
                        let remote = self.streams.get(id).and_then(|s| s.remote().cloned());
                        let handle = I2cpStream {
                            id,
                            remote,
                            cmd: self.cmd_tx.clone(),
                            incoming: Mutex::new(rx),
                        };
                        self.deliver_stream(handle, info.dst_port).await;
                        self.apply_stream_actions(id, actions).await;
                    }
                    Routed::Dropped => {}
                }
            }
            PROTO_REPLIABLE_DATAGRAM => match datagram::open_repliable(&raw) {
                Ok((source, payload)) => {
                    let event = ReceivedDatagram {
                        source,
                        from_port: info.src_port,
                        to_port: info.dst_port,
                        payload,
                    };
                    self.deliver_datagram(event).await;
                }
                Err(e) => warn!(error = %e, "dropping repliable datagram"),
            },
            PROTO_RAW_DATAGRAM => self.deliver_raw(raw).await,
            other => debug!(protocol = other, "skipping unknown payload protocol"),
        }
    }

    /// Hand an accepted stream to the subsession listening on its port,
    /// falling back to a wildcard (port 0) subsession.
    async fn deliver_stream(&mut self, handle: I2cpStream, dst_port: u16) {
        let mut fallback = None;
        for sub in &self.subsessions {
            if sub.style != SubsessionStyle::Stream {
                continue;
            }
            if let SubsessionSink::Stream(tx) = &sub.sink {
                if sub.listen_port == dst_port {
                    let _ = tx.send(handle).await;
                    return;
                }
                if sub.listen_port == 0 && fallback.is_none() {
                    fallback = Some(tx.clone());
                }
            }
        }
        match fallback {
            Some(tx) => {
                let _ = tx.send(handle).await;
            }
            None => warn!(dst_port, "no stream subsession for accepted stream"),
        }
    }

    async fn deliver_datagram(&mut self, event: ReceivedDatagram) {
        for sub in &self.subsessions {
            if sub.style != SubsessionStyle::Datagram {
                continue;
            }
            if sub.listen_port != 0 && event.to_port != sub.listen_port {
                debug!(
                    to_port = event.to_port,
                    listen_port = sub.listen_port,
                    "dropping datagram for another port"
                );
                continue;
            }
            if let SubsessionSink::Datagram(tx) = &sub.sink {
                let _ = tx.send(event.clone()).await;
            }
        }
    }

    /// Raw datagrams carry no sender and are not filtered by port.
    async fn deliver_raw(&mut self, payload: Vec<u8>) {
        for sub in &self.subsessions {
            if sub.style != SubsessionStyle::Raw {
                continue;
            }
            if let SubsessionSink::Raw(tx) = &sub.sink {
                let _ = tx.send(payload.clone()).await;
            }
        }
    }

    async fn apply_stream_actions(&mut self, id: u32, actions: StreamActions) {
        for packet in actions.send {
            self.send_stream_packet(id, packet).await;
        }
        if !actions.delivered.is_empty() {
            if let Some(sink) = self.stream_sinks.get(&id) {
                let sink = sink.clone();
                for payload in actions.delivered {
                    let _ = sink.send(payload).await;
                }
            }
        }
        for seq in actions.retired {
            if let Some(waiter) = self.write_waiters.remove(&(id, seq)) {
                let _ = waiter.send(Ok(()));
            }
        }
        for event in actions.events {
            match event {
                StreamEvent::Established => debug!(stream = id, "stream established"),
                StreamEvent::RemoteClosed => debug!(stream = id, "remote closed stream"),
                StreamEvent::Closed(result) => {
                    let error = match result {
                        Ok(()) => StreamError::Closed,
                        Err(e) => e,
                    };
                    let stale: Vec<(u32, u32)> = self
                        .write_waiters
                        .keys()
                        .filter(|(stream_id, _)| *stream_id == id)
                        .copied()
                        .collect();
                    for key in stale {
                        if let Some(waiter) = self.write_waiters.remove(&key) {
                            let _ = waiter.send(Err(error.clone().into()));
                        }
                    }
                    self.stream_sinks.remove(&id);
                    self.streams.remove(id);
                }
            }
        }
    }

    async fn send_stream_packet(&mut self, id: u32, packet: Packet) {
        let (remote, from_port, to_port) = match self.streams.get(id) {
            Some(stream) => match stream.remote() {
                Some(remote) => (remote.clone(), stream.from_port(), stream.to_port()),
                None => {
                    warn!(stream = id, "stream has no remote destination yet");
                    return;
                }
            },
            None => return,
        };
        let bytes = match packet.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode stream packet");
                return;
            }
        };
        let frame = match datagram::compress(
            &bytes,
            DatagramInfo {
                src_port: from_port,
                dst_port: to_port,
                protocol: PROTO_STREAMING,
            },
        ) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to frame stream packet");
                return;
            }
        };
        // stream packets rely on the engine's own acks; message status
        // failures only get logged
        self.send_message(&remote, frame, None).await;
    }

    /// Send one gzip frame to `destination`, optionally tracking the
    /// router's MessageStatus for it.
    async fn send_message(
        &mut self,
        destination: &Destination,
        frame: Vec<u8>,
        waiter: Option<oneshot::Sender<Result<()>>>,
    ) {
        let session_id = match self.session_id {
            Some(session_id) => session_id,
            None => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(ClientError::NotReady));
                }
                return;
            }
        };
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);
        if self.next_nonce == 0 {
            self.next_nonce = 1;
        }
        let payload = messages::send_message(session_id, destination, &frame, nonce);
        match self.send_frame(msg_type::SEND_MESSAGE, &payload).await {
            Ok(()) => {
                if let Some(waiter) = waiter {
                    self.send_waiters.insert(nonce, waiter);
                }
            }
            Err(e) => match waiter {
                Some(waiter) => {
                    let _ = waiter.send(Err(e));
                }
                None => warn!(error = %e, "failed to send message"),
            },
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateStream {
                destination,
                from_port,
                to_port,
                reply,
            } => {
                if self.session_id.is_none() {
                    let _ = reply.send(Err(ClientError::NotReady));
                    return;
                }
                let id = self.streams.connect(destination.clone(), from_port, to_port);
                let (tx, rx) = mpsc::channel(64);
                self.stream_sinks.insert(id, tx);
                let _ = reply.send(Ok(I2cpStream {
                    id,
                    remote: Some(destination),
                    cmd: self.cmd_tx.clone(),
                    incoming: Mutex::new(rx),
                }));
            }
            Command::StreamWrite { id, data, reply } => match self.streams.get_mut(id) {
                Some(stream) => match stream.write(&data, Instant::now()) {
                    Ok((seq, actions)) => {
                        self.write_waiters.insert((id, seq), reply);
                        self.apply_stream_actions(id, actions).await;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                },
                None => {
                    let _ = reply.send(Err(StreamError::Closed.into()));
                }
            },
            Command::StreamClose { id } => {
                if let Some(stream) = self.streams.get_mut(id) {
                    match stream.close(Instant::now()) {
                        Ok(actions) => self.apply_stream_actions(id, actions).await,
                        Err(e) => warn!(stream = id, error = %e, "close failed"),
                    }
                }
            }
            Command::SendRepliable {
                destination,
                from_port,
                to_port,
                payload,
                reply,
            } => {
                let sealed = match datagram::seal_repliable(&self.local, &payload) {
                    Ok(sealed) => sealed,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return;
                    }
                };
                let frame = match datagram::compress(
                    &sealed,
                    DatagramInfo {
                        src_port: from_port,
                        dst_port: to_port,
                        protocol: PROTO_REPLIABLE_DATAGRAM,
                    },
                ) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return;
                    }
                };
                self.send_message(&destination, frame, Some(reply)).await;
            }
            Command::SendRaw {
                destination,
                from_port,
                to_port,
                payload,
                reply,
            } => {
                let frame = match datagram::compress(
                    &payload,
                    DatagramInfo {
                        src_port: from_port,
                        dst_port: to_port,
                        protocol: PROTO_RAW_DATAGRAM,
                    },
                ) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return;
                    }
                };
                self.send_message(&destination, frame, Some(reply)).await;
            }
            Command::Lookup { name, reply } => {
                if let Some(hit) = self.lookup_cache.get(&name) {
                    let _ = reply.send(Ok(hit.clone()));
                    return;
                }
                let session_id = match self.session_id {
                    Some(session_id) => session_id,
                    None => {
                        let _ = reply.send(Err(ClientError::NotReady));
                        return;
                    }
                };
                let request_id = self.next_request_id as u32;
                self.next_request_id = self.next_request_id.wrapping_add(1);
                let payload = match messages::host_lookup(
                    session_id,
                    request_id,
                    self.lookup_timeout.as_millis() as u32,
                    &name,
                ) {
                    Ok(payload) => payload,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return;
                    }
                };
                match self.send_frame(msg_type::HOST_LOOKUP, &payload).await {
                    Ok(()) => {
                        self.lookups.insert(
                            request_id,
                            PendingLookup {
                                name,
                                reply,
                                deadline: Instant::now() + self.lookup_timeout,
                            },
                        );
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Register(reg) => self.subsessions.push(reg),
            Command::Close => {}
        }
    }

    /// The once-a-second housekeeping pass: stream retransmissions (and
    /// their 300 s ceiling) and lookup timeouts.
    async fn on_tick(&mut self) {
        let now = Instant::now();
        for id in self.streams.ids() {
            let actions = match self.streams.get_mut(id) {
                Some(stream) => stream.due_resends(now),
                None => continue,
            };
            self.apply_stream_actions(id, actions).await;
        }

        let expired: Vec<u32> = self
            .lookups
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in expired {
            if let Some(pending) = self.lookups.remove(&request_id) {
                let _ = pending.reply.send(Err(ClientError::LookupTimeout));
            }
        }
    }
}

fn parse_disconnect_reason(payload: &[u8]) -> String {
    if payload.is_empty() {
        return "router disconnect".to_string();
    }
    let len = payload[0] as usize;
    if payload.len() < 1 + len {
        return "router disconnect".to_string();
    }
    String::from_utf8_lossy(&payload[1..1 + len]).to_string()
}
