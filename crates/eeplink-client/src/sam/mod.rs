//! SAM session-bridge client
//!
//! A text-line protocol over TCP (control, stream connect/accept) and UDP
//! (datagrams). One PRIMARY session owns the destination; named
//! subsessions carry the three communication styles. Every stream
//! connect/accept runs on its own TCP socket which turns into a raw byte
//! stream after the preamble.

pub mod parser;
mod subsession;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use eeplink_protocol::destination::{Destination, LocalDestination};
use eeplink_protocol::encoding::b64_pad;

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::lookup::LookupCache;
use crate::shutdown::ShutdownCoordinator;

use parser::{parse_message, ReplyKind, SamReply};
pub use subsession::{
    SamDatagramSubsession, SamRawSubsession, SamStream, SamStreamSubsession,
};
use subsession::{accept_loop, datagram_recv_loop, DatagramSink};

const SAM_VERSION_MIN: &str = "3.0";
const SAM_VERSION_MAX: &str = "3.3";

/// A destination string longer than this is already a literal Base64
/// destination, not a host name.
const MAX_HOSTNAME_LEN: usize = 387;

/// The shared control socket: one background reader answering PINGs and
/// matching replies to queued commands, one writer handle that the
/// shutdown coordinator can also reach.
pub(crate) struct SamControl {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    pending: Arc<Mutex<VecDeque<oneshot::Sender<SamReply>>>>,
    reader_task: JoinHandle<()>,
}

impl SamControl {
    pub(crate) async fn open(config: &SessionConfig) -> Result<Self> {
        let stream = TcpStream::connect(config.sam_tcp_addr()).await?;
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let pending: Arc<Mutex<VecDeque<oneshot::Sender<SamReply>>>> =
            Arc::new(Mutex::new(VecDeque::new()));

        let reader_task = tokio::spawn(Self::read_loop(
            read_half,
            writer.clone(),
            pending.clone(),
        ));

        Ok(SamControl {
            writer,
            pending,
            reader_task,
        })
    }

    async fn read_loop(
        read_half: OwnedReadHalf,
        writer: Arc<Mutex<OwnedWriteHalf>>,
        pending: Arc<Mutex<VecDeque<oneshot::Sender<SamReply>>>>,
    ) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let reply = parse_message(&line);
                    match reply.kind {
                        ReplyKind::Ping => {
                            let pong = if reply.remainder.is_empty() {
                                "PONG\n".to_string()
                            } else {
                                format!("PONG {}\n", reply.remainder)
                            };
                            let mut writer = writer.lock().await;
                            if writer.write_all(pong.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        ReplyKind::Pong => {}
                        _ => {
                            let waiter = pending.lock().await.pop_front();
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(reply);
                                }
                                None => {
                                    debug!(verb = %reply.verb, "unsolicited reply from router")
                                }
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "control socket read failed");
                    break;
                }
            }
        }
        // dropping the queued senders wakes every waiter with an error
        pending.lock().await.clear();
    }

    /// Send one command line and await its reply.
    pub(crate) async fn command(&self, line: String) -> Result<SamReply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            pending.push_back(tx);
        }
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub(crate) fn writer(&self) -> &Arc<Mutex<OwnedWriteHalf>> {
        &self.writer
    }
}

impl Drop for SamControl {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Perform the HELLO handshake on a socket.
async fn hello(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    writer
        .write_all(
            format!("HELLO VERSION MIN={SAM_VERSION_MIN} MAX={SAM_VERSION_MAX}\n").as_bytes(),
        )
        .await?;
    let reply = read_reply(reader).await?;
    if reply.kind != ReplyKind::HelloReply || !reply.result_ok() {
        return Err(ClientError::Handshake(reply.reason()));
    }
    Ok(())
}

/// Read and parse one reply line.
pub(crate) async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> Result<SamReply> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(ClientError::SessionClosed);
    }
    Ok(parse_message(&line))
}

/// Open a fresh TCP socket to the bridge and complete HELLO on it.
pub(crate) async fn open_data_socket(
    config: &SessionConfig,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(config.sam_tcp_addr()).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    hello(&mut reader, &mut writer).await?;
    Ok((reader, writer))
}

/// A PRIMARY session on the SAM bridge.
pub struct SamSession {
    config: SessionConfig,
    session_id: String,
    local: Arc<LocalDestination>,
    control: SamControl,
    stream_subs: Mutex<HashMap<String, Arc<SamStreamSubsession>>>,
    datagram_subs: Mutex<HashMap<String, Arc<SamDatagramSubsession>>>,
    raw_subs: Mutex<HashMap<String, Arc<SamRawSubsession>>>,
    lookups: Mutex<LookupCache>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SamSession {
    /// Connect to the bridge, perform the HELLO handshake and create the
    /// PRIMARY session for `local`. Returns once the router has confirmed
    /// the session.
    pub async fn connect(config: SessionConfig, local: LocalDestination) -> Result<SamSession> {
        let control = SamControl::open(&config).await?;

        let reply = control
            .command(format!(
                "HELLO VERSION MIN={SAM_VERSION_MIN} MAX={SAM_VERSION_MAX}\n"
            ))
            .await?;
        if reply.kind != ReplyKind::HelloReply || !reply.result_ok() {
            return Err(ClientError::Handshake(reply.reason()));
        }

        let session_id = format!("eeplink-{:08x}", rand::thread_rng().gen::<u32>());
        let reply = control
            .command(format!(
                "SESSION CREATE STYLE=PRIMARY ID={} DESTINATION={} i2cp.leaseSetEncType=4,0\n",
                session_id,
                local.private_blob_base64()
            ))
            .await?;
        if reply.kind != ReplyKind::SessionStatus || !reply.result_ok() {
            return Err(ClientError::SessionRejected(reply.reason()));
        }

        info!(session_id = %session_id, "SAM session created");
        Ok(SamSession {
            config,
            session_id,
            local: Arc::new(local),
            control,
            stream_subs: Mutex::new(HashMap::new()),
            datagram_subs: Mutex::new(HashMap::new()),
            raw_subs: Mutex::new(HashMap::new()),
            lookups: Mutex::new(LookupCache::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local_destination(&self) -> &LocalDestination {
        &self.local
    }

    /// Register this session's control socket with a shutdown
    /// coordinator; on `shutdown_all` it receives a final `QUIT`.
    pub async fn attach_shutdown(&self, coordinator: &ShutdownCoordinator) {
        coordinator
            .register(Arc::downgrade(self.control.writer()))
            .await;
    }

    async fn add_subsession(&self, style: &str, sub_id: &str, options: &str) -> Result<()> {
        let mut line = format!("SESSION ADD STYLE={style} ID={sub_id}");
        if !options.is_empty() {
            line.push(' ');
            line.push_str(options);
        }
        line.push('\n');
        let reply = self.control.command(line).await?;
        if reply.kind != ReplyKind::SessionStatus || !reply.result_ok() {
            return Err(ClientError::SubsessionRejected(reply.reason()));
        }
        Ok(())
    }

    /// Get or create the STREAM subsession named `app_name`. Idempotent:
    /// a second call with the same name returns the existing subsession.
    pub async fn stream_subsession(
        &self,
        app_name: &str,
        listen_port: u16,
    ) -> Result<Arc<SamStreamSubsession>> {
        let mut subs = self.stream_subs.lock().await;
        if let Some(existing) = subs.get(app_name) {
            return Ok(existing.clone());
        }
        let sub_id = format!("{}-{}", self.session_id, app_name);
        let options = if listen_port != 0 {
            format!("LISTEN_PORT={listen_port}")
        } else {
            String::new()
        };
        self.add_subsession("STREAM", &sub_id, &options).await?;

        let (tx, rx) = mpsc::channel(16);
        let sub = Arc::new(SamStreamSubsession::new(
            self.config.clone(),
            sub_id.clone(),
            listen_port,
            rx,
        ));
        let task = tokio::spawn(accept_loop(self.config.clone(), sub_id, listen_port, tx));
        self.tasks.lock().await.push(task);
        subs.insert(app_name.to_string(), sub.clone());
        Ok(sub)
    }

    /// Get or create the repliable DATAGRAM subsession named `app_name`,
    /// receiving on I2P port `listen_port`.
    pub async fn datagram_subsession(
        &self,
        app_name: &str,
        listen_port: u16,
    ) -> Result<Arc<SamDatagramSubsession>> {
        let mut subs = self.datagram_subs.lock().await;
        if let Some(existing) = subs.get(app_name) {
            return Ok(existing.clone());
        }
        let (socket, sub_id) = self.bind_udp(app_name).await?;
        let options = if listen_port != 0 {
            format!(
                "PORT={} LISTEN_PORT={listen_port}",
                socket.local_addr()?.port()
            )
        } else {
            format!("PORT={}", socket.local_addr()?.port())
        };
        self.add_subsession("DATAGRAM", &sub_id, &options).await?;

        let (tx, rx) = mpsc::channel(64);
        let sub = Arc::new(SamDatagramSubsession::new(
            self.config.clone(),
            sub_id,
            listen_port,
            socket.clone(),
            rx,
        ));
        let task = tokio::spawn(datagram_recv_loop(
            socket,
            listen_port,
            DatagramSink::Repliable(tx),
        ));
        self.tasks.lock().await.push(task);
        subs.insert(app_name.to_string(), sub.clone());
        Ok(sub)
    }

    /// Get or create the RAW subsession named `app_name`. Raw datagrams
    /// are not filtered by port.
    pub async fn raw_subsession(
        &self,
        app_name: &str,
        listen_port: u16,
    ) -> Result<Arc<SamRawSubsession>> {
        let mut subs = self.raw_subs.lock().await;
        if let Some(existing) = subs.get(app_name) {
            return Ok(existing.clone());
        }
        let (socket, sub_id) = self.bind_udp(app_name).await?;
        let options = if listen_port != 0 {
            format!(
                "PORT={} LISTEN_PORT={listen_port}",
                socket.local_addr()?.port()
            )
        } else {
            format!("PORT={}", socket.local_addr()?.port())
        };
        self.add_subsession("RAW", &sub_id, &options).await?;

        let (tx, rx) = mpsc::channel(64);
        let sub = Arc::new(SamRawSubsession::new(
            self.config.clone(),
            sub_id,
            socket.clone(),
            rx,
        ));
        let task = tokio::spawn(datagram_recv_loop(socket, listen_port, DatagramSink::Raw(tx)));
        self.tasks.lock().await.push(task);
        subs.insert(app_name.to_string(), sub.clone());
        Ok(sub)
    }

    async fn bind_udp(&self, app_name: &str) -> Result<(Arc<UdpSocket>, String)> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let sub_id = format!("{}-{}", self.session_id, app_name);
        Ok((Arc::new(socket), sub_id))
    }

    /// Resolve a host name to a destination, consulting the session's
    /// cache first. Inputs longer than 387 characters are already literal
    /// Base64 destinations and are parsed directly.
    pub async fn name_lookup(&self, name: &str) -> Result<Destination> {
        if name.len() > MAX_HOSTNAME_LEN {
            return Ok(Destination::from_base64(&b64_pad(name))?);
        }
        if let Some(hit) = self.lookups.lock().await.get(name) {
            return Ok(hit.clone());
        }

        let command = self
            .control
            .command(format!("NAMING LOOKUP NAME={name}\n"));
        let reply = tokio::time::timeout(
            Duration::from_secs(self.config.lookup_timeout_secs),
            command,
        )
        .await
        .map_err(|_| ClientError::LookupTimeout)??;

        if reply.kind != ReplyKind::NamingReply || !reply.result_ok() {
            return Err(ClientError::LookupFailed(reply.reason()));
        }
        let value = reply
            .get("VALUE")
            .ok_or_else(|| ClientError::LookupFailed("reply carried no VALUE".to_string()))?;
        let destination = Destination::from_base64(&b64_pad(value))?;
        self.lookups
            .lock()
            .await
            .insert(name.to_string(), destination.clone());
        Ok(destination)
    }

    /// Close the session: tell the bridge `QUIT` and stop every
    /// subsession task.
    pub async fn close(&self) {
        let quit = self.control.command("QUIT\n".to_string());
        match tokio::time::timeout(Duration::from_secs(5), quit).await {
            Ok(Ok(reply)) if reply.kind == ReplyKind::QuitStatus && reply.result_ok() => {
                debug!("router acknowledged QUIT")
            }
            _ => debug!("closing without QUIT acknowledgement"),
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}
