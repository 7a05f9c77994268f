//! SAM subsessions and the per-connection stream socket

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use eeplink_protocol::destination::Destination;
use eeplink_protocol::encoding::b64_pad;

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::events::ReceivedDatagram;
use crate::sam::parser::ReplyKind;
use crate::sam::{open_data_socket, read_reply};

/// A bidirectional byte stream to a remote destination, carried over its
/// own bridge socket after the `STREAM CONNECT`/`STREAM ACCEPT` preamble.
pub struct SamStream {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    remote: Option<Destination>,
    from_port: u16,
    to_port: u16,
}

impl SamStream {
    /// The peer's destination. Known for accepted streams (from the
    /// accept preamble) and for outbound streams (the dial target).
    pub fn remote(&self) -> Option<&Destination> {
        self.remote.as_ref()
    }

    pub fn from_port(&self) -> u16 {
        self.from_port
    }

    pub fn to_port(&self) -> u16 {
        self.to_port
    }
}

impl AsyncRead for SamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for SamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for SamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamStream")
            .field("remote", &self.remote.as_ref().map(|d| d.short_name()))
            .field("from_port", &self.from_port)
            .field("to_port", &self.to_port)
            .finish()
    }
}

/// Dial a remote destination through the bridge.
pub(crate) async fn connect_stream(
    config: &SessionConfig,
    sub_id: &str,
    destination: &Destination,
    from_port: u16,
    to_port: u16,
) -> Result<SamStream> {
    let (mut reader, mut writer) = open_data_socket(config).await?;
    writer
        .write_all(
            format!(
                "STREAM CONNECT ID={sub_id} DESTINATION={} SILENT=false FROM_PORT={from_port} TO_PORT={to_port}\n",
                b64_pad(&destination.to_base64())
            )
            .as_bytes(),
        )
        .await?;
    let reply = read_reply(&mut reader).await?;
    if reply.kind != ReplyKind::StreamStatus || !reply.result_ok() {
        return Err(ClientError::StreamRejected(reply.reason()));
    }
    Ok(SamStream {
        reader,
        writer,
        remote: Some(destination.clone()),
        from_port,
        to_port,
    })
}

/// Arm one accept socket and wait for an inbound stream. The second
/// preamble line names the remote destination and the ports.
async fn accept_one(config: &SessionConfig, sub_id: &str) -> Result<SamStream> {
    let (mut reader, mut writer) = open_data_socket(config).await?;
    writer
        .write_all(format!("STREAM ACCEPT ID={sub_id} SILENT=false\n").as_bytes())
        .await?;
    let reply = read_reply(&mut reader).await?;
    if reply.kind != ReplyKind::StreamStatus || !reply.result_ok() {
        return Err(ClientError::StreamRejected(reply.reason()));
    }

    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(ClientError::SessionClosed);
    }
    let mut tokens = line.split_whitespace();
    let dest = tokens
        .next()
        .ok_or_else(|| ClientError::StreamRejected("empty accept preamble".to_string()))?;
    let remote = Destination::from_base64(&b64_pad(dest))?;
    let mut from_port = 0u16;
    let mut to_port = 0u16;
    for token in tokens {
        match token.split_once('=') {
            Some(("FROM_PORT", value)) => from_port = value.parse().unwrap_or(0),
            Some(("TO_PORT", value)) => to_port = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(SamStream {
        reader,
        writer,
        remote: Some(remote),
        from_port,
        to_port,
    })
}

/// Keep one accept socket armed; re-arm as soon as a stream lands.
/// Streams for other listen ports are dropped here.
pub(crate) async fn accept_loop(
    config: SessionConfig,
    sub_id: String,
    listen_port: u16,
    tx: mpsc::Sender<SamStream>,
) {
    loop {
        match accept_one(&config, &sub_id).await {
            Ok(stream) => {
                if listen_port != 0 && stream.to_port() != listen_port {
                    debug!(
                        to_port = stream.to_port(),
                        listen_port, "dropping stream for another port"
                    );
                    continue;
                }
                if tx.send(stream).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                if tx.is_closed() {
                    break;
                }
                warn!(error = %e, sub_id = %sub_id, "stream accept failed, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// A STREAM subsession: dial out, or take accepted inbound streams.
pub struct SamStreamSubsession {
    config: SessionConfig,
    sub_id: String,
    listen_port: u16,
    incoming: Mutex<mpsc::Receiver<SamStream>>,
}

impl SamStreamSubsession {
    pub(crate) fn new(
        config: SessionConfig,
        sub_id: String,
        listen_port: u16,
        incoming: mpsc::Receiver<SamStream>,
    ) -> Self {
        SamStreamSubsession {
            config,
            sub_id,
            listen_port,
            incoming: Mutex::new(incoming),
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Open a stream to `destination`.
    pub async fn create_stream(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
    ) -> Result<SamStream> {
        connect_stream(&self.config, &self.sub_id, destination, from_port, to_port).await
    }

    /// The next accepted inbound stream. `None` once the session closed.
    pub async fn accept(&self) -> Option<SamStream> {
        self.incoming.lock().await.recv().await
    }
}

/// Where a datagram receive loop delivers.
pub(crate) enum DatagramSink {
    Repliable(mpsc::Sender<ReceivedDatagram>),
    Raw(mpsc::Sender<Vec<u8>>),
}

/// Parse forwarded datagrams off the UDP socket. The first line carries
/// the source destination and ports; the payload follows the newline.
/// Repliable subsessions filter on the destination port; raw subsessions
/// take everything.
pub(crate) async fn datagram_recv_loop(
    socket: Arc<UdpSocket>,
    listen_port: u16,
    sink: DatagramSink,
) {
    let mut buf = vec![0u8; 65536];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                warn!(error = %e, "datagram socket receive failed");
                break;
            }
        };
        let datagram = &buf[..len];
        let newline = match datagram.iter().position(|b| *b == b'\n') {
            Some(pos) => pos,
            None => {
                debug!("datagram without header line, dropping");
                continue;
            }
        };
        let header = match std::str::from_utf8(&datagram[..newline]) {
            Ok(header) => header,
            Err(_) => {
                debug!("datagram with invalid header, dropping");
                continue;
            }
        };
        let payload = datagram[newline + 1..].to_vec();

        let mut tokens = header.split_whitespace();
        let source_b64 = match tokens.next() {
            Some(token) => token,
            None => continue,
        };
        let mut from_port = 0u16;
        let mut to_port = 0u16;
        for token in tokens {
            match token.split_once('=') {
                Some(("FROM_PORT", value)) => from_port = value.parse().unwrap_or(0),
                Some(("TO_PORT", value)) => to_port = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        match &sink {
            DatagramSink::Repliable(tx) => {
                if listen_port != 0 && to_port != listen_port {
                    debug!(to_port, listen_port, "dropping datagram for another port");
                    continue;
                }
                let source = match Destination::from_base64(&b64_pad(source_b64)) {
                    Ok(source) => source,
                    Err(e) => {
                        debug!(error = %e, "datagram with unparseable source, dropping");
                        continue;
                    }
                };
                let event = ReceivedDatagram {
                    source,
                    from_port,
                    to_port,
                    payload,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            // raw delivery is payload-only and unfiltered
            DatagramSink::Raw(tx) => {
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// A repliable DATAGRAM subsession over the bridge's UDP port.
pub struct SamDatagramSubsession {
    config: SessionConfig,
    sub_id: String,
    listen_port: u16,
    socket: Arc<UdpSocket>,
    incoming: Mutex<mpsc::Receiver<ReceivedDatagram>>,
}

impl SamDatagramSubsession {
    pub(crate) fn new(
        config: SessionConfig,
        sub_id: String,
        listen_port: u16,
        socket: Arc<UdpSocket>,
        incoming: mpsc::Receiver<ReceivedDatagram>,
    ) -> Self {
        SamDatagramSubsession {
            config,
            sub_id,
            listen_port,
            socket,
            incoming: Mutex::new(incoming),
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Send a repliable datagram; the router signs it with the session
    /// destination so the receiver can reply.
    pub async fn send_repliable(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
        payload: &[u8],
    ) -> Result<()> {
        self.send_udp(destination, from_port, to_port, payload).await
    }

    async fn send_udp(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
        payload: &[u8],
    ) -> Result<()> {
        let mut buf = format!(
            "3.0 {} {} FROM_PORT={from_port} TO_PORT={to_port}\n",
            self.sub_id,
            b64_pad(&destination.to_base64())
        )
        .into_bytes();
        buf.extend_from_slice(payload);
        self.socket
            .send_to(&buf, self.config.sam_udp_addr())
            .await?;
        Ok(())
    }

    /// The next datagram addressed to this subsession's listen port.
    pub async fn recv(&self) -> Option<ReceivedDatagram> {
        self.incoming.lock().await.recv().await
    }
}

/// A RAW subsession: unsigned datagrams, payload-only delivery, no port
/// filtering.
pub struct SamRawSubsession {
    config: SessionConfig,
    sub_id: String,
    socket: Arc<UdpSocket>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl SamRawSubsession {
    pub(crate) fn new(
        config: SessionConfig,
        sub_id: String,
        socket: Arc<UdpSocket>,
        incoming: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        SamRawSubsession {
            config,
            sub_id,
            socket,
            incoming: Mutex::new(incoming),
        }
    }

    pub async fn send_raw(
        &self,
        destination: &Destination,
        from_port: u16,
        to_port: u16,
        payload: &[u8],
    ) -> Result<()> {
        let mut buf = format!(
            "3.0 {} {} FROM_PORT={from_port} TO_PORT={to_port}\n",
            self.sub_id,
            b64_pad(&destination.to_base64())
        )
        .into_bytes();
        buf.extend_from_slice(payload);
        self.socket
            .send_to(&buf, self.config.sam_udp_addr())
            .await?;
        Ok(())
    }

    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.incoming.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeplink_crypto::SigType;
    use eeplink_protocol::LocalDestination;
    use std::time::Duration;

    fn forwarded(dest: &Destination, from_port: u16, to_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut datagram = format!(
            "{} FROM_PORT={from_port} TO_PORT={to_port}\n",
            dest.to_base64()
        )
        .into_bytes();
        datagram.extend_from_slice(payload);
        datagram
    }

    /// Simulate the router forwarding datagrams to a bound subsession
    /// socket: the port filter applies to repliable delivery only.
    #[tokio::test]
    async fn repliable_loop_filters_by_listen_port() {
        let source = LocalDestination::generate(SigType::Ed25519);
        let router = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let loop_task = tokio::spawn(datagram_recv_loop(
            socket,
            13,
            DatagramSink::Repliable(tx),
        ));

        // wrong destination port: must not surface
        let dgram = forwarded(source.destination(), 5, 14, b"wrong port");
        router.send_to(&dgram, addr).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv())
                .await
                .is_err(),
            "port 14 datagram surfaced on listen port 13"
        );

        // matching port: delivered with sender and ports
        let dgram = forwarded(source.destination(), 5, 13, b"right port");
        router.send_to(&dgram, addr).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery")
            .expect("loop alive");
        assert_eq!(event.payload, b"right port");
        assert_eq!(event.from_port, 5);
        assert_eq!(event.to_port, 13);
        assert_eq!(event.source.as_bytes(), source.destination().as_bytes());

        loop_task.abort();
    }

    /// Raw delivery has no port filter and carries the payload only.
    #[tokio::test]
    async fn raw_loop_is_unfiltered() {
        let source = LocalDestination::generate(SigType::Ed25519);
        let router = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let loop_task = tokio::spawn(datagram_recv_loop(socket, 13, DatagramSink::Raw(tx)));

        let dgram = forwarded(source.destination(), 5, 14, b"any port");
        router.send_to(&dgram, addr).await.unwrap();
        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery")
            .expect("loop alive");
        assert_eq!(payload, b"any port");

        loop_task.abort();
    }

    /// Datagrams without a header line are dropped, not delivered.
    #[tokio::test]
    async fn garbage_datagrams_are_dropped() {
        let router = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let loop_task = tokio::spawn(datagram_recv_loop(
            socket,
            0,
            DatagramSink::Repliable(tx),
        ));

        router.send_to(&[0xffu8; 32], addr).await.unwrap();
        router.send_to(b"not-a-dest FROM_PORT=1 TO_PORT=2\npayload", addr)
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv())
                .await
                .is_err()
        );

        loop_task.abort();
    }
}
