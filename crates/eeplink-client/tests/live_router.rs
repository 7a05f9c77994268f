//! End-to-end scenarios against a live router
//!
//! These tests need an I2P router on 127.0.0.1 with SAM (7656/7655) and
//! I2CP (7654) enabled, and they build real tunnels, so they are ignored
//! by default:
//!
//! ```text
//! cargo test -p eeplink-client -- --ignored
//! ```

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use eeplink_client::sam::SamSession;
use eeplink_client::i2cp::{I2cpEvent, I2cpSession};
use eeplink_client::{generate_destination, SessionConfig};

const DELIVERY: Duration = Duration::from_secs(20);

async fn sam_pair() -> (SamSession, SamSession) {
    let _ = tracing_subscriber::fmt::try_init();
    let a = SamSession::connect(SessionConfig::default(), generate_destination(None))
        .await
        .expect("session A");
    let b = SamSession::connect(SessionConfig::default(), generate_destination(None))
        .await
        .expect("session B");
    (a, b)
}

/// Scenario: repliable datagram echo between two sessions on port 13.
#[tokio::test]
#[ignore]
async fn sam_datagram_echo() {
    let (a, b) = sam_pair().await;
    let da = a.local_destination().destination().clone();
    let db = b.local_destination().destination().clone();

    let dg_a = a.datagram_subsession("echo", 13).await.unwrap();
    let dg_b = b.datagram_subsession("echo", 13).await.unwrap();

    dg_a.send_repliable(&db, 13, 13, b"hello to port 13")
        .await
        .unwrap();
    let received = timeout(DELIVERY, dg_b.recv())
        .await
        .expect("delivery within 20s")
        .expect("subsession open");
    assert_eq!(received.payload, b"hello to port 13");
    assert_eq!(received.to_port, 13);
    assert_eq!(received.source.as_bytes(), da.as_bytes());

    dg_b.send_repliable(&received.source, 13, received.from_port, b"Reply!")
        .await
        .unwrap();
    let reply = timeout(DELIVERY, dg_a.recv())
        .await
        .expect("reply within 20s")
        .expect("subsession open");
    assert_eq!(reply.payload, b"Reply!");

    a.close().await;
    b.close().await;
}

/// Scenario: a repliable datagram aimed at port 14 never surfaces on a
/// subsession listening on port 13.
#[tokio::test]
#[ignore]
async fn sam_datagram_port_filter() {
    let (a, b) = sam_pair().await;
    let db = b.local_destination().destination().clone();

    let dg_a = a.datagram_subsession("filter", 13).await.unwrap();
    let dg_b = b.datagram_subsession("filter", 13).await.unwrap();

    dg_a.send_repliable(&db, 13, 14, b"wrong port").await.unwrap();
    let outcome = timeout(Duration::from_secs(5), dg_b.recv()).await;
    assert!(outcome.is_err(), "port 14 datagram must not surface on 13");

    a.close().await;
    b.close().await;
}

/// Scenario: stream echo through the bridge.
#[tokio::test]
#[ignore]
async fn sam_stream_echo() {
    let (a, b) = sam_pair().await;
    let db = b.local_destination().destination().clone();

    let st_a = a.stream_subsession("echo", 0).await.unwrap();
    let st_b = b.stream_subsession("echo", 0).await.unwrap();

    let accept = tokio::spawn(async move {
        let mut stream = st_b.accept().await.expect("inbound stream");
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from stream1");
        stream.write_all(b"hello from stream2").await.unwrap();
        stream.flush().await.unwrap();
    });

    let mut stream = timeout(DELIVERY, st_a.create_stream(&db, 0, 0))
        .await
        .expect("connect within 20s")
        .unwrap();
    stream.write_all(b"hello from stream1").await.unwrap();
    stream.flush().await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = timeout(DELIVERY, stream.read(&mut buf))
        .await
        .expect("echo within 20s")
        .unwrap();
    assert_eq!(&buf[..n], b"hello from stream2");

    timeout(DELIVERY, accept).await.unwrap().unwrap();
    a.close().await;
    b.close().await;
}

/// Scenario: three concurrent streams; the set of payloads arrives, in
/// no particular order across streams.
#[tokio::test]
#[ignore]
async fn sam_three_concurrent_streams() {
    let (a, b) = sam_pair().await;
    let db = b.local_destination().destination().clone();

    let st_a = a.stream_subsession("many", 0).await.unwrap();
    let st_b = b.stream_subsession("many", 0).await.unwrap();

    let accept = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let mut stream = st_b.accept().await.expect("inbound stream");
            let mut buf = vec![0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            seen.push(buf[..n].to_vec());
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![b"data1".to_vec(), b"data2".to_vec(), b"data3".to_vec()]
        );
    });

    for data in [&b"data1"[..], b"data2", b"data3"] {
        let mut stream = timeout(DELIVERY, st_a.create_stream(&db, 0, 0))
            .await
            .expect("connect within 20s")
            .unwrap();
        stream.write_all(data).await.unwrap();
        stream.flush().await.unwrap();
    }

    timeout(DELIVERY, accept).await.unwrap().unwrap();
    a.close().await;
    b.close().await;
}

async fn i2cp_pair() -> (I2cpSession, I2cpSession) {
    let _ = tracing_subscriber::fmt::try_init();
    let a = I2cpSession::connect(SessionConfig::default(), generate_destination(None))
        .await
        .expect("session A");
    let b = I2cpSession::connect(SessionConfig::default(), generate_destination(None))
        .await
        .expect("session B");
    a.wait_ready().await.expect("A created");
    b.wait_ready().await.expect("B created");
    (a, b)
}

/// Scenario: stream over the binary router protocol.
#[tokio::test]
#[ignore]
async fn i2cp_stream_echo() {
    let (a, b) = i2cp_pair().await;
    let db = b.local_destination().destination().clone();

    let st_a = a.stream_subsession("echo", 0).await.unwrap();
    let st_b = b.stream_subsession("echo", 0).await.unwrap();

    let accept = tokio::spawn(async move {
        let stream = st_b.accept().await.expect("inbound stream");
        let data = stream.read().await.expect("first chunk");
        assert_eq!(data, b"Hello over I2CP!");
        stream.write(b"Reply!").await.unwrap();
    });

    let stream = st_a.create_stream(&db, 0, 0).await.unwrap();
    timeout(DELIVERY, stream.write(b"Hello over I2CP!"))
        .await
        .expect("write acked within 20s")
        .unwrap();
    let reply = timeout(DELIVERY, stream.read())
        .await
        .expect("reply within 20s")
        .expect("stream open");
    assert_eq!(reply, b"Reply!");

    timeout(DELIVERY, accept).await.unwrap().unwrap();
    a.close().await;
    b.close().await;
}

/// Scenario: repliable datagram over the binary router protocol,
/// port 13 to port 14.
#[tokio::test]
#[ignore]
async fn i2cp_repliable_datagram() {
    let (a, b) = i2cp_pair().await;
    let da = a.local_destination().destination().clone();
    let db = b.local_destination().destination().clone();

    let dg_a = a.datagram_subsession("dgram", 0).await.unwrap();
    let dg_b = b.datagram_subsession("dgram", 14).await.unwrap();

    timeout(DELIVERY, dg_a.send_repliable(&db, 13, 14, b"over i2cp"))
        .await
        .expect("accepted within 20s")
        .unwrap();
    let received = timeout(DELIVERY, dg_b.recv())
        .await
        .expect("delivery within 20s")
        .expect("subsession open");
    assert_eq!(received.payload, b"over i2cp");
    assert_eq!(received.from_port, 13);
    assert_eq!(received.to_port, 14);
    assert_eq!(received.source.as_bytes(), da.as_bytes());

    a.close().await;
    b.close().await;
}

/// The session handshake fails loudly when no router is listening; the
/// error surfaces instead of hanging.
#[tokio::test]
async fn connect_refused_without_router() {
    let config = SessionConfig {
        sam_tcp_port: 1,
        i2cp_port: 1,
        ..Default::default()
    };
    assert!(
        SamSession::connect(config.clone(), generate_destination(None))
            .await
            .is_err()
    );
    match I2cpSession::connect(config, generate_destination(None)).await {
        Err(_) => {}
        Ok(session) => {
            // connecting may succeed only if something else listens on
            // port 1; the handshake must then fail
            match session.next_event().await {
                Some(I2cpEvent::Disconnected { .. }) | None => {}
                Some(other) => panic!("unexpected event {other:?}"),
            }
        }
    }
}
