mod common;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use common::{connect_packet, publish_packet};
use keyway_proxy::engine::inspector::{ConnectionInspector, InspectorState, Resolution};
use keyway_proxy::engine::preread::{preread, read_with_timeout, PrereadOutcome, Rewind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn default_inspector() -> ConnectionInspector {
    ConnectionInspector::default()
}

#[tokio::test]
async fn test_read_with_timeout_success() {
    let data = b"hello world";
    let mut reader = &data[..];
    let mut buf = vec![0u8; 11];

    let result = read_with_timeout(&mut reader, &mut buf, Duration::from_secs(1)).await;
    assert_eq!(result.unwrap(), 11);
    assert_eq!(&buf, data);
}

#[tokio::test]
async fn test_read_with_timeout_expires() {
    let (_client, mut server) = tokio::io::duplex(64);
    let mut buf = [0u8; 4];

    let err = read_with_timeout(&mut server, &mut buf, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
}

#[tokio::test]
async fn test_preread_whole_connect() {
    let packet = connect_packet(b"acme|sensor-1");
    let mut reader = &packet[..];
    let mut inspector = default_inspector();
    let mut buf = BytesMut::new();

    let outcome = preread(
        &mut reader,
        &mut inspector,
        &mut buf,
        Duration::from_secs(1),
        1024,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PrereadOutcome::Classified);
    assert_eq!(inspector.routing_key().as_str(), "acme_Broker");
    assert_eq!(&buf[..], &packet[..]);
}

#[tokio::test]
async fn test_preread_reassembles_fragmented_connect() {
    let packet = connect_packet(b"tenantA|device123");
    let (mut client, mut server) = tokio::io::duplex(256);

    let (head, tail) = packet.split_at(2);
    client.write_all(head).await.unwrap();
    let tail = tail.to_vec();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(&tail).await.unwrap();
        client
    });

    let mut inspector = default_inspector();
    let mut buf = BytesMut::new();
    let outcome = preread(
        &mut server,
        &mut inspector,
        &mut buf,
        Duration::from_secs(2),
        1024,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PrereadOutcome::Classified);
    assert_eq!(inspector.routing_key().as_str(), "tenantA_Broker");
    assert_eq!(&buf[..], &packet[..]);
    drop(writer.await.unwrap());
}

#[tokio::test]
async fn test_preread_non_connect_proceeds_with_default() {
    let packet = publish_packet();
    let mut reader = &packet[..];
    let mut inspector = default_inspector();
    let mut buf = BytesMut::new();

    let outcome = preread(
        &mut reader,
        &mut inspector,
        &mut buf,
        Duration::from_secs(1),
        1024,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PrereadOutcome::Classified);
    assert_eq!(
        inspector.state(),
        &InspectorState::Resolved(Resolution::UnexpectedPacketType(0x30))
    );
    assert!(inspector.routing_key().is_default());
}

#[tokio::test]
async fn test_preread_timeout_abandons() {
    let (mut client, mut server) = tokio::io::duplex(64);
    client.write_all(&[0x10]).await.unwrap();

    let mut inspector = default_inspector();
    let mut buf = BytesMut::new();
    let outcome = preread(
        &mut server,
        &mut inspector,
        &mut buf,
        Duration::from_millis(50),
        1024,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PrereadOutcome::TimedOut);
    assert_eq!(
        inspector.state(),
        &InspectorState::Resolved(Resolution::Abandoned("preread timeout"))
    );
    assert!(inspector.routing_key().is_default());
    assert_eq!(&buf[..], &[0x10u8]);
    drop(client);
}

#[tokio::test]
async fn test_preread_limit_abandons() {
    let packet = connect_packet(b"acme|sensor-1");
    let mut reader = &packet[..];
    let mut inspector = default_inspector();
    let mut buf = BytesMut::new();

    let outcome = preread(
        &mut reader,
        &mut inspector,
        &mut buf,
        Duration::from_secs(1),
        8,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PrereadOutcome::LimitExceeded);
    assert_eq!(buf.len(), 8);
    assert!(inspector.routing_key().is_default());
    assert!(inspector.is_resolved());
}

#[tokio::test]
async fn test_preread_client_closed_early() {
    let data = [0x10u8, 0x15];
    let mut reader = &data[..];
    let mut inspector = default_inspector();
    let mut buf = BytesMut::new();

    let outcome = preread(
        &mut reader,
        &mut inspector,
        &mut buf,
        Duration::from_secs(1),
        1024,
    )
    .await
    .unwrap();

    assert_eq!(outcome, PrereadOutcome::ClosedEarly);
    assert_eq!(
        inspector.state(),
        &InspectorState::Resolved(Resolution::Abandoned("client closed during preread"))
    );
}

#[tokio::test]
async fn test_rewind_replays_prefix_before_inner() {
    let inner = &b"world"[..];
    let mut reader = Rewind::new(Bytes::from_static(b"hello "), inner);
    assert_eq!(reader.pending(), 6);

    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"hello world");
    assert_eq!(reader.pending(), 0);
}

#[tokio::test]
async fn test_rewind_small_reads() {
    let inner = &b"cd"[..];
    let mut reader = Rewind::new(Bytes::from_static(b"ab"), inner);

    let mut one = [0u8; 1];
    reader.read_exact(&mut one).await.unwrap();
    assert_eq!(&one, b"a");
    assert_eq!(reader.pending(), 1);

    let mut rest = [0u8; 3];
    reader.read_exact(&mut rest).await.unwrap();
    assert_eq!(&rest, b"bcd");

    let inner = reader.into_inner();
    assert!(inner.is_empty());
}
