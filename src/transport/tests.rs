use super::codec::{BrokerCodec, DeviceCodec};
use super::connection::{CloseReason, Keepalive, handle_connection};
use crate::broker::message::{Request, Response};
use crate::broker::{Broker, BrokerHandle};
use crate::utils::error::CodecError;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder, Framed};

const KEEPALIVE: Keepalive = Keepalive {
    ping_interval: Duration::from_secs(30),
    pong_grace: Duration::from_secs(10),
};

fn decode_all(bytes: &[u8]) -> (Vec<Request>, BytesMut) {
    let mut buf = BytesMut::from(bytes);
    let mut out = Vec::new();
    while let Some(request) = BrokerCodec.decode(&mut buf).unwrap() {
        out.push(request);
    }
    (out, buf)
}

fn encode(response: Response) -> Vec<u8> {
    let mut buf = BytesMut::new();
    BrokerCodec.encode(response, &mut buf).unwrap();
    buf.to_vec()
}

fn start_broker() -> (BrokerHandle, JoinHandle<Broker>) {
    let (broker, handle) = Broker::new(16);
    (handle, tokio::spawn(broker.run()))
}

fn connect(broker: &BrokerHandle) -> (DuplexStream, JoinHandle<CloseReason>) {
    let (device, server) = tokio::io::duplex(1024);
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let task = tokio::spawn(handle_connection(server, peer, broker.clone(), KEEPALIVE));
    (device, task)
}

async fn read_byte(device: &mut DuplexStream) -> u8 {
    let mut byte = [0u8; 1];
    device.read_exact(&mut byte).await.unwrap();
    byte[0]
}

#[test]
fn test_decode_every_command() {
    let (requests, rest) = decode_all(b"+\x03a/b-\x01c@\x01t\x0221!");
    assert!(rest.is_empty());
    assert_eq!(
        requests,
        vec![
            Request::Subscribe {
                topic: "a/b".to_string()
            },
            Request::Unsubscribe {
                topic: "c".to_string()
            },
            Request::Publish {
                topic: "t".to_string(),
                payload: Bytes::from_static(b"21"),
            },
            Request::Pong,
        ]
    );
}

#[test]
fn test_decode_zero_length_fields() {
    let (requests, _) = decode_all(b"@\x00\x00");
    assert_eq!(
        requests,
        vec![Request::Publish {
            topic: String::new(),
            payload: Bytes::new(),
        }]
    );
}

#[test]
fn test_decode_partial_frame_waits_without_consuming() {
    let partials: [&[u8]; 4] = [b"+", b"+\x04a/", b"@\x01t", b"@\x01t\x03ab"];
    for partial in partials {
        let (requests, rest) = decode_all(partial);
        assert!(requests.is_empty(), "{partial:?}");
        assert_eq!(&rest[..], partial);
    }
}

#[test]
fn test_decode_unknown_command() {
    let mut buf = BytesMut::from(&b"\xff"[..]);
    assert!(matches!(
        BrokerCodec.decode(&mut buf),
        Err(CodecError::UnknownCommand(0xff))
    ));
}

#[test]
fn test_decode_non_ascii_topic() {
    let mut buf = BytesMut::from(&b"+\x02\xc3\xa9"[..]);
    assert!(matches!(
        BrokerCodec.decode(&mut buf),
        Err(CodecError::NonAsciiTopic)
    ));
}

#[test]
fn test_decode_eof_inside_frame_is_truncated() {
    let mut buf = BytesMut::from(&b"@\x05ab"[..]);
    assert!(matches!(
        BrokerCodec.decode_eof(&mut buf),
        Err(CodecError::Truncated { buffered: 4 })
    ));

    let mut empty = BytesMut::new();
    assert!(BrokerCodec.decode_eof(&mut empty).unwrap().is_none());
}

#[test]
fn test_encode_responses() {
    assert_eq!(encode(Response::Ok), b"k");
    assert_eq!(encode(Response::Nok("not subscribed".to_string())), b"E");
    assert_eq!(encode(Response::Ping), b"?");
    assert_eq!(
        encode(Response::Publish {
            topic: "site/room1/temp".to_string(),
            payload: Bytes::from_static(b"21.5"),
        }),
        b"@\x0fsite/room1/temp\x0421.5"
    );
}

#[test]
fn test_encode_rejects_oversized_field_without_writing() {
    let mut buf = BytesMut::new();
    let result = BrokerCodec.encode(
        Response::Publish {
            topic: "t".to_string(),
            payload: Bytes::from(vec![0u8; 256]),
        },
        &mut buf,
    );
    assert!(matches!(result, Err(CodecError::FieldTooLong { len: 256 })));
    assert!(buf.is_empty());
}

#[test]
fn test_device_codec_mirrors_broker_codec() {
    let mut wire = BytesMut::new();
    DeviceCodec
        .encode(
            Request::Publish {
                topic: "a".to_string(),
                payload: Bytes::from_static(b"x"),
            },
            &mut wire,
        )
        .unwrap();
    DeviceCodec.encode(Request::Pong, &mut wire).unwrap();
    assert_eq!(&wire[..], b"@\x01a\x01x!");

    let mut replies = BytesMut::from(&b"kE?@\x01a\x00"[..]);
    let mut decoded = Vec::new();
    while let Some(response) = DeviceCodec.decode(&mut replies).unwrap() {
        decoded.push(response);
    }
    assert_eq!(
        decoded,
        vec![
            Response::Ok,
            Response::Nok(String::new()),
            Response::Ping,
            Response::Publish {
                topic: "a".to_string(),
                payload: Bytes::new(),
            },
        ]
    );

    assert!(matches!(
        DeviceCodec.encode(
            Request::UnsubscribeAll {
                skip_response: true
            },
            &mut wire
        ),
        Err(CodecError::NotOnWire(_))
    ));
}

#[tokio::test]
async fn test_unknown_command_closes_without_reply() {
    let (broker, _broker_task) = start_broker();
    let (mut device, conn) = connect(&broker);

    device.write_all(&[0xff]).await.unwrap();
    let mut rest = Vec::new();
    device.read_to_end(&mut rest).await.unwrap();

    assert!(rest.is_empty());
    assert!(matches!(
        conn.await.unwrap(),
        CloseReason::Protocol(CodecError::UnknownCommand(0xff))
    ));
}

#[tokio::test]
async fn test_truncated_frame_at_eof_closes() {
    let (broker, _broker_task) = start_broker();
    let (mut device, conn) = connect(&broker);

    device.write_all(b"@\x05ab").await.unwrap();
    device.shutdown().await.unwrap();
    let mut rest = Vec::new();
    device.read_to_end(&mut rest).await.unwrap();

    assert!(rest.is_empty());
    assert!(matches!(
        conn.await.unwrap(),
        CloseReason::Protocol(CodecError::Truncated { .. })
    ));
}

#[tokio::test]
async fn test_unsubscribe_unknown_is_nok_and_connection_stays_open() {
    let (broker, _broker_task) = start_broker();
    let (mut device, conn) = connect(&broker);

    device.write_all(b"-\x01x").await.unwrap();
    assert_eq!(read_byte(&mut device).await, b'E');

    device.write_all(b"+\x01x-\x01x").await.unwrap();
    assert_eq!(read_byte(&mut device).await, b'k');
    assert_eq!(read_byte(&mut device).await, b'k');

    drop(device);
    assert!(matches!(conn.await.unwrap(), CloseReason::Eof));
}

#[tokio::test]
async fn test_publish_reaches_subscriber_on_other_connection() {
    let (broker, _broker_task) = start_broker();
    let (x, _x_conn) = connect(&broker);
    let (y, _y_conn) = connect(&broker);
    let mut x = Framed::new(x, DeviceCodec);
    let mut y = Framed::new(y, DeviceCodec);

    x.send(Request::Subscribe {
        topic: "site/+/temp".to_string(),
    })
    .await
    .unwrap();
    assert_eq!(x.next().await.unwrap().unwrap(), Response::Ok);

    y.send(Request::Publish {
        topic: "site/room1/temp".to_string(),
        payload: Bytes::from_static(b"21.5"),
    })
    .await
    .unwrap();
    assert_eq!(y.next().await.unwrap().unwrap(), Response::Ok);
    assert_eq!(
        x.next().await.unwrap().unwrap(),
        Response::Publish {
            topic: "site/room1/temp".to_string(),
            payload: Bytes::from_static(b"21.5"),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_and_loses_subscriptions() {
    let (broker, broker_task) = start_broker();
    let (mut device, conn) = connect(&broker);
    let started = Instant::now();

    device.write_all(b"+\x03a/b").await.unwrap();
    assert_eq!(read_byte(&mut device).await, b'k');

    let mut rest = Vec::new();
    device.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert!(started.elapsed() >= KEEPALIVE.timeout());
    assert!(matches!(conn.await.unwrap(), CloseReason::KeepaliveTimeout));

    drop(broker);
    let broker = broker_task.await.unwrap();
    assert!(broker.tree.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pong_schedules_ping_then_grace_expires() {
    let (broker, _broker_task) = start_broker();
    let (mut device, conn) = connect(&broker);

    device.write_all(b"!").await.unwrap();
    let ponged = Instant::now();

    assert_eq!(read_byte(&mut device).await, b'?');
    assert!(ponged.elapsed() >= KEEPALIVE.ping_interval);
    assert!(ponged.elapsed() < KEEPALIVE.timeout());

    let mut rest = Vec::new();
    device.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert!(ponged.elapsed() >= KEEPALIVE.timeout());
    assert!(matches!(conn.await.unwrap(), CloseReason::KeepaliveTimeout));
}

#[tokio::test(start_paused = true)]
async fn test_answering_pings_keeps_connection_open() {
    let (broker, _broker_task) = start_broker();
    let (mut device, conn) = connect(&broker);
    let started = Instant::now();

    device.write_all(b"!").await.unwrap();
    for _ in 0..5 {
        assert_eq!(read_byte(&mut device).await, b'?');
        device.write_all(b"!").await.unwrap();
    }

    assert!(started.elapsed() > KEEPALIVE.timeout() * 3);
    assert!(!conn.is_finished());

    drop(device);
    assert!(matches!(conn.await.unwrap(), CloseReason::Eof));
}

#[tokio::test]
async fn test_oversized_publish_leaves_subscriber_connected() {
    let (broker, _broker_task) = start_broker();
    let (device, conn) = connect(&broker);
    let mut device = Framed::new(device, DeviceCodec);
    device
        .send(Request::Subscribe {
            topic: "#".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(device.next().await.unwrap().unwrap(), Response::Ok);

    let (tx, mut replies) = tokio::sync::mpsc::unbounded_channel();
    let publisher = crate::client::Client::new(tx);
    for topic in ["a".repeat(300), "ok".to_string()] {
        broker
            .submit(
                &publisher,
                Request::Publish {
                    topic,
                    payload: Bytes::from_static(b"1"),
                },
            )
            .await
            .unwrap();
    }
    assert!(matches!(replies.recv().await, Some(Response::Nok(_))));
    assert_eq!(replies.recv().await, Some(Response::Ok));

    assert_eq!(
        device.next().await.unwrap().unwrap(),
        Response::Publish {
            topic: "ok".to_string(),
            payload: Bytes::from_static(b"1"),
        }
    );
    assert!(!conn.is_finished());
}
