use crate::broker::Broker;
use crate::broker::message::{Request, Response};
use crate::config::ServerSettings;
use crate::transport::codec::DeviceCodec;
use crate::transport::{Keepalive, serve, serve_until};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};
use tokio_util::codec::Framed;

type Device = Framed<TcpStream, DeviceCodec>;

const KEEPALIVE: Keepalive = Keepalive {
    ping_interval: Duration::from_secs(30),
    pong_grace: Duration::from_secs(10),
};

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn connect(addr: SocketAddr) -> Device {
    Framed::new(TcpStream::connect(addr).await.unwrap(), DeviceCodec)
}

async fn next(device: &mut Device) -> Response {
    timeout(Duration::from_secs(5), device.next())
        .await
        .expect("timed out waiting for the router")
        .expect("router closed the connection")
        .expect("undecodable frame")
}

async fn subscribe(device: &mut Device, topic: &str) {
    device
        .send(Request::Subscribe {
            topic: topic.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(next(device).await, Response::Ok);
}

fn publish(topic: &str, payload: &'static [u8]) -> Request {
    Request::Publish {
        topic: topic.to_string(),
        payload: Bytes::from_static(payload),
    }
}

#[tokio::test]
async fn integration_wildcard_publish_reaches_subscriber() {
    let (broker, handle) = Broker::new(64);
    tokio::spawn(broker.run());
    let (listener, addr) = listen().await;
    tokio::spawn(serve(listener, handle, KEEPALIVE));

    let mut x = connect(addr).await;
    let mut y = connect(addr).await;
    subscribe(&mut x, "site/+/temp").await;

    y.send(publish("site/room1/temp", b"21.5")).await.unwrap();
    assert_eq!(next(&mut y).await, Response::Ok);
    assert_eq!(
        next(&mut x).await,
        Response::Publish {
            topic: "site/room1/temp".to_string(),
            payload: Bytes::from_static(b"21.5"),
        }
    );

    // the publisher is not subscribed, so it gets nothing further
    assert!(
        timeout(Duration::from_millis(200), y.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn integration_unsubscribe_stops_delivery() {
    let (broker, handle) = Broker::new(64);
    tokio::spawn(broker.run());
    let (listener, addr) = listen().await;
    tokio::spawn(serve(listener, handle, KEEPALIVE));

    let mut x = connect(addr).await;
    let mut y = connect(addr).await;
    subscribe(&mut x, "door/#").await;
    subscribe(&mut x, "door/front").await;

    x.send(Request::Unsubscribe {
        topic: "door/#".to_string(),
    })
    .await
    .unwrap();
    assert_eq!(next(&mut x).await, Response::Ok);

    y.send(publish("door/back", b"open")).await.unwrap();
    y.send(publish("door/front", b"closed")).await.unwrap();
    assert_eq!(next(&mut y).await, Response::Ok);
    assert_eq!(next(&mut y).await, Response::Ok);

    assert_eq!(
        next(&mut x).await,
        Response::Publish {
            topic: "door/front".to_string(),
            payload: Bytes::from_static(b"closed"),
        }
    );
}

#[tokio::test]
async fn integration_disconnect_removes_subscriptions() {
    let (broker, handle) = Broker::new(64);
    let coordinator = tokio::spawn(broker.run());
    let (listener, addr) = listen().await;
    let server = tokio::spawn(serve(listener, handle.clone(), KEEPALIVE));

    let mut x = connect(addr).await;
    subscribe(&mut x, "a/b").await;
    subscribe(&mut x, "a/+").await;
    drop(x);

    server.abort();
    let _ = server.await;
    drop(handle);

    let broker = timeout(Duration::from_secs(5), coordinator)
        .await
        .expect("coordinator kept running")
        .unwrap();
    assert!(broker.tree.is_empty());
    assert_eq!(broker.tree.client_count(), 0);
}

#[tokio::test]
async fn integration_unknown_command_closes_silently() {
    let (broker, handle) = Broker::new(64);
    tokio::spawn(broker.run());
    let (listener, addr) = listen().await;
    tokio::spawn(serve(listener, handle, KEEPALIVE));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0xff]).await.unwrap();

    let mut rest = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .expect("connection was not closed")
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn integration_keepalive_pings_and_drops_silent_device() {
    let keepalive = Keepalive {
        ping_interval: Duration::from_millis(200),
        pong_grace: Duration::from_millis(200),
    };
    let (broker, handle) = Broker::new(64);
    tokio::spawn(broker.run());
    let (listener, addr) = listen().await;
    tokio::spawn(serve(listener, handle, keepalive));

    let mut device = connect(addr).await;
    device.send(Request::Pong).await.unwrap();
    let ponged = Instant::now();

    assert_eq!(next(&mut device).await, Response::Ping);
    assert!(ponged.elapsed() >= keepalive.ping_interval);

    // stop answering: the router hangs up after the grace period
    let closed = timeout(Duration::from_secs(5), device.next())
        .await
        .expect("router kept a silent device");
    assert!(closed.is_none());
    assert!(ponged.elapsed() >= keepalive.timeout());
}

#[tokio::test]
async fn integration_configured_listener_runs_until_shutdown() {
    let (broker, handle) = Broker::new(64);
    tokio::spawn(broker.run());
    let port = {
        let (spare, addr) = listen().await;
        drop(spare);
        addr.port()
    };
    let settings = ServerSettings {
        host: "127.0.0.1".to_string(),
        port,
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let addr = settings.addr();
        serve_until(&addr, handle, KEEPALIVE, async {
            let _ = stop_rx.await;
        })
        .await
    });

    let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut device = loop {
        match TcpStream::connect(target).await {
            Ok(stream) => break Framed::new(stream, DeviceCodec),
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    };
    subscribe(&mut device, "a").await;

    stop_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), server)
        .await
        .expect("listener ignored shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn integration_listener_stops_when_broker_stops() {
    let (broker, handle) = Broker::new(64);
    let coordinator = tokio::spawn(broker.run());
    let (listener, _addr) = listen().await;
    let server = tokio::spawn(serve(listener, handle.clone(), KEEPALIVE));

    // the listener's own handle keeps the coordinator alive, so stop it directly
    coordinator.abort();
    let _ = coordinator.await;
    drop(handle);

    timeout(Duration::from_secs(5), server)
        .await
        .expect("listener kept waiting for a device")
        .unwrap();
}
