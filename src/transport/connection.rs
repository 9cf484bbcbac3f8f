//! Per-connection protocol handling.
//!
//! Each accepted stream is split in two. The read half stays in the
//! connection task, which decodes requests, forwards them to the broker and
//! runs the keepalive timers. The write half moves into a response writer
//! task that drains the connection's response queue in order. The two only
//! share that queue, so a device that stops reading cannot stall decoding.
//!
//! Keepalive: the connection starts with a deadline of
//! `ping_interval + pong_grace`. Every `!` from the device pushes the
//! deadline out by the same amount and re-arms a ping timer for
//! `ping_interval`; when it fires a `?` is queued. Both timers live in the
//! same `select!` as the reader, so a pong and a firing timer can never race.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Instant, sleep};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::broker::BrokerHandle;
use crate::broker::message::{Request, Response};
use crate::client::{Client, ClientId};
use crate::config::KeepaliveSettings;
use crate::transport::codec::BrokerCodec;
use crate::utils::error::CodecError;

/// Keepalive timing for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_grace: Duration,
}

impl Keepalive {
    /// How long a connection may go without a pong.
    pub fn timeout(&self) -> Duration {
        self.ping_interval + self.pong_grace
    }
}

impl From<&KeepaliveSettings> for Keepalive {
    fn from(settings: &KeepaliveSettings) -> Self {
        Self {
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
            pong_grace: Duration::from_secs(settings.pong_grace_secs),
        }
    }
}

/// Why a connection left the active state.
#[derive(Debug)]
pub enum CloseReason {
    /// The device closed its end between frames.
    Eof,
    /// Unknown command, truncated frame or undecodable topic.
    Protocol(CodecError),
    Io(std::io::Error),
    KeepaliveTimeout,
    /// The response writer stopped, so nothing more can reach the device.
    WriterClosed,
    BrokerUnavailable,
}

/// Serves one device until it disconnects, violates the protocol or misses
/// its keepalive, then withdraws all of its subscriptions.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    broker: BrokerHandle,
    keepalive: Keepalive,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut requests = FramedRead::new(read_half, BrokerCodec);
    let (tx, rx) = mpsc::unbounded_channel::<Response>();
    let client = Client::new(tx);
    info!("{} connected from {peer}", client.id);

    let mut writer = tokio::spawn(write_responses(
        rx,
        FramedWrite::new(write_half, BrokerCodec),
        client.id.clone(),
    ));
    let mut writer_joined = false;

    let deadline = sleep(keepalive.timeout());
    tokio::pin!(deadline);
    let ping = sleep(keepalive.ping_interval);
    tokio::pin!(ping);
    let mut ping_armed = false;

    let reason = loop {
        tokio::select! {
            frame = requests.next() => match frame {
                Some(Ok(request)) => {
                    if request == Request::Pong {
                        let now = Instant::now();
                        deadline.as_mut().reset(now + keepalive.timeout());
                        ping.as_mut().reset(now + keepalive.ping_interval);
                        ping_armed = true;
                    }
                    debug!("{} sent {}", client.id, request.kind());
                    if broker.submit(&client, request).await.is_err() {
                        break CloseReason::BrokerUnavailable;
                    }
                }
                Some(Err(CodecError::Io(e))) => break CloseReason::Io(e),
                Some(Err(e)) => break CloseReason::Protocol(e),
                None => break CloseReason::Eof,
            },
            () = &mut deadline => break CloseReason::KeepaliveTimeout,
            () = &mut ping, if ping_armed => {
                ping_armed = false;
                client.send(Response::Ping);
            }
            _ = &mut writer => {
                writer_joined = true;
                break CloseReason::WriterClosed;
            }
        }
    };

    // Closing: stop the writer before the stream goes away.
    if !writer_joined {
        writer.abort();
        let _ = writer.await;
    }
    if broker
        .submit(
            &client,
            Request::UnsubscribeAll {
                skip_response: true,
            },
        )
        .await
        .is_err()
    {
        warn!("Broker gone, could not clean up {}", client.id);
    }
    drop(requests);

    match &reason {
        CloseReason::Eof => info!("{} disconnected", client.id),
        CloseReason::KeepaliveTimeout => warn!(
            "{} missed its keepalive after {}s, closing",
            client.id,
            client.uptime_secs()
        ),
        other => warn!("{} closed: {other:?}", client.id),
    }
    reason
}

async fn write_responses<W>(
    mut responses: UnboundedReceiver<Response>,
    mut sink: FramedWrite<W, BrokerCodec>,
    client_id: ClientId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = responses.recv().await {
        match sink.send(response).await {
            Ok(()) => {}
            // nothing was buffered, the stream is still in sync
            Err(CodecError::FieldTooLong { len }) => {
                warn!("Dropped response to {client_id}: field of {len} bytes");
            }
            Err(e) => {
                warn!("Failed to send response to {client_id}: {e}");
                break;
            }
        }
    }
    debug!("Send loop closed for {client_id}");
}
