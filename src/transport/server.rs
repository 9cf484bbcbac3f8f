use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::broker::BrokerHandle;
use crate::transport::connection::{Keepalive, handle_connection};

/// Binds `addr` and serves devices until the broker shuts down.
pub async fn start_server(
    addr: &str,
    broker: BrokerHandle,
    keepalive: Keepalive,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Busrouter listening on {}", listener.local_addr()?);
    serve(listener, broker, keepalive).await;
    Ok(())
}

/// Like [`start_server`], but also returns once `shutdown` resolves.
pub async fn serve_until<F>(
    addr: &str,
    broker: BrokerHandle,
    keepalive: Keepalive,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = start_server(addr, broker, keepalive) => result,
        () = shutdown => {
            info!("Shutdown signal received, listener stopped");
            Ok(())
        }
    }
}

/// Accept loop over an already bound listener. Each device gets its own task.
pub async fn serve(listener: TcpListener, broker: BrokerHandle, keepalive: Keepalive) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = broker.closed() => break,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle for {peer}: {e}");
        }

        let broker = broker.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, broker, keepalive).await;
        });
    }
    info!("Broker closed, listener stopped");
}
