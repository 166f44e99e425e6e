//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, info, warn};

use peerline_core::SignalConfig;

use crate::http::{self, ServerStats};
use crate::hub::SignalHub;
use crate::messages::Envelope;
use crate::registry::{ConnectionId, PeerHandle};
use crate::SignalError;

/// How long a new connection may take to send its request head
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Signal server
pub struct SignalServer {
    hub: Arc<SignalHub>,
    config: SignalConfig,
}

impl SignalServer {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            hub: Arc::new(SignalHub::new(&config)),
            config,
        }
    }

    /// Shared hub, for monitoring
    pub fn hub(&self) -> Arc<SignalHub> {
        self.hub.clone()
    }

    /// Bind the configured address and serve forever
    pub async fn serve(&self) -> Result<(), SignalError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), SignalError> {
        info!("Signal server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };

            let hub = self.hub.clone();
            let static_dir = self.config.static_dir.clone();
            let max_message_bytes = self.config.max_message_bytes;

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer_addr, hub, static_dir, max_message_bytes).await
                {
                    debug!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }

    /// Get peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.hub.peer_count()
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SignalHub>,
    static_dir: Option<PathBuf>,
    max_message_bytes: usize,
) -> Result<(), SignalError> {
    // Peek so an upgrade request is still on the socket for the handshake
    let head = timeout(HEAD_TIMEOUT, http::peek_request_head(&stream))
        .await
        .map_err(|_| SignalError::Handshake("timed out waiting for request".into()))??;

    if !head.is_websocket_upgrade() {
        let head = http::read_request_head(&mut stream).await?;
        let stats = ServerStats {
            peers: hub.peer_count(),
            blocks: hub.block_count(),
        };
        return http::respond(&mut stream, &head, stats, static_dir.as_deref()).await;
    }

    let ws_stream = upgrade(stream, max_message_bytes).await?;
    run_session(ws_stream, peer_addr, hub).await
}

/// Run the WebSocket handshake with the inbound size limits applied
async fn upgrade(
    stream: TcpStream,
    max_message_bytes: usize,
) -> Result<WebSocketStream<TcpStream>, SignalError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(max_message_bytes);
    ws_config.max_frame_size = Some(max_message_bytes);

    let log_request = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        debug!(path = %request.uri(), "WebSocket upgrade");
        Ok(response)
    };

    Ok(accept_hdr_async_with_config(stream, log_request, Some(ws_config)).await?)
}

/// Pump one WebSocket connection until it closes
async fn run_session(
    ws_stream: WebSocketStream<TcpStream>,
    peer_addr: SocketAddr,
    hub: Arc<SignalHub>,
) -> Result<(), SignalError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let conn = ConnectionId::generate()?;
    debug!("New connection from {} as {}", peer_addr, conn);

    // Outbound frames are queued so that forwards from other connections
    // never wait on this socket
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = PeerHandle::new(conn.clone(), tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!(conn = %conn, "Dropping binary frame that is not UTF-8");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite itself
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn, error = %e, "WebSocket error");
                break;
            }
        };

        match Envelope::parse(&text) {
            Ok(envelope) => hub.handle(&handle, &envelope),
            Err(e) => warn!(conn = %conn, error = %e, "Dropping malformed envelope"),
        }
    }

    // Cleanup on disconnect
    hub.disconnect(&conn);
    drop(handle);
    let _ = writer.await;

    debug!("Connection closed: {}", conn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = SignalServer::new(SignalConfig::default());
        assert_eq!(server.peer_count(), 0);
        assert_eq!(server.hub().block_count(), 0);
    }
}
