//! WebSocket session: the reactor side of one connection, from upgrade
//! through close.
//!
//! This task only moves frames. Socket events are handed to the
//! [`Connection`], which queues them on its worker lane, so the reader
//! never waits on user code.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, instrument};

use crate::connection::Connection;
use crate::request::HandshakeRequest;
use crate::server::CableServer;
use crate::socket::ClientSocket;

/// Run a WebSocket session for a connected client.
///
/// 1. Binds a [`Connection`] to the socket and queues `on_open`
/// 2. Queues `on_message` for every text (or UTF-8 binary) frame
/// 3. Forwards outbound frames until the socket closes
/// 4. Queues `on_close` and waits for it to finish
#[instrument(skip_all, fields(path = %request.path))]
pub async fn run_session(ws: WebSocket, server: Arc<CableServer>, request: HandshakeRequest) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (socket, mut outbound) = ClientSocket::pair(server.config().outbound_buffer_size);
    let connection = Connection::new(server.clone(), socket.clone(), request);

    // Drain queued frames before honouring a close.
    let writer_socket = socket.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = outbound.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(String::from(text.as_str()).into())).await.is_err() {
                        writer_socket.close();
                        break;
                    }
                }
                () = writer_socket.closed().wait() => break,
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        let _ = ws_tx.close().await;
    });

    let _ = connection.on_open();

    let shutdown = server.shutdown_token();
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = connection.on_message(text.to_string());
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        let _ = connection.on_message(text.to_owned());
                    }
                    Err(_) => debug!(len = data.len(), "received non-UTF8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("client closed the socket");
                    break;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break;
                }
            },
            () = socket.closed().wait() => break,
            () = shutdown.cancelled() => {
                info!("closing socket for shutdown");
                break;
            }
        }
    }

    socket.close();
    let _ = connection.on_close().wait().await;
    let _ = writer.await;
    if socket.drop_count() > 0 {
        info!(dropped = socket.drop_count(), "outbound frames dropped during session");
    }
}
