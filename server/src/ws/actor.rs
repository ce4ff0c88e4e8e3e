use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::router::Session;
use crate::config::Heartbeat;
use crate::state::AppState;
use crate::ws::{ConnectionId, ConnectionSender};

/// Close code sent when a client stops answering pings ("going away").
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run the actor-per-connection pattern for an upgraded WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes incoming frames in order and hands them to the router
///
/// The mpsc channel lets the router and broadcasts queue frames for this client
/// without ever awaiting its socket. Cleanup is tied to the router [`Session`]:
/// it runs exactly once when the session is closed or dropped.
pub async fn run_connection(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let connection_id = ConnectionId::next();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection before anything can be broadcast to it
    state.connections.insert(connection_id, tx.clone());

    let mut session = Session::new(&state, connection_id, &tx);
    session.open();

    tracing::info!(
        connection_id = %connection_id,
        peer = %peer,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task when the heartbeat is enabled
    let ping_handle = state
        .heartbeat
        .map(|heartbeat| tokio::spawn(ping_task(tx.clone(), pong_rx, heartbeat)));

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut writer_handle => {
                tracing::debug!(connection_id = %connection_id, "Writer task finished");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    session.handle_text(text.as_str());
                }
                Message::Binary(data) => {
                    session.handle_binary(&data);
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended, client disconnected
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    if let Some(handle) = ping_handle {
        handle.abort();
    }

    let name = session.status.name().map(str::to_string);
    session.close();

    tracing::info!(
        connection_id = %connection_id,
        name = ?name,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Stops after a failed send or after forwarding a close frame.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Ping task: sends periodic pings and closes the connection if a pong
/// does not arrive within the timeout.
async fn ping_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    heartbeat: Heartbeat,
) {
    let mut ping_timer = interval(heartbeat.interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Pongs answering earlier pings don't count for this round
        while pong_rx.try_recv().is_ok() {}

        if tx.send(Message::Ping(b"relay".to_vec().into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(heartbeat.timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
