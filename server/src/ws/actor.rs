use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ConnectionHandle, ConnectionOutlet, ConnectionState};

/// Keepalive timing for live sockets.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    /// How often the server pings an idle client.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered before the socket is closed.
    pub pong_timeout: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Run one authenticated WebSocket until it closes.
///
/// Splits the socket into a writer task that owns the sink and drains the
/// connection's bounded outbound queue, a ping task, and the reader loop below.
/// Whichever side notices the connection is gone (client close, read error,
/// failed write, missed pong, or a hub-initiated close) ends the reader loop,
/// which then unregisters the connection.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let settings = state.hub.settings();
    let (conn, outlet) = ConnectionHandle::new(&user_id, settings.outbound_queue);
    let ConnectionOutlet { rx, mut closed } = outlet;
    let (ws_sender, mut ws_receiver) = socket.split();

    let writer_handle = tokio::spawn(writer_task(
        ws_sender,
        rx,
        closed.clone(),
        conn.clone(),
        settings.write_timeout,
    ));

    state.hub.register(&conn).await;
    if conn.state() != ConnectionState::Registered {
        // Hub is shutting down; the writer sends the close frame
        let _ = timeout(settings.write_timeout, writer_handle).await;
        return;
    }

    tracing::info!(
        user_id = %user_id,
        conn_id = conn.id(),
        "WebSocket actor started"
    );

    // Each pong bumps the watch version; only the latest one matters
    let (pong_tx, pong_rx) = watch::channel(());
    let ping_handle = tokio::spawn(ping_task(
        conn.clone(),
        state.keepalive,
        settings.write_timeout,
        pong_rx,
    ));

    loop {
        tokio::select! {
            _ = close_requested(&mut closed) => {
                tracing::debug!(user_id = %user_id, conn_id = conn.id(), "Close requested");
                break;
            }
            next = ws_receiver.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    protocol::handle_text_frame(text.as_str(), &conn);
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(
                        user_id = %user_id,
                        len = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_tx.send_replace(());
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the control-frame pong itself
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    tracing::info!(user_id = %user_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    ping_handle.abort();
    state.hub.unregister(&conn).await;

    // Let the writer flush its close frame
    if timeout(settings.write_timeout, writer_handle).await.is_err() {
        tracing::debug!(conn_id = conn.id(), "Writer did not finish in time");
    }

    tracing::info!(
        user_id = %user_id,
        conn_id = conn.id(),
        "WebSocket actor stopped"
    );
}

async fn close_requested(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|closed| *closed).await.is_err() {
        // Every handle dropped: nothing can request a close any more
        std::future::pending::<()>().await;
    }
}

/// Owns the sink. Every write is bounded by `write_timeout`; a slow or broken
/// socket requests a close of its own connection.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    mut closed: watch::Receiver<bool>,
    conn: ConnectionHandle,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = close_requested(&mut closed) => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: "".into(),
                };
                let _ = timeout(write_timeout, ws_sender.send(Message::Close(Some(frame)))).await;
                break;
            }
            next = rx.recv() => {
                let Some(msg) = next else { break };
                match timeout(write_timeout, ws_sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(conn_id = conn.id(), error = %e, "Socket write failed");
                        conn.close();
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(conn_id = conn.id(), "Socket write timed out");
                        conn.close();
                        break;
                    }
                }
            }
        }
    }
}

/// Sends periodic pings and closes the connection when a pong is missed.
async fn ping_task(
    conn: ConnectionHandle,
    keepalive: KeepAlive,
    write_timeout: Duration,
    mut pong_rx: watch::Receiver<()>,
) {
    let mut ping_timer = interval(keepalive.ping_interval);
    // First tick completes immediately
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Pongs received before this ping do not answer it
        pong_rx.borrow_and_update();

        if let Err(e) = conn
            .send_timeout(Message::Ping(Bytes::from_static(b"keepalive")), write_timeout)
            .await
        {
            tracing::debug!(conn_id = conn.id(), error = %e, "Could not queue ping");
            conn.close();
            break;
        }

        match timeout(keepalive.pong_timeout, pong_rx.changed()).await {
            Ok(Ok(())) => {}
            _ => {
                tracing::warn!(
                    user_id = %conn.user_id(),
                    conn_id = conn.id(),
                    "Pong timeout, closing connection"
                );
                conn.close();
                break;
            }
        }
    }
}
