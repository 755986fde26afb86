//! WebSocket client framing: one `Message::Binary` per [`ClientPacket::encode`]
//! body — the socket already frames messages, so no extra length prefix is
//! needed. Paired send/receive tasks and the abort-the-loser join mirror this
//! stack's existing websocket relay loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::client_packet::MSG_HEARTBEAT;
use protocol::{AccountId, ClientPacket, Nid, SessionId};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::ClientEdge;

/// Accepts an upgraded websocket and runs it to completion.
pub async fn handle_connection(edge: Arc<ClientEdge>, socket: WebSocket, session_nid: Nid) {
    let (sink, stream) = socket.split();
    let (sid, outbound_rx) = edge.open_session();

    let mut send_task = tokio::spawn(send_loop(sink, outbound_rx));
    let mut receive_task = tokio::spawn(receive_loop(edge.clone(), stream, session_nid, sid));

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    info!(sid, "websocket client session closed");
}

async fn send_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound_rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = outbound_rx.recv().await {
        if sink.send(Message::Binary(frame)).await.is_err() {
            warn!("websocket send failed, closing session");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn receive_loop(edge: Arc<ClientEdge>, mut stream: SplitStream<WebSocket>, session_nid: Nid, sid: SessionId) {
    let mut binding: Option<(AccountId, i64)> = None;
    let idle_timeout = edge.config().idle_timeout;
    let heart_beat_interval = edge.config().heart_beat_interval;

    loop {
        let read_timeout = if binding.is_some() { idle_timeout } else { heart_beat_interval };
        let message = match tokio::time::timeout(read_timeout, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                warn!(sid, error = %e, "websocket read failed, closing session");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(sid, timeout = ?read_timeout, "websocket session idle timeout");
                break;
            }
        };

        let bytes = match message {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => continue,
        };

        let packet = match ClientPacket::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(sid, error = %e, "malformed client packet, closing session");
                break;
            }
        };

        if packet.msg_id == MSG_HEARTBEAT {
            // Echoed here without ever touching a Stage.
            if let Some(reply) = super::heartbeat_reply(packet.msg_seq) {
                edge.sessions.deliver(sid, reply);
            }
            continue;
        }

        match &binding {
            None => {
                if packet.msg_id != edge.config().authenticate_msg_id {
                    warn!(sid, msg_id = %packet.msg_id, "frame before authentication, closing session");
                    break;
                }
                match edge.authenticate(&packet, session_nid, sid).await {
                    Ok(account_id) => binding = Some((account_id, packet.stage_id)),
                    Err(code) => {
                        warn!(sid, ?code, "authentication failed, closing session");
                        break;
                    }
                }
            }
            Some((account_id, _)) => edge.dispatch_frame(packet, account_id, sid),
        }
    }

    edge.close_session(sid, binding);
}
