//! TCP client framing: a `u32` little-endian length prefix in front of each
//! [`ClientPacket::encode`] body. There's no `tokio-util` length-delimited
//! codec in this stack, so framing is read/written by hand, the same way the
//! rest of this crate builds its byte layouts directly on `bytes`.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use protocol::client_packet::MSG_HEARTBEAT;
use protocol::{AccountId, ClientPacket, Nid, SessionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{reject_oversized, ClientEdge};

const LENGTH_PREFIX_BYTES: usize = 4;

/// Accepts one already-connected socket and runs it to completion. Mirrors
/// the paired-task, abort-the-loser shape the websocket side uses: one task
/// owns the write half for the session's lifetime, one drains the read half,
/// and whichever finishes first aborts the other.
pub async fn handle_connection(edge: Arc<ClientEdge>, stream: TcpStream, session_nid: Nid) {
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let (sid, outbound_rx) = edge.open_session();

    let mut write_task = tokio::spawn(write_loop(write_half, outbound_rx));
    let mut read_task = tokio::spawn(read_loop(edge.clone(), read_half, session_nid, sid));

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    info!(sid, ?peer, "tcp client session closed");
}

async fn write_loop(mut write_half: tokio::net::tcp::OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = outbound_rx.recv().await {
        let mut prefixed = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + frame.len());
        prefixed.put_u32_le(frame.len() as u32);
        prefixed.put_slice(&frame);
        if let Err(e) = write_half.write_all(&prefixed).await {
            warn!(error = %e, "tcp write failed, closing session");
            return;
        }
    }
}

async fn read_loop(edge: Arc<ClientEdge>, mut read_half: tokio::net::tcp::OwnedReadHalf, session_nid: Nid, sid: SessionId) {
    let mut binding: Option<(AccountId, i64)> = None;
    let idle_timeout = edge.config().idle_timeout;
    let heart_beat_interval = edge.config().heart_beat_interval;

    loop {
        let read_timeout = if binding.is_some() { idle_timeout } else { heart_beat_interval };
        let frame = match tokio::time::timeout(read_timeout, read_frame(&mut read_half)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                warn!(sid, error = %e, "malformed tcp client frame, closing session");
                break;
            }
            Err(_) => {
                warn!(sid, timeout = ?read_timeout, "tcp session idle timeout");
                break;
            }
        };

        let packet = match ClientPacket::decode(frame) {
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

/// Reads one length-prefixed frame body, or `None` on clean EOF before any
/// bytes of a new frame arrive.
async fn read_frame(read_half: &mut tokio::net::tcp::OwnedReadHalf) -> std::io::Result<Option<Bytes>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_BYTES];
    match read_half.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = (&len_buf[..]).get_u32_le() as usize;
    if reject_oversized(len).is_err() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame exceeds max body size"));
    }

    let mut body = BytesMut::zeroed(len);
    read_half.read_exact(&mut body).await?;
    Ok(Some(body.freeze()))
}

/// Listens on `bind_addr`, handing each accepted connection to
/// [`handle_connection`] on its own task.
pub async fn serve(edge: Arc<ClientEdge>, bind_addr: &str, session_nid: Nid) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind_addr, "tcp client edge listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, ?peer, "failed to set TCP_NODELAY");
        }
        let edge = edge.clone();
        tokio::spawn(async move { handle_connection(edge, stream, session_nid).await });
    }
}
