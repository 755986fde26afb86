use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashSet;
use protocol::{Nid, Payload, RoutePacket};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

/// A request posted to the send thread's queue.
/// Folding connect/disconnect into the same queue as sends is what keeps
/// socket mutation confined to one thread.
pub enum SendOp {
    Send(Nid, RoutePacket),
    Connect(String),
    Disconnect(String),
}

/// Router-router mesh transport. Owns the single ZeroMQ `ROUTER` socket for
/// this node behind a `Mutex`, since `zmq::Socket` is not safe to use from
/// more than one thread without synchronization. Two dedicated background
/// threads share it: a receive thread that only ever polls and reads, and a
/// send thread that is the sole place connect/disconnect/send happen, woken
/// immediately by a blocking channel recv rather than waiting on the receive
/// thread's poll cycle — so an outbound packet never waits behind an idle
/// poll timeout.
pub struct MeshTransport {
    nid: Nid,
    outbound_tx: Option<std_mpsc::Sender<SendOp>>,
    running: Arc<AtomicBool>,
    recv_thread: Option<JoinHandle<()>>,
    send_thread: Option<JoinHandle<()>>,
}

const POLL_TIMEOUT_MS: i64 = 1000;

impl MeshTransport {
    /// Binds the ROUTER socket and spawns its two io threads. Every received
    /// [`RoutePacket`] is forwarded to `inbound_tx` for node dispatch.
    pub fn bind(
        nid: Nid,
        bind_endpoint: &str,
        inbound_tx: UnboundedSender<RoutePacket>,
    ) -> Result<Self, zmq::Error> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::ROUTER)?;
        socket.set_identity(&nid.as_identity_bytes())?;
        socket.set_router_handover(true)?;
        socket.set_router_mandatory(true)?;
        socket.set_tcp_keepalive(1)?;
        socket.set_linger(0)?;
        socket.bind(bind_endpoint)?;

        let socket = Arc::new(Mutex::new(socket));
        let (outbound_tx, outbound_rx) = std_mpsc::channel();
        let connected = Arc::new(DashSet::new());
        let running = Arc::new(AtomicBool::new(true));
        let self_nid = nid;

        let recv_thread = thread::Builder::new()
            .name(format!("mesh-recv-{self_nid}"))
            .spawn({
                let socket = socket.clone();
                let running = running.clone();
                move || Self::recv_loop(socket, inbound_tx, running)
            })
            .expect("failed to spawn mesh receive thread");

        let send_thread = thread::Builder::new()
            .name(format!("mesh-send-{self_nid}"))
            .spawn(move || Self::send_loop(socket, outbound_rx, connected))
            .expect("failed to spawn mesh send thread");

        Ok(Self {
            nid,
            outbound_tx: Some(outbound_tx),
            running,
            recv_thread: Some(recv_thread),
            send_thread: Some(send_thread),
        })
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    /// Enqueues a packet for delivery. Returns immediately; delivery is
    /// best-effort and failures are logged, not propagated.
    pub fn send(&self, target: Nid, packet: RoutePacket) {
        let sent = self
            .outbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(SendOp::Send(target, packet)).is_ok());
        if !sent {
            error!(%target, "mesh send queue closed, node is shutting down");
        }
    }

    /// Idempotent: duplicate calls for the same endpoint are no-ops, enforced
    /// on the send thread via its `connected` set.
    pub fn connect(&self, peer_endpoint: impl Into<String>) {
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(SendOp::Connect(peer_endpoint.into()));
        }
    }

    pub fn disconnect(&self, peer_endpoint: impl Into<String>) {
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(SendOp::Disconnect(peer_endpoint.into()));
        }
    }

    /// Only ever reads: polls the shared socket and, once the send thread's
    /// turn at the lock passes, receives whatever multipart message is
    /// waiting. Stops once `running` is cleared by `Drop`.
    fn recv_loop(socket: Arc<Mutex<zmq::Socket>>, inbound_tx: UnboundedSender<RoutePacket>, running: Arc<AtomicBool>) {
        while running.load(AtomicOrdering::Acquire) {
            let received = {
                let sock = socket.lock().unwrap();
                let mut items = [sock.as_poll_item(zmq::POLLIN)];
                if zmq::poll(&mut items, POLL_TIMEOUT_MS).is_ok() && items[0].is_readable() {
                    Some(sock.recv_multipart(0))
                } else {
                    None
                }
            };

            match received {
                Some(Ok(frames)) => Self::handle_inbound(frames, &inbound_tx),
                Some(Err(e)) => warn!(error = %e, "mesh recv failed"),
                None => {}
            }
        }
    }

    /// Only ever mutates: connect/disconnect/send all happen here, woken
    /// immediately by the blocking channel recv rather than sharing a cycle
    /// with the poll loop above. Exits once `outbound_tx` is dropped.
    fn send_loop(socket: Arc<Mutex<zmq::Socket>>, outbound_rx: std_mpsc::Receiver<SendOp>, connected: Arc<DashSet<String>>) {
        while let Ok(op) = outbound_rx.recv() {
            let sock = socket.lock().unwrap();
            match op {
                SendOp::Send(target, packet) => Self::handle_outbound_send(&sock, target, packet),
                SendOp::Connect(endpoint) => {
                    if connected.insert(endpoint.clone()) {
                        if let Err(e) = sock.connect(&endpoint) {
                            warn!(%endpoint, error = %e, "mesh connect failed");
                            connected.remove(&endpoint);
                        }
                    }
                }
                SendOp::Disconnect(endpoint) => {
                    if connected.remove(&endpoint).is_some() {
                        if let Err(e) = sock.disconnect(&endpoint) {
                            warn!(%endpoint, error = %e, "mesh disconnect failed");
                        }
                    }
                }
            }
        }
    }

    fn handle_inbound(frames: Vec<Vec<u8>>, inbound_tx: &UnboundedSender<RoutePacket>) {
        if frames.len() != 3 {
            warn!(frame_count = frames.len(), "dropping malformed mesh frame");
            return;
        }

        let sender_nid = match std::str::from_utf8(&frames[0]).ok().and_then(|s| s.parse::<Nid>().ok()) {
            Some(nid) => nid,
            None => {
                warn!("dropping mesh frame with unparsable sender identity");
                return;
            }
        };

        let mut route_header = match postcard::from_bytes::<protocol::RouteHeader>(&frames[1]) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "dropping mesh frame with malformed header");
                return;
            }
        };
        route_header.stamp_sender(sender_nid);

        let payload = if frames[2].is_empty() {
            Payload::Empty
        } else {
            Payload::from_bytes(frames[2].clone())
        };

        if inbound_tx.send(RoutePacket { route_header, payload }).is_err() {
            warn!("mesh inbound channel closed, dropping received packet");
        }
    }

    fn handle_outbound_send(socket: &zmq::Socket, target: Nid, packet: RoutePacket) {
        let header_bytes = match postcard::to_stdvec(&packet.route_header) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%target, error = %e, "failed to encode outgoing route header");
                return;
            }
        };

        let frames: [&[u8]; 3] = [
            &target.as_identity_bytes(),
            &header_bytes,
            packet.payload.as_slice(),
        ];

        if let Err(e) = socket.send_multipart(frames, 0) {
            warn!(
                %target,
                msg_id = packet.route_header.msg_id(),
                error = %e,
                "mesh send failed"
            );
        }
    }
}

impl Drop for MeshTransport {
    fn drop(&mut self) {
        // Drop the sender first so the send thread's blocking recv observes
        // Disconnected and exits; clear `running` so the receive thread's
        // next poll timeout falls through and exits too. Only then join both.
        self.outbound_tx.take();
        self.running.store(false, AtomicOrdering::Release);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.send_thread.take() {
            let _ = handle.join();
        }
    }
}

pub const fn default_poll_timeout() -> Duration {
    Duration::from_millis(POLL_TIMEOUT_MS as u64)
}
