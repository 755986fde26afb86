//! Shared infra behind every sender façade, and the scoped "current header"
//! that must stay task-local rather than a process global so concurrent
//! Stage turns never see each other's request context.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use protocol::{Nid, PlayHouseError, RouteHeader, RoutePacket};
use tracing::warn;

use crate::mesh::MeshTransport;
use crate::request_cache::{ReplyOutcome, RequestCache};

tokio::task_local! {
    pub static CURRENT_HEADER: RefCell<Option<RouteHeader>>;
}

/// Runs `fut` with `header` installed as the current-execution-context header.
/// The Stage loop scopes this once per turn; the API dispatcher
/// scopes it once per handler invocation.
pub async fn with_current_header<F, T>(header: RouteHeader, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_HEADER
        .scope(RefCell::new(Some(header)), fut)
        .await
}

/// Infra every sender façade is layered on: mesh transport + correlation
/// layer, plus the identity/timeout values needed to build outgoing headers.
pub struct SenderCore {
    pub self_nid: Nid,
    pub service_id: u32,
    pub transport: Arc<MeshTransport>,
    pub request_cache: Arc<RequestCache>,
    request_timeout: Duration,
}

impl SenderCore {
    pub fn new(
        self_nid: Nid,
        service_id: u32,
        transport: Arc<MeshTransport>,
        request_cache: Arc<RequestCache>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            self_nid,
            service_id,
            transport,
            request_cache,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Reads the header of the packet currently being handled in this
    /// execution context, if any.
    pub fn current_header(&self) -> Option<RouteHeader> {
        CURRENT_HEADER
            .try_with(|cell| cell.borrow().clone())
            .unwrap_or(None)
    }

    pub fn fire_and_forget(&self, target: Nid, packet: RoutePacket) {
        self.transport.send(target, packet);
    }

    /// Allocates a `msgSeq`, registers it with the request cache, sends the
    /// packet, and awaits the correlated reply or its expiry.
    pub async fn request(&self, target: Nid, mut packet: RoutePacket) -> Result<RoutePacket, PlayHouseError> {
        let seq = self.request_cache.next_sequence();
        packet.route_header.header.msg_seq = seq;
        let rx = self.request_cache.put(seq, self.request_timeout);
        self.transport.send(target, packet);

        match rx.await {
            Ok(ReplyOutcome::Packet(reply)) => Ok(reply),
            Ok(ReplyOutcome::Error(code)) => Err(PlayHouseError::Remote(code)),
            Err(_) => {
                warn!("pending reply sender dropped without completion");
                Err(PlayHouseError::ShuttingDown)
            }
        }
    }
}
