//! Correlation layer matching replies to outstanding requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use protocol::{ErrorCode, MsgSeqAllocator, RoutePacket};
use tokio::sync::oneshot;
use tracing::warn;

/// Outcome handed to whoever is awaiting a request.
#[derive(Debug)]
pub enum ReplyOutcome {
    Packet(RoutePacket),
    Error(ErrorCode),
}

struct PendingReply {
    deadline: Instant,
    completion: oneshot::Sender<ReplyOutcome>,
}

/// Maps `msgSeq -> PendingReply` and sweeps expired entries. One instance
/// per node, shared by every sender.
pub struct RequestCache {
    seq: MsgSeqAllocator,
    pending: DashMap<u16, PendingReply>,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCache {
    pub fn new() -> Self {
        Self {
            seq: MsgSeqAllocator::new(),
            pending: DashMap::new(),
        }
    }

    pub fn next_sequence(&self) -> u16 {
        self.seq.next()
    }

    /// Registers a pending reply, returning the receiver half the caller awaits.
    pub fn put(&self, seq: u16, timeout: Duration) -> oneshot::Receiver<ReplyOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingReply {
                deadline: Instant::now() + timeout,
                completion: tx,
            },
        );
        rx
    }

    /// Completes the pending reply for `packet`'s `msgSeq`, if any. Logs and
    /// drops the packet otherwise — an unmatched reply is not fatal.
    pub fn on_reply(&self, packet: RoutePacket) {
        let seq = packet.route_header.msg_seq();
        match self.pending.remove(&seq) {
            Some((_, pending)) => {
                let _ = pending.completion.send(ReplyOutcome::Packet(packet));
            }
            None => {
                warn!(
                    msg_seq = seq,
                    msg_id = packet.route_header.msg_id(),
                    from = %packet.route_header.from,
                    "reply with no matching pending request"
                );
            }
        }
    }

    /// Sweeps expired entries, resolving each with a `RequestTimeout` outcome.
    /// Intended to run on a periodic background task (default every 1s).
    pub fn check_expire(&self) {
        let now = Instant::now();
        let expired: Vec<u16> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        for seq in expired {
            if let Some((_, pending)) = self.pending.remove(&seq) {
                let _ = pending.completion.send(ReplyOutcome::Error(ErrorCode::RequestTimeout));
            }
        }
    }

    /// Fails every outstanding request with `ShuttingDown` — called once
    /// during node shutdown.
    pub fn fail_all_shutting_down(&self) {
        let seqs: Vec<u16> = self.pending.iter().map(|e| *e.key()).collect();
        for seq in seqs {
            if let Some((_, pending)) = self.pending.remove(&seq) {
                let _ = pending.completion.send(ReplyOutcome::Error(ErrorCode::ShuttingDown));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Spawns the background sweep task. Returns a
/// handle the caller can abort on shutdown.
pub fn spawn_expiry_sweeper(cache: Arc<RequestCache>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            cache.check_expire();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Header, Nid, Payload, RouteHeader};

    fn sample_packet(seq: u16) -> RoutePacket {
        let mut header = Header::new(1, "Echo", 0);
        header.msg_seq = seq;
        RoutePacket {
            route_header: RouteHeader {
                header,
                from: Nid::new(1, 1),
                sid: 0,
                account_id: String::new(),
                is_system: false,
                is_base: false,
                is_backend: true,
                is_reply: true,
                is_to_client: false,
            },
            payload: Payload::Empty,
        }
    }

    #[tokio::test]
    async fn reply_completes_pending_request() {
        let cache = RequestCache::new();
        let seq = cache.next_sequence();
        let rx = cache.put(seq, Duration::from_secs(5));
        cache.on_reply(sample_packet(seq));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::Packet(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn expiry_resolves_with_timeout() {
        let cache = RequestCache::new();
        let seq = cache.next_sequence();
        let rx = cache.put(seq, Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.check_expire();
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::Error(ErrorCode::RequestTimeout)));
    }

    #[test]
    fn sequence_never_yields_zero() {
        let cache = RequestCache::new();
        for _ in 0..70_000 {
            assert_ne!(cache.next_sequence(), 0);
        }
    }
}
