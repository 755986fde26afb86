//! Local cache of peer [`ServerInfo`]. Writers replace an
//! immutable snapshot under a lock; readers clone an `Arc` and never block
//! a writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use protocol::{ErrorCode, Nid, PlayHouseError, ServerInfo, ServerState};
use tokio::sync::RwLock;

pub struct ServerInfoCenter {
    snapshot: RwLock<Arc<Vec<ServerInfo>>>,
    round_robin: DashMap<u32, AtomicUsize>,
    stale_after_millis: i64,
}

impl ServerInfoCenter {
    pub fn new(stale_after_millis: i64) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
            round_robin: DashMap::new(),
            stale_after_millis,
        }
    }

    pub async fn snapshot(&self) -> Arc<Vec<ServerInfo>> {
        self.snapshot.read().await.clone()
    }

    /// Merges a freshly-fetched registry snapshot:
    /// endpoint changes disable the stale entry, and entries older than the
    /// staleness bound are marked `Disable`. Returns the peers whose state
    /// transitioned into/out of `Running`, so the caller can connect/disconnect.
    pub async fn merge(&self, fetched: Vec<ServerInfo>, now_millis: i64) -> MergeResult {
        let mut guard = self.snapshot.write().await;
        let previous: &Vec<ServerInfo> = &guard;

        let mut merged: Vec<ServerInfo> = Vec::with_capacity(fetched.len());
        let mut newly_running = Vec::new();
        let mut newly_disabled = Vec::new();

        for mut info in fetched {
            let prior = previous.iter().find(|p| p.nid == info.nid);
            let endpoint_changed = prior
                .map(|p| p.bind_endpoint != info.bind_endpoint)
                .unwrap_or(false);
            let was_running = prior.map(|p| p.is_routable()).unwrap_or(false);

            if now_millis - info.last_update_millis > self.stale_after_millis {
                info.state = ServerState::Disable;
            }

            if endpoint_changed && was_running {
                if let Some(p) = prior {
                    let mut disabled = p.clone();
                    disabled.state = ServerState::Disable;
                    newly_disabled.push(disabled);
                }
            }

            let now_running = info.is_routable();
            if now_running && !was_running {
                newly_running.push(info.clone());
            } else if !now_running && was_running {
                newly_disabled.push(info.clone());
            }

            merged.push(info);
        }

        *guard = Arc::new(merged);

        MergeResult {
            newly_running,
            newly_disabled,
        }
    }

    pub async fn get_by_nid(&self, nid: Nid) -> Option<ServerInfo> {
        self.snapshot.read().await.iter().find(|s| s.nid == nid).cloned()
    }

    /// Round-robin lookup over `Running` peers with the given `serviceId`.
    pub async fn get_by_service_id(&self, service_id: u32) -> Result<ServerInfo, PlayHouseError> {
        let snapshot = self.snapshot.read().await;
        let candidates: Vec<&ServerInfo> = snapshot
            .iter()
            .filter(|s| s.service_id == service_id && s.is_routable())
            .collect();

        if candidates.is_empty() {
            return Err(PlayHouseError::Remote(ErrorCode::NoServer));
        }

        let counter = self
            .round_robin
            .entry(service_id)
            .or_insert_with(|| AtomicUsize::new(0));
        let index = counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[index].clone())
    }

    pub async fn get_servers(&self) -> Arc<Vec<ServerInfo>> {
        self.snapshot().await
    }
}

pub struct MergeResult {
    pub newly_running: Vec<ServerInfo>,
    pub newly_disabled: Vec<ServerInfo>,
}
