//! Polls the registry and drives `Transport.connect`/`disconnect` off the
//! resulting state transitions.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use protocol::{Nid, ServerInfo, ServerState, ServiceType};
use tracing::{debug, info};

use crate::discovery::registry::Registry;
use crate::discovery::server_info_center::ServerInfoCenter;
use crate::mesh::MeshTransport;

/// Supplies live counters the mesh manager stamps onto `self` before every
/// registry call.
pub trait NodeStatusSource: Send + Sync {
    fn actor_count(&self) -> u32;
    fn state(&self) -> ServerState;
}

pub struct MeshManager {
    self_nid: Nid,
    service_id: u32,
    service_type: ServiceType,
    bind_endpoint: String,
    registry: Arc<dyn Registry>,
    center: Arc<ServerInfoCenter>,
    transport: Arc<MeshTransport>,
    status: Arc<dyn NodeStatusSource>,
    epoch: std::time::Instant,
    epoch_millis: i64,
}

impl MeshManager {
    pub fn new(
        self_nid: Nid,
        service_id: u32,
        service_type: ServiceType,
        bind_endpoint: String,
        registry: Arc<dyn Registry>,
        center: Arc<ServerInfoCenter>,
        transport: Arc<MeshTransport>,
        status: Arc<dyn NodeStatusSource>,
    ) -> Self {
        Self {
            self_nid,
            service_id,
            service_type,
            bind_endpoint,
            registry,
            center,
            transport,
            status,
            epoch: std::time::Instant::now(),
            epoch_millis: 0,
        }
    }

    fn now_millis(&self) -> i64 {
        self.epoch_millis + self.epoch.elapsed().as_millis() as i64
    }

    /// Connects to ourselves so local targeting shares the remote code path
    /// instead of a separate local-delivery special case.
    pub fn self_connect(&self) {
        self.transport.connect(self.bind_endpoint.clone());
    }

    /// Runs one discovery tick: compose self info, call the registry, merge,
    /// then connect/disconnect peers whose state changed.
    pub async fn tick(&self) {
        let self_info = ServerInfo {
            bind_endpoint: self.bind_endpoint.clone(),
            nid: self.self_nid,
            service_id: self.service_id,
            service_type: self.service_type,
            state: self.status.state(),
            actor_count: self.status.actor_count(),
            last_update_millis: self.now_millis(),
        };

        let fetched = self.registry.update(self_info).await;
        let result = self.center.merge(fetched, self.now_millis()).await;

        for peer in result.newly_running {
            if peer.nid == self.self_nid {
                continue;
            }
            debug!(%peer.nid, endpoint = %peer.bind_endpoint, "connecting to newly running peer");
            self.transport.connect(peer.bind_endpoint);
        }

        for peer in result.newly_disabled {
            info!(%peer.nid, endpoint = %peer.bind_endpoint, "disconnecting disabled peer");
            self.transport.disconnect(peer.bind_endpoint);
        }
    }

    /// Forces an immediate discovery tick instead of waiting for the next
    /// `discoveryPeriodMs` interval. Named for admin tooling and tests that
    /// want up-to-date peer state without sleeping, the same shape as
    /// `lobby::reload_config`'s on-demand reload.
    pub async fn refresh_now(&self) {
        self.tick().await;
    }

    /// Spawns the periodic poll loop (default every 3s, configurable via `discoveryPeriodMs`).
    pub fn spawn(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        self.self_connect();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}

/// A `NodeStatusSource` the node wires in directly: `actor_count` reflects the
/// live `PlayDispatcher`/`ApiDispatcher` state; `state` starts `Running` and
/// can be paused administratively.
pub struct AtomicNodeStatus {
    actor_count: AtomicI64,
    state: std::sync::RwLock<ServerState>,
}

impl Default for AtomicNodeStatus {
    fn default() -> Self {
        Self {
            actor_count: AtomicI64::new(0),
            state: std::sync::RwLock::new(ServerState::Running),
        }
    }
}

impl AtomicNodeStatus {
    pub fn set_actor_count(&self, count: u32) {
        self.actor_count.store(count as i64, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: ServerState) {
        *self.state.write().expect("status lock poisoned") = state;
    }
}

impl NodeStatusSource for AtomicNodeStatus {
    fn actor_count(&self) -> u32 {
        self.actor_count.load(Ordering::Relaxed) as u32
    }

    fn state(&self) -> ServerState {
        *self.state.read().expect("status lock poisoned")
    }
}
