//! Host-provided registry contract. The host supplies an
//! implementation backed by Redis, Consul, etcd, or (as here, for tests and
//! single-process demos) an in-memory store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use protocol::ServerInfo;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `UpdateServerInfoAsync`: called ~every `discoveryPeriodMs` by the mesh
/// manager with this node's freshened `ServerInfo`; returns the authoritative
/// peer snapshot known to the registry.
pub trait Registry: Send + Sync {
    fn update<'a>(&'a self, self_info: ServerInfo) -> BoxFuture<'a, Vec<ServerInfo>>;
}

/// A registry with no external store: every node sharing one `Arc<InMemoryRegistry>`
/// sees every other node's last-reported info. Used by scenario tests and stands in for Redis/Consul/etcd in single-process demos.
#[derive(Default)]
pub struct InMemoryRegistry {
    known: Mutex<Vec<ServerInfo>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for InMemoryRegistry {
    fn update<'a>(&'a self, self_info: ServerInfo) -> BoxFuture<'a, Vec<ServerInfo>> {
        Box::pin(async move {
            let mut known = self.known.lock().expect("registry mutex poisoned");
            known.retain(|s| s.nid != self_info.nid);
            known.push(self_info);
            known.clone()
        })
    }
}
