//! Wires an API node's pieces together and runs it to completion. An Api node has no client edge of its
//! own; it only ever receives backend traffic over the mesh.

use std::sync::Arc;

use protocol::{Nid, ServiceType};
use tokio::sync::mpsc;
use tracing::info;

use crate::api::{ApiDispatcher, IApiController};
use crate::discovery::{AtomicNodeStatus, InMemoryRegistry, MeshManager, Registry, ServerInfoCenter};
use crate::mesh::MeshTransport;
use crate::node_dispatch::{NodeDispatch, NodeRole};
use crate::request_cache::{spawn_expiry_sweeper, RequestCache};
use crate::system::SystemDispatcher;

use super::options::NodeOptions;

pub struct ApiNode {
    pub self_nid: Nid,
    pub dispatcher: Arc<ApiDispatcher>,
    pub system: Arc<SystemDispatcher>,
    pub mesh_manager: Arc<MeshManager>,
    pub request_cache: Arc<RequestCache>,
    status: Arc<AtomicNodeStatus>,
    transport: Arc<MeshTransport>,
}

impl ApiNode {
    pub fn bootstrap(options: &NodeOptions, registry: Arc<dyn Registry>, controller: &dyn IApiController) -> Self {
        let self_nid = options.self_nid();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(
            MeshTransport::bind(self_nid, &options.bind_endpoint, inbound_tx)
                .expect("failed to bind mesh transport"),
        );

        let request_cache = Arc::new(RequestCache::new());
        spawn_expiry_sweeper(request_cache.clone(), options.request_timeout());

        let server_info_center = Arc::new(ServerInfoCenter::new(options.server_stale_ms));

        let mut dispatcher = ApiDispatcher::new(
            self_nid,
            options.service_id,
            transport.clone(),
            request_cache.clone(),
            options.request_timeout(),
            server_info_center.clone(),
        );
        controller.handles(&mut dispatcher);
        let dispatcher = Arc::new(dispatcher);

        let system = Arc::new(SystemDispatcher::new(self_nid, options.service_id, transport.clone()));

        let status: Arc<AtomicNodeStatus> = Arc::new(AtomicNodeStatus::default());
        let mesh_manager = Arc::new(MeshManager::new(
            self_nid,
            options.service_id,
            ServiceType::Api,
            options.bind_endpoint.clone(),
            registry,
            server_info_center,
            transport.clone(),
            status.clone(),
        ));

        let node = Self {
            self_nid,
            dispatcher,
            system,
            mesh_manager,
            request_cache,
            status,
            transport,
        };

        let dispatch = Arc::new(NodeDispatch::new(
            node.request_cache.clone(),
            node.system.clone(),
            None,
            NodeRole::Api(node.dispatcher.clone()),
        ));
        tokio::spawn(dispatch.run(inbound_rx));

        node
    }

    /// Self-connects the mesh transport and starts the discovery loop. Api
    /// nodes carry a constant actor count of zero; they have no Stages to
    /// report, so there's nothing to sync into `status` beyond its default.
    pub async fn run(self: Arc<Self>, options: &NodeOptions) {
        self.mesh_manager.clone().spawn(options.discovery_period());
        info!(nid = %self.self_nid, "api node running");
        std::future::pending::<()>().await;
    }
}

pub fn in_memory_registry() -> Arc<InMemoryRegistry> {
    Arc::new(InMemoryRegistry::new())
}
