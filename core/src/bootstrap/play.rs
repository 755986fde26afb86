//! Wires a Play node's pieces together and runs it to completion. Construction order follows the
//! dependency chain: transport, then discovery, then the
//! dispatcher that owns Stages, then the client-facing listeners.

use std::sync::Arc;

use protocol::{Nid, ServiceType};
use tokio::sync::mpsc;
use tracing::info;

use crate::client_edge::{ClientEdge, ClientEdgeConfig};
use crate::discovery::{AtomicNodeStatus, InMemoryRegistry, MeshManager, Registry, ServerInfoCenter};
use crate::mesh::MeshTransport;
use crate::node_dispatch::{NodeDispatch, NodeRole};
use crate::request_cache::{spawn_expiry_sweeper, RequestCache};
use crate::stage::actor::{ActorFactory, StageFactory};
use crate::stage::PlayDispatcher;
use crate::system::panel::{ISystemPanel, PlaySystemPanel};
use crate::system::SystemDispatcher;

use super::options::NodeOptions;

/// Everything a running Play node owns. Dropping this drops the mesh
/// transport's io thread and every background task spawned under [`run`].
pub struct PlayNode {
    pub self_nid: Nid,
    pub dispatcher: Arc<PlayDispatcher>,
    pub system: Arc<SystemDispatcher>,
    pub client_edge: Arc<ClientEdge>,
    pub mesh_manager: Arc<MeshManager>,
    pub request_cache: Arc<RequestCache>,
    pub panel: Arc<dyn ISystemPanel>,
    status: Arc<AtomicNodeStatus>,
    transport: Arc<MeshTransport>,
}

impl PlayNode {
    /// Builds every component but does not yet run discovery ticks or accept
    /// client connections; callers register stage types against
    /// `dispatcher` before calling [`PlayNode::run`].
    pub fn bootstrap(options: &NodeOptions, registry: Arc<dyn Registry>) -> Self {
        let self_nid = options.self_nid();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(
            MeshTransport::bind(self_nid, &options.bind_endpoint, inbound_tx)
                .expect("failed to bind mesh transport"),
        );

        let request_cache = Arc::new(RequestCache::new());
        spawn_expiry_sweeper(request_cache.clone(), options.request_timeout());

        let dispatcher = Arc::new(PlayDispatcher::new(
            self_nid,
            options.service_id,
            transport.clone(),
            request_cache.clone(),
            options.request_timeout(),
            options.io_concurrency,
        ));

        let system = Arc::new(SystemDispatcher::new(self_nid, options.service_id, transport.clone()));

        let client_edge = ClientEdge::new(
            ClientEdgeConfig {
                service_id: options.service_id,
                self_nid,
                authenticate_msg_id: options.authenticate_msg_id.clone(),
                idle_timeout: options.idle_timeout(),
                heart_beat_interval: options.heart_beat_interval(),
                request_timeout: options.request_timeout(),
                outbound_channel_depth: options.send_high_watermark,
            },
            transport.clone(),
            request_cache.clone(),
        );

        let server_info_center = Arc::new(ServerInfoCenter::new(options.server_stale_ms));
        let status: Arc<AtomicNodeStatus> = Arc::new(AtomicNodeStatus::default());
        let mesh_manager = Arc::new(MeshManager::new(
            self_nid,
            options.service_id,
            ServiceType::Play,
            options.bind_endpoint.clone(),
            registry,
            server_info_center.clone(),
            transport.clone(),
            status.clone(),
        ));

        let panel: Arc<dyn ISystemPanel> = Arc::new(PlaySystemPanel::new(
            self_nid,
            dispatcher.clone(),
            Some(client_edge.sessions.clone()),
            server_info_center,
        ));

        let node = Self {
            self_nid,
            dispatcher,
            system,
            client_edge,
            mesh_manager,
            request_cache,
            panel,
            status,
            transport,
        };

        let dispatch = Arc::new(NodeDispatch::new(
            node.request_cache.clone(),
            node.system.clone(),
            Some(node.client_edge.sessions.clone()),
            NodeRole::Play(node.dispatcher.clone()),
        ));
        tokio::spawn(dispatch.run(inbound_rx));

        node
    }

    pub fn register_stage_type(&self, stage_type: impl Into<String>, stage_factory: StageFactory, actor_factory: ActorFactory) {
        self.dispatcher.register_stage_type(stage_type, stage_factory, actor_factory);
    }

    /// Self-connects the mesh transport, starts the discovery loop, and
    /// starts the client listeners configured in `options`. Runs until the
    /// process is killed; callers typically `tokio::spawn` this or call it
    /// as the last statement of `main`.
    pub async fn run(self: Arc<Self>, options: &NodeOptions) {
        self.mesh_manager.clone().spawn(options.discovery_period());

        let dispatcher = self.dispatcher.clone();
        let status = self.status.clone();
        let discovery_period = options.discovery_period();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(discovery_period);
            loop {
                ticker.tick().await;
                status.set_actor_count(dispatcher.actor_count());
            }
        });

        if let Some(bind_addr) = &options.client_tcp_bind {
            let edge = self.client_edge.clone();
            let bind_addr = bind_addr.clone();
            let self_nid = self.self_nid;
            tokio::spawn(async move {
                if let Err(e) = crate::client_edge::tcp::serve(edge, &bind_addr, self_nid).await {
                    tracing::error!(error = %e, "tcp client edge listener exited");
                }
            });
        }

        if let Some(bind_addr) = options.client_ws_bind.clone() {
            let edge = self.client_edge.clone();
            let self_nid = self.self_nid;
            tokio::spawn(async move {
                serve_websocket(edge, bind_addr, self_nid).await;
            });
        }

        if let Some(bind_addr) = options.admin_bind.clone() {
            let panel = self.panel.clone();
            tokio::spawn(async move {
                serve_admin_panel(panel, bind_addr).await;
            });
        }

        info!(nid = %self.self_nid, "play node running");
        std::future::pending::<()>().await;
    }
}

async fn serve_websocket(edge: Arc<ClientEdge>, bind_addr: String, session_nid: Nid) {
    use axum::extract::ws::WebSocketUpgrade;
    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    #[derive(Clone)]
    struct WsState {
        edge: Arc<ClientEdge>,
        session_nid: Nid,
    }

    async fn upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
        ws.on_upgrade(move |socket| crate::client_edge::ws::handle_connection(state.edge, socket, state.session_nid))
    }

    let state = WsState { edge, session_nid };
    let app = Router::new().route("/ws", get(upgrade)).with_state(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, bind_addr, "failed to bind websocket client edge");
            return;
        }
    };
    info!(bind_addr, "websocket client edge listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "websocket client edge listener exited");
    }
}

/// Plain-text status route, the same shape as
/// `enlist_handler`: no auth, no content negotiation, just a `GET` a human
/// can curl.
async fn serve_admin_panel(panel: Arc<dyn ISystemPanel>, bind_addr: String) {
    use axum::extract::State;
    use axum::routing::get;
    use axum::Router;

    async fn status(State(panel): State<Arc<dyn ISystemPanel>>) -> String {
        panel.snapshot().await.to_string()
    }

    let app = Router::new().route("/status", get(status)).with_state(panel);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, bind_addr, "failed to bind admin panel");
            return;
        }
    };
    info!(bind_addr, "admin panel listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "admin panel listener exited");
    }
}

/// Convenience for a node that doesn't need a shared-cluster discovery
/// backend (tests, single-node deployments): every node simply announces
/// itself into an in-process registry.
pub fn in_memory_registry() -> Arc<InMemoryRegistry> {
    Arc::new(InMemoryRegistry::new())
}
