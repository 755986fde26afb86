//! Thin entrypoint for an Api node. Game logic is supplied by
//! embedding `playhouse-core` and providing a real `IApiController`; this
//! binary wires in an empty one so transport, discovery, and the system
//! dispatcher can be exercised without any message handlers registered.

use std::sync::Arc;

use playhouse_core::api::{IApiController, IHandlerRegister};
use playhouse_core::bootstrap::{api::in_memory_registry, ApiNode, NodeOptions};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

struct EmptyController;

impl IApiController for EmptyController {
    fn handles(&self, _register: &mut dyn IHandlerRegister) {}
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let config_path = std::env::var("PLAYHOUSE_CONFIG").unwrap_or_else(|_| "api-node.toml".to_string());
    let options = match NodeOptions::from_toml_file(&config_path).await {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!(config_path, error = %e, "no usable config file found, starting with defaults");
            NodeOptions::default()
        }
    };

    let node = Arc::new(ApiNode::bootstrap(&options, in_memory_registry(), &EmptyController));
    node.run(&options).await;
}
