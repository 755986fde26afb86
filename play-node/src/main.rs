//! Thin entrypoint for a Play node. Game logic is supplied by
//! embedding `playhouse-core` as a library and calling
//! `PlayNode::register_stage_type` before `run`; this binary on its own
//! only proves out transport, discovery, and client-edge bootstrap with
//! whatever stage types a build wires in above `main`.

use std::sync::Arc;

use playhouse_core::bootstrap::{play::in_memory_registry, NodeOptions, PlayNode};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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

    let config_path = std::env::var("PLAYHOUSE_CONFIG").unwrap_or_else(|_| "play-node.toml".to_string());
    let options = match NodeOptions::from_toml_file(&config_path).await {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!(config_path, error = %e, "no usable config file found, starting with defaults");
            NodeOptions::default()
        }
    };

    let node = Arc::new(PlayNode::bootstrap(&options, in_memory_registry()));
    node.run(&options).await;
}
