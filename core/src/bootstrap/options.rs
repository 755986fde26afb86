//! Node bootstrap options. A builder populated programmatically
//! or by deserializing a TOML file, the same `serde`-deserialize-a-config-
//! struct shape `lobby::reload_config` uses for `GameConfig.json`, just TOML
//! instead of JSON because this option set nests mesh/client/discovery
//! tables rather than a single flat list.

use std::time::Duration;

use protocol::{Nid, ServiceType};
use serde::Deserialize;

/// Every field has a documented default so an operator can override just
/// the ones that matter for a given deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    pub service_id: u32,
    pub server_id: u32,
    pub service_type: NodeServiceType,
    pub bind_endpoint: String,
    pub client_tcp_bind: Option<String>,
    pub client_ws_bind: Option<String>,
    /// Optional plain-text status route; unset means no admin
    /// HTTP listener is started at all.
    pub admin_bind: Option<String>,
    pub authenticate_msg_id: String,
    pub idle_timeout_ms: u64,
    pub heart_beat_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub send_high_watermark: usize,
    pub server_stale_ms: i64,
    pub discovery_period_ms: u64,
    pub io_concurrency: usize,
}

/// TOML-friendly mirror of [`ServiceType`] (the protocol enum has no
/// `Deserialize` derive tuned for lowercase TOML keys).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeServiceType {
    Play,
    Api,
}

impl From<NodeServiceType> for ServiceType {
    fn from(value: NodeServiceType) -> Self {
        match value {
            NodeServiceType::Play => ServiceType::Play,
            NodeServiceType::Api => ServiceType::Api,
        }
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            service_id: 1,
            server_id: 1,
            service_type: NodeServiceType::Play,
            bind_endpoint: "tcp://127.0.0.1:5555".to_string(),
            client_tcp_bind: None,
            client_ws_bind: None,
            admin_bind: None,
            authenticate_msg_id: "Authenticate".to_string(),
            idle_timeout_ms: 30_000,
            heart_beat_interval_ms: 10_000,
            request_timeout_ms: 30_000,
            send_high_watermark: 1_000_000,
            server_stale_ms: 10_000,
            discovery_period_ms: 3_000,
            io_concurrency: 100,
        }
    }
}

impl NodeOptions {
    pub fn self_nid(&self) -> Nid {
        Nid::new(self.service_id as u16, self.server_id)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn heart_beat_interval(&self) -> Duration {
        Duration::from_millis(self.heart_beat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_millis(self.discovery_period_ms)
    }

    pub fn from_toml_str(toml_text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_text)
    }

    pub async fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, NodeOptionsError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::from_toml_str(&text)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeOptionsError {
    #[error("failed to read options file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse options file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Builder for the programmatic path (tests, embedding), mirroring the
/// option set one field at a time instead of requiring a TOML file on disk.
#[derive(Debug, Clone, Default)]
pub struct NodeOptionsBuilder {
    options: NodeOptions,
}

impl NodeOptionsBuilder {
    pub fn new() -> Self {
        Self { options: NodeOptions::default() }
    }

    pub fn service_id(mut self, service_id: u32) -> Self {
        self.options.service_id = service_id;
        self
    }

    pub fn server_id(mut self, server_id: u32) -> Self {
        self.options.server_id = server_id;
        self
    }

    pub fn service_type(mut self, service_type: NodeServiceType) -> Self {
        self.options.service_type = service_type;
        self
    }

    pub fn bind_endpoint(mut self, bind_endpoint: impl Into<String>) -> Self {
        self.options.bind_endpoint = bind_endpoint.into();
        self
    }

    pub fn client_tcp_bind(mut self, bind_addr: impl Into<String>) -> Self {
        self.options.client_tcp_bind = Some(bind_addr.into());
        self
    }

    pub fn client_ws_bind(mut self, bind_addr: impl Into<String>) -> Self {
        self.options.client_ws_bind = Some(bind_addr.into());
        self
    }

    pub fn admin_bind(mut self, bind_addr: impl Into<String>) -> Self {
        self.options.admin_bind = Some(bind_addr.into());
        self
    }

    pub fn authenticate_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.options.authenticate_msg_id = msg_id.into();
        self
    }

    pub fn idle_timeout_ms(mut self, value: u64) -> Self {
        self.options.idle_timeout_ms = value;
        self
    }

    pub fn request_timeout_ms(mut self, value: u64) -> Self {
        self.options.request_timeout_ms = value;
        self
    }

    pub fn discovery_period_ms(mut self, value: u64) -> Self {
        self.options.discovery_period_ms = value;
        self
    }

    pub fn io_concurrency(mut self, value: usize) -> Self {
        self.options.io_concurrency = value;
        self
    }

    pub fn build(self) -> NodeOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_fields_missing_from_toml() {
        let options = NodeOptions::from_toml_str(
            r#"
            service_id = 7
            bind_endpoint = "tcp://0.0.0.0:6000"
            "#,
        )
        .unwrap();

        assert_eq!(options.service_id, 7);
        assert_eq!(options.bind_endpoint, "tcp://0.0.0.0:6000");
        // everything else falls back to NodeOptions::default()
        assert_eq!(options.server_id, 1);
        assert_eq!(options.request_timeout_ms, 30_000);
        assert_eq!(options.send_high_watermark, 1_000_000);
        assert!(options.admin_bind.is_none());
    }

    #[test]
    fn nested_tables_parse_service_type_and_binds() {
        let options = NodeOptions::from_toml_str(
            r#"
            service_type = "api"
            client_tcp_bind = "0.0.0.0:7000"
            admin_bind = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert!(matches!(options.service_type, NodeServiceType::Api));
        assert_eq!(options.client_tcp_bind.as_deref(), Some("0.0.0.0:7000"));
        assert_eq!(options.admin_bind.as_deref(), Some("127.0.0.1:9100"));
    }

    #[test]
    fn self_nid_combines_service_and_server_id() {
        let options = NodeOptionsBuilder::new().service_id(3).server_id(42).build();
        let nid = options.self_nid();
        assert_eq!(nid, Nid::new(3, 42));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(NodeOptions::from_toml_str("not = [valid").is_err());
    }
}
