//! Layered configuration: embedded defaults, then an optional `--config`
//! file, then the environment. `SOCKET_ADDRESS`, `VIEW` and `SHARD_COUNT`
//! are the cluster's standard variables; `URD_*` overrides cover the rest.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use urd_cluster::BroadcastConfig;

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    /// This node's advertised `host:port`; the listen port is taken from it.
    pub socket_address: String,
    /// Comma-separated initial view.
    pub view: String,
    /// 0 means the node is joining and has no shards yet.
    pub shard_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub peer_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub delivery_deadline_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    pub fn load(config_path: Option<&Path>) -> Result<Config, figment::Error> {
        let mut figment =
            Figment::new().merge(Toml::string(include_str!("../../../config/default.toml")));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment
            .merge(
                Env::raw()
                    .only(&["SOCKET_ADDRESS", "VIEW", "SHARD_COUNT"])
                    .map(|key| format!("node.{}", key.as_str().to_lowercase()).into())
                    .split("."),
            )
            .merge(Env::prefixed("URD_").split("__"))
            .extract()
    }

    pub fn view_list(&self) -> Vec<String> {
        self.node
            .view
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn broadcast(&self) -> BroadcastConfig {
        BroadcastConfig {
            peer_timeout: Duration::from_millis(self.network.peer_timeout_ms),
            retry_interval: Duration::from_millis(self.network.retry_interval_ms),
            delivery_deadline: Duration::from_secs(self.network.delivery_deadline_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(view: &str) -> Config {
        Config {
            node: NodeConfig {
                socket_address: "10.0.0.1:8090".to_string(),
                view: view.to_string(),
                shard_count: 0,
            },
            network: NetworkConfig {
                peer_timeout_ms: 200,
                retry_interval_ms: 200,
                delivery_deadline_secs: 900,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn view_list_splits_and_trims() {
        let c = config("10.0.0.1:8090, 10.0.0.2:8090,,10.0.0.3:8090");
        assert_eq!(
            c.view_list(),
            vec!["10.0.0.1:8090", "10.0.0.2:8090", "10.0.0.3:8090"]
        );
        assert!(config("").view_list().is_empty());
    }

    #[test]
    fn broadcast_config_converts_units() {
        let b = config("").broadcast();
        assert_eq!(b.peer_timeout, Duration::from_millis(200));
        assert_eq!(b.delivery_deadline, Duration::from_secs(900));
    }

    #[test]
    fn embedded_defaults_parse() {
        let c: Config = Figment::new()
            .merge(Toml::string(include_str!("../../../config/default.toml")))
            .extract()
            .unwrap();
        assert_eq!(c.node.shard_count, 0);
        assert_eq!(c.observability.log_format, "pretty");
    }
}
