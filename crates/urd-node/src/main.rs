use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use urd_cluster::{Broadcaster, Method, PeerRequest};
use urd_server::AppState;
use urd_store::Replica;

mod config;
use config::Config;

#[derive(clap::Parser, Debug)]
#[command(name = "urd-node", about = "Urd causal KV node")]
struct Cli {
    /// TOML file overriding the built-in defaults.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    let addr = config.node.socket_address.clone();
    let view = config.view_list();
    tracing::info!(
        %addr,
        view = ?view,
        shard_count = config.node.shard_count,
        "node starting"
    );

    let replica = Arc::new(
        Replica::new(addr.clone(), view, config.node.shard_count)
            .context("invalid shard configuration")?,
    );
    let cluster = Arc::new(Broadcaster::new(replica.clone(), config.broadcast()));

    let port = addr
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .with_context(|| format!("invalid SOCKET_ADDRESS: {addr}"))?;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot listen on port {port}"))?;

    register_with_peers(&cluster, config.node.shard_count).await;

    urd_server::serve(AppState { replica, cluster }, listener)
        .await
        .map_err(Into::into)
}

/// One-shot registration broadcast at startup. A node started with no shard
/// count is joining: it stays silent until `/shard/add-member` pulls it in.
async fn register_with_peers(cluster: &Broadcaster, shard_count: usize) {
    if shard_count == 0 {
        return;
    }
    let replica = cluster.replica();
    let targets = replica.other_views().await;
    if targets.is_empty() {
        return;
    }

    tracing::info!(targets = ?targets, "registering with peers");
    let failing = cluster
        .broadcast(&PeerRequest {
            method: Method::Put,
            endpoint: "/view".to_string(),
            payload: serde_json::json!({ "socket-address": replica.addr() }),
            targets,
        })
        .await;
    for failed in failing {
        tracing::warn!(peer = %failed.addr, "registration not acknowledged");
    }
}
