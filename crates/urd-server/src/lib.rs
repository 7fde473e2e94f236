mod cm;
mod error;
mod forward;
mod kv;
mod shard;
mod view;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use urd_cluster::Broadcaster;
use urd_store::Replica;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub replica: Arc<Replica>,
    pub cluster: Arc<Broadcaster>,
}

pub fn router(state: AppState) -> Router {
    // Keyed data routes sit behind the forwarding layer: a key owned by
    // another shard is relayed there before any local handler runs.
    let kv_routes = Router::new()
        .route("/kvs/:key", put(kv::put_key).get(kv::get_key).delete(kv::delete_key))
        .layer(middleware::from_fn_with_state(state.clone(), forward::forward_foreign_keys));

    Router::new()
        .merge(kv_routes)
        .route("/data", get(kv::data_transfer))
        .route("/cm", put(cm::put_cm))
        .route("/view", put(view::put_view).get(view::get_view).delete(view::delete_view))
        .route("/shard/add-member/:id", put(shard::add_member))
        .route("/shard/ids", get(shard::shard_ids))
        .route("/shard/node-shard-id", get(shard::node_shard_id))
        .route("/shard/members/:id", get(shard::members))
        .route("/shard/key-count/:id", get(shard::key_count))
        .route("/shard/reshard", put(shard::reshard))
        .route("/shard/update", put(shard::update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "replica listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
