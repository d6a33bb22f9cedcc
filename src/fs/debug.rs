//! HTTP inspector exposing a JSON snapshot of the node registry.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::error::Result;
use crate::fs::NodeTree;

/// Serve `GET /debug` with the registry snapshot until the task is dropped.
pub async fn serve(tree: Arc<NodeTree>, addr: SocketAddr) -> Result<()> {
    let app = Router::new().route("/debug", get(snapshot)).with_state(tree);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("debug inspector listening on http://{}/debug", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn snapshot(State(tree): State<Arc<NodeTree>>) -> Json<serde_json::Value> {
    Json(tree.snapshot())
}
