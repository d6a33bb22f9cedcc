//! Docker volume-plugin wire adapter.
//!
//! Serves the plugin protocol as JSON-over-HTTP on a unix socket; every
//! wire method maps one-to-one onto a [`Driver`] operation. Driver calls
//! block on the network, so handlers run them on the blocking pool. Errors
//! travel as message strings in the `Err` field, per the protocol.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;

use crate::docker::Driver;
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
struct VolumeRequest {
    #[serde(default, rename = "Name")]
    name: String,
}

/// Bind the unix socket and serve the plugin protocol until shutdown.
pub async fn serve(driver: Arc<Driver>, socket: &Path) -> Result<()> {
    if socket.exists() {
        std::fs::remove_file(socket)?;
    }
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket)?;
    tracing::info!(socket = %socket.display(), "serving volume plugin");

    axum::serve(listener, router(driver)).await?;
    Ok(())
}

fn router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(driver)
}

async fn activate() -> Json<Value> {
    Json(json!({ "Implements": ["VolumeDriver"] }))
}

async fn create(State(driver): State<Arc<Driver>>, Json(req): Json<VolumeRequest>) -> Json<Value> {
    let result = blocking(move || driver.create(&req.name).map(|_| json!({ "Err": "" }))).await;
    Json(result)
}

async fn get(State(driver): State<Arc<Driver>>, Json(req): Json<VolumeRequest>) -> Json<Value> {
    let result = blocking(move || {
        driver.get(&req.name).map(|(name, mountpoint)| {
            json!({
                "Volume": { "Name": name, "Mountpoint": mountpoint },
                "Err": "",
            })
        })
    })
    .await;
    Json(result)
}

async fn list(State(driver): State<Arc<Driver>>) -> Json<Value> {
    let volumes: Vec<Value> = driver
        .list()
        .into_iter()
        .map(|(name, mountpoint)| json!({ "Name": name, "Mountpoint": mountpoint }))
        .collect();
    Json(json!({ "Volumes": volumes, "Err": "" }))
}

async fn path(State(driver): State<Arc<Driver>>, Json(req): Json<VolumeRequest>) -> Json<Value> {
    Json(json!({ "Mountpoint": driver.mountpoint(&req.name), "Err": "" }))
}

async fn mount(State(driver): State<Arc<Driver>>, Json(req): Json<VolumeRequest>) -> Json<Value> {
    let result = blocking(move || {
        driver
            .mount(&req.name)
            .map(|mountpoint| json!({ "Mountpoint": mountpoint, "Err": "" }))
    })
    .await;
    Json(result)
}

async fn unmount(State(driver): State<Arc<Driver>>, Json(req): Json<VolumeRequest>) -> Json<Value> {
    let result = blocking(move || driver.unmount(&req.name).map(|_| json!({ "Err": "" }))).await;
    Json(result)
}

async fn remove(State(driver): State<Arc<Driver>>, Json(req): Json<VolumeRequest>) -> Json<Value> {
    let result = blocking(move || driver.remove(&req.name).map(|_| json!({ "Err": "" }))).await;
    Json(result)
}

async fn capabilities(State(driver): State<Arc<Driver>>) -> Json<Value> {
    Json(json!({ "Capabilities": { "Scope": driver.capabilities() } }))
}

/// Run a driver call on the blocking pool and fold failures into the wire's
/// `Err` string shape.
async fn blocking<F>(call: F) -> Value
where
    F: FnOnce() -> Result<Value> + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => json!({ "Err": e.to_string() }),
        Err(e) => json!({ "Err": format!("internal error: {}", e) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_request_parses_wire_shape() {
        let req: VolumeRequest = serde_json::from_str(r#"{"Name":"vol1"}"#).unwrap();
        assert_eq!(req.name, "vol1");

        let req: VolumeRequest = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(req.name, "");
    }

    #[test]
    fn test_error_shape_is_message_string() {
        let value = json!({ "Err": "something broke" });
        assert_eq!(value["Err"], "something broke");
    }
}
