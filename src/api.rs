//! HTTP control and read API
//!
//! Read routes expose the status snapshot, the endpoint list and Prometheus
//! metrics. Control routes drive the supervisor lifecycle.
//!
//! ```rust,ignore
//! let app = monitor_router().with_state(supervisor.clone());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::monitor::{MonitoringStatus, StartOutcome, StopOutcome, Supervisor};

#[derive(Debug, Deserialize)]
pub struct AddEndpointRequest {
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
pub struct AddEndpointResponse {
    pub endpoint: String,
    /// False when the endpoint was already registered
    pub added: bool,
}

pub fn monitor_router() -> Router<Arc<Supervisor>> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/endpoints", get(list_endpoints).post(add_endpoint))
        .route("/endpoints/:name", delete(remove_endpoint))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/reset", post(reset))
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(ready))
}

async fn metrics(State(supervisor): State<Arc<Supervisor>>) -> String {
    supervisor.metrics().to_prometheus()
}

async fn status(
    State(supervisor): State<Arc<Supervisor>>,
) -> Json<BTreeMap<String, MonitoringStatus>> {
    Json(supervisor.status_snapshot())
}

async fn list_endpoints(State(supervisor): State<Arc<Supervisor>>) -> Json<Vec<String>> {
    Json(supervisor.endpoints())
}

async fn add_endpoint(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<AddEndpointRequest>,
) -> Result<(StatusCode, Json<AddEndpointResponse>), StatusCode> {
    let endpoint = request.endpoint.trim().to_string();
    if endpoint.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let added = supervisor.add(&endpoint);
    let code = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((code, Json(AddEndpointResponse { endpoint, added })))
}

async fn remove_endpoint(
    State(supervisor): State<Arc<Supervisor>>,
    Path(name): Path<String>,
) -> StatusCode {
    if supervisor.remove(&name).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn start(State(supervisor): State<Arc<Supervisor>>) -> Json<StartOutcome> {
    info!("Start requested over HTTP");
    Json(supervisor.start().await)
}

async fn stop(State(supervisor): State<Arc<Supervisor>>) -> Json<StopOutcome> {
    info!("Stop requested over HTTP");
    Json(supervisor.stop().await)
}

async fn reset(State(supervisor): State<Arc<Supervisor>>) -> StatusCode {
    info!("Reset requested over HTTP");
    supervisor.reset().await;
    StatusCode::NO_CONTENT
}

async fn ready(State(supervisor): State<Arc<Supervisor>>) -> (StatusCode, &'static str) {
    if supervisor.is_active() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "monitoring stopped")
    }
}
