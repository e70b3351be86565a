use super::service::Cluster;
use super::types::{ClusterStatus, HealthResponse};
use crate::storage::keyspace::Keyspace;

use axum::{Extension, Json, Router, http::StatusCode, routing::get};
use std::sync::Arc;

pub async fn handle_health(
    Extension(cluster): Extension<Arc<Cluster>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if cluster.is_forming() {
        (StatusCode::SERVICE_UNAVAILABLE, "forming")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            node: cluster.self_name.clone(),
        }),
    )
}

pub async fn handle_status(
    Extension(cluster): Extension<Arc<Cluster>>,
    Extension(keyspace): Extension<Arc<Keyspace>>,
) -> (StatusCode, Json<ClusterStatus>) {
    (StatusCode::OK, Json(cluster.status(keyspace.len())))
}

pub fn status_router(cluster: Arc<Cluster>, keyspace: Arc<Keyspace>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .layer(Extension(cluster))
        .layer(Extension(keyspace))
}
