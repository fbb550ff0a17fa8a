//! Peer-to-peer endpoints. Callers are other servers of the cluster, never
//! clients, so these skip auth and distro forwarding.

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::debug;

use super::Context;
use crate::consistency::protocol::{
    BeatRequest, DatumFetchRequest, DeleteRequest, ENDPOINT_BEAT, ENDPOINT_DATUM_FETCH, ENDPOINT_DELETE,
    ENDPOINT_FORWARD_DELETE, ENDPOINT_FORWARD_PUBLISH, ENDPOINT_PUBLISH, ENDPOINT_VOTE, ForwardDeleteRequest,
    ForwardPublishRequest, PublishRequest, VoteRequest, VoteResponse,
};
use crate::distro::protocol::{
    ChecksumReport, DatumBatch, DatumQuery, ENDPOINT_CHECKSUM, ENDPOINT_DATUM, ENDPOINT_DATUM_QUERY,
    ENDPOINT_SERVICE_HEALTH, ENDPOINT_SERVICE_STATUS, ENDPOINT_SNAPSHOT, ServiceHealth, ServiceHealthQuery,
    ServiceStatusReport,
};
use crate::error::{NamingError, Result};
use crate::model::datum::Datum;

pub fn routes() -> Router {
    Router::new()
        .route(ENDPOINT_CHECKSUM, post(handle_checksum))
        .route(ENDPOINT_DATUM, post(handle_datum_push))
        .route(ENDPOINT_DATUM_QUERY, post(handle_datum_query))
        .route(ENDPOINT_SNAPSHOT, get(handle_snapshot))
        .route(ENDPOINT_SERVICE_STATUS, post(handle_service_status))
        .route(ENDPOINT_SERVICE_HEALTH, post(handle_service_health))
        .route(ENDPOINT_VOTE, post(handle_vote))
        .route(ENDPOINT_BEAT, post(handle_raft_beat))
        .route(ENDPOINT_PUBLISH, post(handle_publish))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_FORWARD_PUBLISH, post(handle_forward_publish))
        .route(ENDPOINT_FORWARD_DELETE, post(handle_forward_delete))
        .route(ENDPOINT_DATUM_FETCH, post(handle_raft_datum_fetch))
}

// --- Distro ---

pub async fn handle_checksum(
    Extension(ctx): Extension<Arc<Context>>,
    Json(report): Json<ChecksumReport>,
) -> StatusCode {
    debug!("[DISTRO] {} checksums from {}", report.checksums.len(), report.source);
    // comparing and pulling may take a while; the sender does not wait for it
    let distro = ctx.distro.clone();
    tokio::spawn(async move {
        distro.on_receive_checksums(report).await;
    });
    StatusCode::OK
}

pub async fn handle_datum_push(
    Extension(ctx): Extension<Arc<Context>>,
    Json(batch): Json<DatumBatch>,
) -> StatusCode {
    ctx.distro.on_receive_datums(batch);
    StatusCode::OK
}

pub async fn handle_datum_query(
    Extension(ctx): Extension<Arc<Context>>,
    Json(query): Json<DatumQuery>,
) -> Json<Vec<Datum>> {
    Json(ctx.distro.datums(&query.keys))
}

pub async fn handle_snapshot(Extension(ctx): Extension<Arc<Context>>) -> Json<Vec<Datum>> {
    Json(ctx.distro.snapshot())
}

pub async fn handle_service_status(
    Extension(ctx): Extension<Arc<Context>>,
    Json(report): Json<ServiceStatusReport>,
) -> StatusCode {
    let sync = ctx.status_sync.clone();
    tokio::spawn(async move {
        sync.on_receive(report).await;
    });
    StatusCode::OK
}

pub async fn handle_service_health(
    Extension(ctx): Extension<Arc<Context>>,
    Json(query): Json<ServiceHealthQuery>,
) -> Result<Json<ServiceHealth>> {
    ctx.status_sync
        .service_health(&query.namespace_id, &query.service_name)
        .map(Json)
        .ok_or_else(|| NamingError::not_found(format!("service {} is not found", query.service_name)))
}

// --- Raft ---

pub async fn handle_vote(
    Extension(ctx): Extension<Arc<Context>>,
    Json(request): Json<VoteRequest>,
) -> Json<VoteResponse> {
    Json(ctx.raft.receive_vote(&request))
}

pub async fn handle_raft_beat(
    Extension(ctx): Extension<Arc<Context>>,
    Json(beat): Json<BeatRequest>,
) -> Result<StatusCode> {
    ctx.raft.receive_beat(&beat).await?;
    Ok(StatusCode::OK)
}

pub async fn handle_publish(
    Extension(ctx): Extension<Arc<Context>>,
    Json(request): Json<PublishRequest>,
) -> Result<StatusCode> {
    ctx.raft.receive_publish(request)?;
    Ok(StatusCode::OK)
}

pub async fn handle_delete(
    Extension(ctx): Extension<Arc<Context>>,
    Json(request): Json<DeleteRequest>,
) -> Result<StatusCode> {
    ctx.raft.receive_delete(request)?;
    Ok(StatusCode::OK)
}

pub async fn handle_forward_publish(
    Extension(ctx): Extension<Arc<Context>>,
    Json(request): Json<ForwardPublishRequest>,
) -> Result<StatusCode> {
    ctx.raft.signal_publish(&request.key, request.value).await?;
    Ok(StatusCode::OK)
}

pub async fn handle_forward_delete(
    Extension(ctx): Extension<Arc<Context>>,
    Json(request): Json<ForwardDeleteRequest>,
) -> Result<StatusCode> {
    ctx.raft.signal_delete(&request.key).await?;
    Ok(StatusCode::OK)
}

pub async fn handle_raft_datum_fetch(
    Extension(ctx): Extension<Arc<Context>>,
    Json(request): Json<DatumFetchRequest>,
) -> Json<Vec<Datum>> {
    Json(ctx.raft.datums(&request.keys))
}
