//! HTTP API
//!
//! Thin axum layer over the registry. Handlers parse parameters, check
//! permissions, forward ephemeral writes for services owned by another node,
//! and map [`NamingError`] onto status codes through its `IntoResponse`.
//!
//! ## Routes
//! - `/v1/ns/instance*`, `/v1/ns/service*`, `/v1/ns/cluster`: client API.
//! - `/v1/ns/operator/*`, `/v1/ns/auth/login`: operations.
//! - `/v1/ns/distro/*`, `/v1/ns/raft/*`: peer-to-peer endpoints, see [`internal`].

pub mod instance;
pub mod internal;
pub mod operator;
pub mod service;

#[cfg(test)]
mod tests;

use axum::extract::Extension;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{Authenticator, Permission};
use crate::consistency::DistroConsistencyService;
use crate::consistency::raft::RaftCore;
use crate::error::{NamingError, Result};
use crate::model::keys;
use crate::push::PushService;
use crate::registry::ServiceManager;
use crate::registry::operator::InstanceOperator;
use crate::registry::status_sync::ServiceStatusSynchronizer;
use crate::registry::switch_manager::SwitchManager;
use crate::transport::{FORWARDED_HEADER, PeerClient};

/// Everything the handlers reach, shared through an `Extension`.
pub struct Context {
    pub manager: Arc<ServiceManager>,
    pub operator: Arc<dyn InstanceOperator>,
    pub push: Arc<PushService>,
    pub switches: Arc<SwitchManager>,
    pub status_sync: Arc<ServiceStatusSynchronizer>,
    pub distro: Arc<DistroConsistencyService>,
    pub raft: Arc<RaftCore>,
    pub peers: PeerClient,
    pub auth: Arc<dyn Authenticator>,
    pub auth_enabled: bool,
}

impl Context {
    fn auth_required(&self) -> bool {
        self.auth_enabled || self.switches.current().enable_authentication
    }
}

pub fn router(ctx: Arc<Context>) -> Router {
    Router::new()
        .route(
            "/v1/ns/instance",
            post(instance::register)
                .delete(instance::deregister)
                .put(instance::update)
                .get(instance::detail),
        )
        .route("/v1/ns/instance/list", get(instance::list))
        .route("/v1/ns/instance/beat", put(instance::beat))
        .route(
            "/v1/ns/service",
            post(service::create)
                .put(service::update)
                .delete(service::remove)
                .get(service::detail),
        )
        .route("/v1/ns/service/list", get(service::list))
        .route("/v1/ns/service/search", get(service::search))
        .route("/v1/ns/cluster", put(service::update_cluster))
        .route(
            "/v1/ns/operator/switches",
            get(operator::switches).put(operator::update_switch),
        )
        .route("/v1/ns/operator/metrics", get(operator::metrics))
        .route("/v1/ns/operator/servers", get(operator::servers))
        .route("/v1/ns/auth/login", post(operator::login))
        .merge(internal::routes())
        .layer(Extension(ctx))
}

// --- Shared handler helpers ---

pub(crate) fn namespace_or_default(namespace_id: Option<String>) -> String {
    namespace_id
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| keys::DEFAULT_NAMESPACE.to_string())
}

/// `group@@service` from the separate request parameters.
pub(crate) fn grouped_service_name(service_name: &str, group_name: Option<&str>) -> Result<String> {
    if service_name.trim().is_empty() {
        return Err(NamingError::invalid("serviceName is required"));
    }
    Ok(keys::grouped_name(group_name.unwrap_or(""), service_name.trim()))
}

/// Metadata as a JSON object or as `k1=v1,k2=v2`.
pub(crate) fn parse_metadata(raw: &str) -> Result<BTreeMap<String, String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }
    if raw.starts_with('{') {
        return serde_json::from_str(raw)
            .map_err(|e| NamingError::invalid(format!("metadata is not a string map: {e}")));
    }
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| NamingError::invalid(format!("bad metadata entry: {pair}")))
        })
        .collect()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn is_forwarded(headers: &HeaderMap) -> bool {
    headers.contains_key(FORWARDED_HEADER)
}

/// Ask the authenticator when auth is on. Requests proxied by a peer were
/// checked where they entered the cluster.
pub(crate) fn authorize(ctx: &Context, headers: &HeaderMap, token: Option<&str>, permission: Permission) -> Result<()> {
    if !ctx.auth_required() || is_forwarded(headers) {
        return Ok(());
    }
    let token = token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer(headers))
        .ok_or_else(|| NamingError::Forbidden("access token required".to_string()))?;
    let principal = ctx
        .auth
        .identify(token)
        .ok_or_else(|| NamingError::Forbidden("unknown or expired access token".to_string()))?;
    ctx.auth.auth(&permission, &principal)
}

/// Replay an ephemeral write on the node that owns the service. `None` means
/// the request should be served here.
pub(crate) async fn forward_to_owner(
    ctx: &Context,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    service_name: &str,
) -> Option<Result<Response>> {
    let mapper = ctx.manager.mapper();
    if mapper.is_standalone()
        || !ctx.switches.current().distro_enabled
        || is_forwarded(headers)
        || mapper.responsible(service_name)
    {
        return None;
    }

    let owner = mapper.map_srv(service_name);
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    debug!("[DISTRO-FILTER] forwarding {} {} to {}", method, path_and_query, owner);

    let result = ctx
        .peers
        .proxy(&owner, method, &path_and_query, None, Vec::new())
        .await
        .map(|(status, body)| {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, body).into_response()
        })
        .map_err(|e| NamingError::server(format!("failed to forward to {owner}: {e}")));
    Some(result)
}
