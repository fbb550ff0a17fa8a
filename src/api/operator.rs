use axum::Json;
use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{Context, authorize};
use crate::auth::{Action, Permission, Principal};
use crate::config::switches::SwitchDomain;
use crate::error::{NamingError, Result};
use crate::registry::metrics::{self, MetricsSnapshot};

/// Only principals allowed to write here may change switches.
const SWITCH_RESOURCE: &str = "naming.switches";

pub async fn switches(Extension(ctx): Extension<Arc<Context>>) -> Json<SwitchDomain> {
    Json(ctx.switches.current().as_ref().clone())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchParams {
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub debug: bool,
    pub access_token: Option<String>,
}

pub async fn update_switch(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<SwitchParams>,
) -> Result<Response> {
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::new(SWITCH_RESOURCE, Action::Write),
    )?;
    if params.entry.is_empty() {
        return Err(NamingError::invalid("entry is required"));
    }
    ctx.switches
        .update(&params.entry, &params.value, params.debug)
        .await?;
    Ok("ok".into_response())
}

pub async fn metrics(Extension(ctx): Extension<Arc<Context>>) -> Json<MetricsSnapshot> {
    Json(metrics::collect(
        "UP",
        &ctx.manager,
        ctx.operator.as_ref(),
        &ctx.push,
    ))
}

pub async fn servers(Extension(ctx): Extension<Arc<Context>>) -> Json<Value> {
    let mapper = ctx.manager.mapper();
    Json(json!({
        "local": mapper.local_address(),
        "standalone": mapper.is_standalone(),
        "servers": mapper.all_servers().as_ref(),
        "healthy": mapper.healthy_servers().as_ref(),
        "raftLeader": ctx.raft.leader(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    Extension(ctx): Extension<Arc<Context>>,
    Query(params): Query<LoginParams>,
) -> Result<Json<Principal>> {
    if params.username.is_empty() {
        return Err(NamingError::invalid("username is required"));
    }
    Ok(Json(ctx.auth.login(&params.username, &params.password)?))
}
