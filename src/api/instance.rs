use axum::Json;
use axum::extract::{Extension, Query};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{Context, authorize, forward_to_owner, grouped_service_name, namespace_or_default, parse_metadata};
use crate::auth::{Action, Permission};
use crate::error::{NamingError, Result};
use crate::health::beat::BeatInfo;
use crate::model::instance::Instance;
use crate::model::keys;
use crate::registry::operator::SubscriberInfo;
use crate::registry::view::{HostView, ServiceView};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceParams {
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    pub group_name: Option<String>,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    pub cluster_name: Option<String>,
    pub weight: Option<f64>,
    pub enabled: Option<bool>,
    pub healthy: Option<bool>,
    pub ephemeral: Option<bool>,
    pub metadata: Option<String>,
    pub access_token: Option<String>,
}

impl InstanceParams {
    fn target(&self) -> Result<(String, String)> {
        let namespace_id = namespace_or_default(self.namespace_id.clone());
        let service_name = grouped_service_name(&self.service_name, self.group_name.as_deref())?;
        Ok((namespace_id, service_name))
    }

    fn cluster(&self) -> String {
        self.cluster_name
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| keys::DEFAULT_CLUSTER.to_string())
    }

    fn to_instance(&self, default_ephemeral: bool) -> Result<Instance> {
        if self.ip.trim().is_empty() {
            return Err(NamingError::invalid("ip is required"));
        }
        let mut instance = Instance::new(self.ip.trim(), self.port)
            .with_cluster(self.cluster())
            .with_weight(self.weight.unwrap_or(1.0))
            .with_enabled(self.enabled.unwrap_or(true))
            .with_healthy(self.healthy.unwrap_or(true))
            .with_ephemeral(self.ephemeral.unwrap_or(default_ephemeral));
        if let Some(metadata) = &self.metadata {
            instance.metadata = parse_metadata(metadata)?;
        }
        Ok(instance)
    }
}

pub async fn register(
    Extension(ctx): Extension<Arc<Context>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<InstanceParams>,
) -> Result<Response> {
    let (namespace_id, service_name) = params.target()?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Write),
    )?;
    let instance = params.to_instance(ctx.switches.current().default_instance_ephemeral)?;

    if instance.ephemeral
        && let Some(forwarded) = forward_to_owner(&ctx, method, &uri, &headers, &service_name).await
    {
        return forwarded;
    }

    ctx.operator
        .register_instance(&namespace_id, &service_name, instance)
        .await?;
    Ok("ok".into_response())
}

pub async fn deregister(
    Extension(ctx): Extension<Arc<Context>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<InstanceParams>,
) -> Result<Response> {
    let (namespace_id, service_name) = params.target()?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Write),
    )?;
    let instance = params.to_instance(ctx.switches.current().default_instance_ephemeral)?;

    if instance.ephemeral
        && let Some(forwarded) = forward_to_owner(&ctx, method, &uri, &headers, &service_name).await
    {
        return forwarded;
    }

    ctx.operator
        .remove_instance(&namespace_id, &service_name, instance)
        .await?;
    Ok("ok".into_response())
}

pub async fn update(
    Extension(ctx): Extension<Arc<Context>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<InstanceParams>,
) -> Result<Response> {
    let (namespace_id, service_name) = params.target()?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Write),
    )?;
    let instance = params.to_instance(ctx.switches.current().default_instance_ephemeral)?;

    if instance.ephemeral
        && let Some(forwarded) = forward_to_owner(&ctx, method, &uri, &headers, &service_name).await
    {
        return forwarded;
    }

    ctx.operator
        .update_instance(&namespace_id, &service_name, instance)
        .await?;
    Ok("ok".into_response())
}

pub async fn detail(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<InstanceParams>,
) -> Result<Json<HostView>> {
    let (namespace_id, service_name) = params.target()?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Read),
    )?;
    let instance = ctx.operator.get_instance(
        &namespace_id,
        &service_name,
        &params.cluster(),
        &params.ip,
        params.port,
    )?;
    Ok(Json(HostView::from(&instance)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    pub group_name: Option<String>,
    #[serde(default)]
    pub clusters: String,
    #[serde(default)]
    pub udp_port: u16,
    #[serde(rename = "clientIP", default)]
    pub client_ip: String,
    #[serde(default)]
    pub healthy_only: bool,
    #[serde(default)]
    pub app: String,
    pub access_token: Option<String>,
}

pub async fn list(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<ServiceView>> {
    let namespace_id = namespace_or_default(params.namespace_id.clone());
    let service_name = grouped_service_name(&params.service_name, params.group_name.as_deref())?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Read),
    )?;

    let agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let subscriber = SubscriberInfo {
        ip: params.client_ip.clone(),
        udp_port: params.udp_port,
        agent,
        app: params.app.clone(),
    };
    let view = ctx.operator.list_instance(
        &namespace_id,
        &service_name,
        &subscriber,
        &params.clusters,
        params.healthy_only,
    )?;
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatParams {
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    pub group_name: Option<String>,
    /// JSON encoded beat payload; light beats leave it out.
    pub beat: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub cluster_name: Option<String>,
    pub access_token: Option<String>,
}

pub async fn beat(
    Extension(ctx): Extension<Arc<Context>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<BeatParams>,
) -> Result<Response> {
    let namespace_id = namespace_or_default(params.namespace_id.clone());
    let service_name = grouped_service_name(&params.service_name, params.group_name.as_deref())?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Write),
    )?;

    let beat: Option<BeatInfo> = match params.beat.as_deref().filter(|b| !b.trim().is_empty()) {
        Some(raw) => Some(
            serde_json::from_str(raw).map_err(|e| NamingError::invalid(format!("bad beat payload: {e}")))?,
        ),
        None => None,
    };

    let ip = beat
        .as_ref()
        .map(|b| b.ip.clone())
        .filter(|ip| !ip.is_empty())
        .or_else(|| params.ip.clone())
        .ok_or_else(|| NamingError::invalid("ip is required"))?;
    let port = beat
        .as_ref()
        .map(|b| b.port)
        .filter(|port| *port > 0)
        .or(params.port)
        .unwrap_or_default();
    let cluster = params
        .cluster_name
        .clone()
        .filter(|c| !c.is_empty())
        .or_else(|| beat.as_ref().map(|b| b.cluster_or_default().to_string()))
        .unwrap_or_else(|| keys::DEFAULT_CLUSTER.to_string());

    if let Some(forwarded) = forward_to_owner(&ctx, method, &uri, &headers, &service_name).await {
        return forwarded;
    }

    let result = ctx
        .operator
        .handle_beat(&namespace_id, &service_name, &cluster, &ip, port, beat)
        .await?;
    Ok(Json(json!({
        "clientBeatInterval": result.client_beat_interval,
        "code": result.code,
        "lightBeatEnabled": result.light_beat_enabled,
    }))
    .into_response())
}
