use axum::Json;
use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{Context, authorize, grouped_service_name, namespace_or_default, parse_metadata};
use crate::auth::{Action, Permission};
use crate::error::{NamingError, Result};
use crate::model::cluster::Cluster;
use crate::model::keys;
use crate::model::selector::Selector;
use crate::model::service::Service;
use crate::model::types::HealthChecker;
use crate::registry::manager::{ServiceQuery, ServiceUpdate};

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceParams {
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    pub group_name: Option<String>,
    pub protect_threshold: Option<f32>,
    pub enabled: Option<bool>,
    pub metadata: Option<String>,
    /// JSON, e.g. `{"type":"label","expression":"..."}`.
    pub selector: Option<String>,
    pub access_token: Option<String>,
}

impl ServiceParams {
    fn target(&self) -> Result<(String, String)> {
        let namespace_id = namespace_or_default(self.namespace_id.clone());
        let service_name = grouped_service_name(&self.service_name, self.group_name.as_deref())?;
        Ok((namespace_id, service_name))
    }

    fn selector(&self) -> Result<Option<Selector>> {
        self.selector
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|raw| serde_json::from_str(raw).map_err(|e| NamingError::invalid(format!("bad selector: {e}"))))
            .transpose()
    }

    fn metadata(&self) -> Result<Option<std::collections::BTreeMap<String, String>>> {
        self.metadata.as_deref().map(parse_metadata).transpose()
    }

    fn write_permission(&self, ctx: &Context, headers: &HeaderMap, namespace_id: &str, service_name: &str) -> Result<()> {
        authorize(
            ctx,
            headers,
            self.access_token.as_deref(),
            Permission::service(namespace_id, service_name, Action::Write),
        )
    }
}

pub async fn create(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<ServiceParams>,
) -> Result<Response> {
    let (namespace_id, service_name) = params.target()?;
    params.write_permission(&ctx, &headers, &namespace_id, &service_name)?;

    let mut service = Service::new(&namespace_id, &service_name);
    service.protect_threshold = params.protect_threshold.unwrap_or(0.0);
    service.enabled = params.enabled.unwrap_or(true);
    if let Some(selector) = params.selector()? {
        service.selector = selector;
    }
    if let Some(metadata) = params.metadata()? {
        service.metadata = metadata;
    }
    service.recalculate_checksum();

    ctx.manager.create_service(service).await?;
    Ok("ok".into_response())
}

pub async fn update(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<ServiceParams>,
) -> Result<Response> {
    let (namespace_id, service_name) = params.target()?;
    params.write_permission(&ctx, &headers, &namespace_id, &service_name)?;

    let update = ServiceUpdate {
        protect_threshold: params.protect_threshold,
        enabled: params.enabled,
        selector: params.selector()?,
        metadata: params.metadata()?,
    };
    ctx.manager
        .update_service(&namespace_id, &service_name, update)
        .await?;
    Ok("ok".into_response())
}

pub async fn remove(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<ServiceParams>,
) -> Result<Response> {
    let (namespace_id, service_name) = params.target()?;
    params.write_permission(&ctx, &headers, &namespace_id, &service_name)?;

    ctx.manager
        .delete_service(&namespace_id, &service_name)
        .await?;
    Ok("ok".into_response())
}

pub async fn detail(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<ServiceParams>,
) -> Result<Json<Value>> {
    let (namespace_id, service_name) = params.target()?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Read),
    )?;

    let service = ctx
        .manager
        .get_service(&namespace_id, &service_name)
        .ok_or_else(|| NamingError::not_found(format!("service {service_name} is not found")))?;
    let (group_name, name) = keys::split_grouped_name(&service.name);
    let clusters: Vec<&Cluster> = service.cluster_map.values().collect();
    Ok(Json(json!({
        "namespaceId": service.namespace_id,
        "name": name,
        "groupName": group_name,
        "protectThreshold": service.protect_threshold,
        "enabled": service.enabled,
        "selector": service.selector,
        "metadata": service.metadata,
        "clusters": clusters,
        "instanceCount": service.instance_count(),
        "checksum": service.checksum(),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub namespace_id: Option<String>,
    /// One-based.
    pub page_no: Option<usize>,
    pub page_size: Option<usize>,
    pub keyword: Option<String>,
    pub instance: Option<String>,
    #[serde(default)]
    pub has_ip_count: bool,
}

pub async fn list(
    Extension(ctx): Extension<Arc<Context>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
    let namespace_id = namespace_or_default(params.namespace_id);
    let query = ServiceQuery {
        start_page: params.page_no.unwrap_or(1).saturating_sub(1),
        page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        keyword: params.keyword,
        contained_instance: params.instance,
        has_ip_count: params.has_ip_count,
    };
    let (count, page) = ctx.manager.get_paged_services(&namespace_id, &query);
    let doms: Vec<String> = page.into_iter().map(|s| s.name).collect();
    Ok(Json(json!({ "count": count, "doms": doms })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub expr: String,
}

pub async fn search(
    Extension(ctx): Extension<Arc<Context>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>> {
    let namespace_id = namespace_or_default(params.namespace_id);
    let expr = if params.expr.is_empty() { ".*" } else { params.expr.as_str() };
    let doms = ctx.manager.search_services(&namespace_id, expr)?;
    Ok(Json(json!({ "count": doms.len(), "doms": doms })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterParams {
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    pub group_name: Option<String>,
    #[serde(default)]
    pub cluster_name: String,
    pub check_port: Option<u16>,
    #[serde(rename = "useInstancePort4Check")]
    pub use_instance_port_for_check: Option<bool>,
    /// JSON, e.g. `{"type":"HTTP","path":"/health"}`.
    pub health_checker: Option<String>,
    pub metadata: Option<String>,
    pub access_token: Option<String>,
}

pub async fn update_cluster(
    Extension(ctx): Extension<Arc<Context>>,
    headers: HeaderMap,
    Query(params): Query<ClusterParams>,
) -> Result<Response> {
    let namespace_id = namespace_or_default(params.namespace_id.clone());
    let service_name = grouped_service_name(&params.service_name, params.group_name.as_deref())?;
    authorize(
        &ctx,
        &headers,
        params.access_token.as_deref(),
        Permission::service(&namespace_id, &service_name, Action::Write),
    )?;
    if params.cluster_name.is_empty() {
        return Err(NamingError::invalid("clusterName is required"));
    }

    let mut cluster = Cluster::new(&params.cluster_name, &service_name);
    if let Some(raw) = params.health_checker.as_deref().filter(|h| !h.trim().is_empty()) {
        let checker: HealthChecker =
            serde_json::from_str(raw).map_err(|e| NamingError::invalid(format!("bad healthChecker: {e}")))?;
        cluster = cluster.with_health_checker(checker);
    }
    if let Some(port) = params.check_port {
        cluster.default_check_port = port;
    }
    if let Some(use_port) = params.use_instance_port_for_check {
        cluster.use_instance_port_for_check = use_port;
    }
    if let Some(metadata) = params.metadata.as_deref() {
        cluster.metadata = parse_metadata(metadata)?;
    }

    ctx.manager
        .update_cluster(&namespace_id, &service_name, cluster)
        .await?;
    Ok("ok".into_response())
}
