//! OpenShift clusters: one cluster result plus one result per node.
//!
//! Operators, workloads, and ACM managed clusters are optional:
//! each is gated by a feature flag, and a server without the API yields an empty list.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use facts::{HostStatus, InspectResult, RawFacts};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{optional, ApiTarget};
use crate::{ApiError, HttpClient, TaskContext, TaskError};

/// One page of a Kubernetes list call.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ListPage {
    /// Items on this page.
    pub items: Vec<Value>,

    /// The `continue` token; `None` on the last page.
    pub token: Option<String>,
}

/// An authenticated session with a cluster's API server.
#[async_trait]
pub trait OpenShiftApi: Send + Sync {
    /// GET a single resource.
    async fn get(&self, path: &str) -> Result<Value, ApiError>;

    /// List a collection, `limit` items at a time.
    async fn list(&self, path: &str, limit: usize, token: Option<&str>) -> Result<ListPage, ApiError>;
}

#[async_trait]
impl OpenShiftApi for HttpClient {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.get_json(path).await
    }

    async fn list(&self, path: &str, limit: usize, token: Option<&str>) -> Result<ListPage, ApiError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(token) = token {
            query.push(("continue", token.to_owned()));
        }
        let response = self.get_json_query(path, &query).await?;
        let items = response
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ApiError::protocol(self.url(path), "list without items", &response.to_string()))?;
        let token = response
            .pointer("/metadata/continue")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_owned);
        Ok(ListPage { items, token })
    }
}

const CHALLENGING_CLIENT: &str = "openshift-challenging-client";

pub(super) async fn open(target: &ApiTarget) -> Result<Box<dyn OpenShiftApi>, ApiError> {
    let http = HttpClient::new(target)?;
    if target.credential.auth_token().is_some() {
        return Ok(Box::new(http));
    }

    let discovery = http.get_json("/.well-known/oauth-authorization-server").await?;
    let endpoint = discovery
        .get("authorization_endpoint")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ApiError::protocol(
                http.url("/.well-known/oauth-authorization-server"),
                "no authorization_endpoint",
                &discovery.to_string(),
            )
        })?;
    let url = format!("{endpoint}?client_id={CHALLENGING_CLIENT}&response_type=token");
    let location = http.location(&url, &[("X-CSRF-Token", "1")]).await?;
    let token = location
        .split_once('#')
        .map(|(_, fragment)| fragment)
        .into_iter()
        .flat_map(|fragment| fragment.split('&'))
        .find_map(|pair| pair.strip_prefix("access_token="))
        .ok_or_else(|| ApiError::Unauthorized { url: url.clone(), status: 302 })?
        .to_owned();
    debug!("logged in with the challenging client");
    Ok(Box::new(http.with_bearer(token)))
}

pub(super) async fn connect(ctx: &TaskContext, target: ApiTarget) -> Result<(), TaskError> {
    let api = ctx.backends().apis.openshift(&target).await?;
    let version = api.get("/version").await?;
    info!(version = %version.get("gitVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"), "openshift session open");
    Ok(())
}

async fn drain(
    ctx: &TaskContext,
    api: &dyn OpenShiftApi,
    path: &str,
    first: ListPage,
) -> Result<Vec<Value>, TaskError> {
    let limit = ctx.settings().page_size().max(1);
    let mut items = first.items;
    let mut token = first.token;
    while let Some(next) = token {
        ctx.check_canceled()?;
        let page = api.list(path, limit, Some(&next)).await?;
        items.extend(page.items);
        token = page.token;
    }
    Ok(items)
}

async fn list_all(ctx: &TaskContext, api: &dyn OpenShiftApi, path: &str) -> Result<Vec<Value>, TaskError> {
    ctx.check_canceled()?;
    let first = api.list(path, ctx.settings().page_size().max(1), None).await?;
    drain(ctx, api, path, first).await
}

async fn list_optional(
    ctx: &TaskContext,
    api: &dyn OpenShiftApi,
    resource: &str,
    path: &str,
) -> Result<Vec<Value>, TaskError> {
    ctx.check_canceled()?;
    let first = api.list(path, ctx.settings().page_size().max(1), None).await.map(Some);
    match optional(resource, first)? {
        Some(first) => drain(ctx, api, path, first).await,
        None => Ok(Vec::new()),
    }
}

fn text<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Parse a Kubernetes quantity such as `4`, `500m`, or `16Gi`.
fn quantity(value: &str) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("m", 0.001),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];
    let value = value.trim();
    for (suffix, scale) in SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * scale);
        }
    }
    value.parse().ok()
}

fn resources(value: Option<&Value>) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };
    let field = |name: &str| value.get(name).and_then(Value::as_str).and_then(quantity);
    json!({
        "cpu": field("cpu"),
        "memory_in_bytes": field("memory").map(|bytes| bytes as u64),
        "pods": field("pods").map(|pods| pods as u64),
    })
}

fn node_fact(node: &Value, cluster_uuid: &str) -> Value {
    let taints = node
        .pointer("/spec/taints")
        .and_then(Value::as_array)
        .map(|taints| {
            taints
                .iter()
                .map(|taint| json!({"key": taint.get("key"), "effect": taint.get("effect")}))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    json!({
        "name": text(node, "/metadata/name"),
        "creation_timestamp": text(node, "/metadata/creationTimestamp"),
        "labels": node.pointer("/metadata/labels").cloned().unwrap_or_else(|| json!({})),
        "taints": taints,
        "capacity": resources(node.pointer("/status/capacity")),
        "allocatable": resources(node.pointer("/status/allocatable")),
        "addresses": node.pointer("/status/addresses").cloned().unwrap_or_else(|| json!([])),
        "architecture": text(node, "/status/nodeInfo/architecture"),
        "kernel_version": text(node, "/status/nodeInfo/kernelVersion"),
        "machine_id": text(node, "/status/nodeInfo/machineID"),
        "operating_system": text(node, "/status/nodeInfo/operatingSystem"),
        "cluster_uuid": cluster_uuid,
    })
}

async fn operators(ctx: &TaskContext, api: &dyn OpenShiftApi) -> Result<Vec<Value>, TaskError> {
    let cluster_operators = list_optional(
        ctx,
        api,
        "cluster operators",
        "/apis/config.openshift.io/v1/clusteroperators",
    )
    .await?;
    let subscriptions = list_optional(
        ctx,
        api,
        "olm subscriptions",
        "/apis/operators.coreos.com/v1alpha1/subscriptions",
    )
    .await?;
    let csvs = list_optional(
        ctx,
        api,
        "cluster service versions",
        "/apis/operators.coreos.com/v1alpha1/clusterserviceversions",
    )
    .await?;
    let csvs = csvs
        .iter()
        .filter_map(|csv| Some((text(csv, "/metadata/name")?, csv)))
        .collect::<BTreeMap<_, _>>();

    let mut operators = cluster_operators
        .iter()
        .filter_map(|operator| {
            let name = text(operator, "/metadata/name")?;
            let version = operator
                .pointer("/status/versions")
                .and_then(Value::as_array)
                .and_then(|versions| {
                    versions
                        .iter()
                        .find(|v| v.get("name").and_then(Value::as_str) == Some("operator"))
                })
                .and_then(|v| v.get("version"))
                .cloned();
            Some(json!({"name": name, "kind": "cluster-operator", "version": version}))
        })
        .collect::<Vec<_>>();

    operators.extend(subscriptions.iter().filter_map(|subscription| {
        let name = text(subscription, "/spec/name")?;
        let csv = text(subscription, "/status/installedCSV").and_then(|csv| csvs.get(csv));
        Some(json!({
            "name": name,
            "kind": "olm-operator",
            "namespace": text(subscription, "/metadata/namespace"),
            "package": text(subscription, "/status/installedCSV"),
            "channel": text(subscription, "/spec/channel"),
            "version": csv.and_then(|csv| text(csv, "/spec/version")),
            "display_name": csv.and_then(|csv| text(csv, "/spec/displayName")),
        }))
    }));
    Ok(operators)
}

/// Roll pods up into applications per namespace.
fn workloads(pods: &[Value]) -> Vec<Value> {
    let mut apps = BTreeMap::<(String, String), BTreeSet<String>>::new();
    for pod in pods {
        let namespace = text(pod, "/metadata/namespace").unwrap_or_default().to_owned();
        let app = text(pod, "/metadata/labels/app.kubernetes.io~1name")
            .or_else(|| text(pod, "/metadata/labels/app"))
            .or_else(|| text(pod, "/metadata/ownerReferences/0/name"))
            .or_else(|| text(pod, "/metadata/name"))
            .unwrap_or_default()
            .to_owned();
        let images = pod
            .pointer("/spec/containers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|container| container.get("image").and_then(Value::as_str))
            .map(str::to_owned);
        apps.entry((namespace, app)).or_default().extend(images);
    }
    apps.into_iter()
        .map(|((namespace, app_name), images)| {
            json!({"namespace": namespace, "app_name": app_name, "container_images": images})
        })
        .collect()
}

fn acm_metric(cluster: &Value) -> Value {
    let available = cluster
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .any(|c| {
            c.get("type").and_then(Value::as_str) == Some("ManagedClusterConditionAvailable")
                && c.get("status").and_then(Value::as_str) == Some("True")
        });
    let capacity = |name: &str| {
        cluster
            .pointer(&format!("/status/capacity/{name}"))
            .and_then(Value::as_str)
            .and_then(quantity)
    };
    json!({
        "name": text(cluster, "/metadata/name"),
        "managed_cluster_id": text(cluster, "/metadata/labels/clusterID"),
        "vendor": text(cluster, "/metadata/labels/vendor"),
        "cloud": text(cluster, "/metadata/labels/cloud"),
        "version": text(cluster, "/metadata/labels/openshiftVersion"),
        "created_via": text(cluster, "/metadata/annotations/open-cluster-management~1created-via"),
        "available": available,
        "core_worker": capacity("core_worker"),
        "socket_worker": capacity("socket_worker"),
    })
}

pub(super) async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let target = ctx.api_target()?;
    let api = ctx.backends().apis.openshift(&target).await?;
    let api = api.as_ref();
    let features = ctx.settings().features();

    ctx.check_canceled()?;
    let version = api.get("/apis/config.openshift.io/v1/clusterversions/version").await?;
    let uuid = text(&version, "/spec/clusterID").unwrap_or_default().to_owned();
    let cluster_version = text(&version, "/status/desired/version")
        .or_else(|| text(&version, "/status/history/0/version"))
        .map(str::to_owned);

    let nodes = list_all(ctx, api, "/api/v1/nodes").await?;
    ctx.set_count(1 + nodes.len() as u64)?;
    let group = ctx.open_group()?;

    let mut cluster = RawFacts::new();
    cluster.insert(String::from("cluster"), json!({"uuid": uuid, "version": cluster_version}));
    if features.openshift_operators() {
        cluster.insert(String::from("operators"), json!(operators(ctx, api).await?));
    }
    if features.openshift_workloads() {
        let pods = list_all(ctx, api, "/api/v1/pods").await?;
        cluster.insert(String::from("workloads"), json!(workloads(&pods)));
    }
    if features.openshift_acm_metrics() {
        let managed = list_optional(
            ctx,
            api,
            "acm managed clusters",
            "/apis/cluster.open-cluster-management.io/v1/managedclusters",
        )
        .await?;
        cluster.insert(
            String::from("acm_metrics"),
            Value::Array(managed.iter().map(acm_metric).collect()),
        );
    }

    let cluster_name = if uuid.is_empty() { target.host.clone() } else { uuid.clone() };
    info!(cluster = %cluster_name, nodes = nodes.len(), "inspected openshift cluster");
    ctx.record_inspection(group, InspectResult::from_facts(cluster_name, HostStatus::Success, cluster))?;

    for node in &nodes {
        let name = text(node, "/metadata/name").unwrap_or_default();
        let mut facts = RawFacts::new();
        facts.insert(String::from("node"), node_fact(node, &uuid));
        ctx.record_inspection(group, InspectResult::from_facts(name, HostStatus::Success, facts))?;
    }
    Ok(())
}
