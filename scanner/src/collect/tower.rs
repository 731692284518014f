//! Ansible Tower and Ansible Automation Platform controllers.

use std::collections::BTreeSet;

use async_trait::async_trait;
use facts::{HostStatus, InspectResult, RawFacts};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::ApiTarget;
use crate::{ApiError, HttpClient, TaskContext, TaskError};

/// An authenticated session with a controller.
#[async_trait]
pub trait TowerApi: Send + Sync {
    /// GET a path (which may carry a query string) and decode the JSON body.
    async fn get(&self, path: &str) -> Result<Value, ApiError>;
}

#[async_trait]
impl TowerApi for HttpClient {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.get_json(path).await
    }
}

pub(super) async fn connect(ctx: &TaskContext, target: ApiTarget) -> Result<(), TaskError> {
    let api = ctx.backends().apis.tower(&target).await?;
    api.get("/api/v2/me/").await?;
    Ok(())
}

/// Follow `next` links from `path`, collecting `results`, stopping once `limit` rows are collected.
async fn paginate(
    ctx: &TaskContext,
    api: &dyn TowerApi,
    path: String,
    limit: Option<usize>,
) -> Result<Vec<Value>, TaskError> {
    let mut rows = Vec::new();
    let mut next = Some(path);
    while let Some(path) = next {
        ctx.check_canceled()?;
        let page = api.get(&path).await?;
        let results = page
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| TaskError::protocol(path.as_str(), &page.to_string()))?;
        rows.extend(results.iter().cloned());
        if let Some(limit) = limit.filter(|limit| rows.len() >= *limit) {
            rows.truncate(limit);
            break;
        }
        next = page
            .get("next")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_owned);
    }
    Ok(rows)
}

fn names(rows: &[Value], field: &str) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|row| row.get(field).and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

pub(super) async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let target = ctx.api_target()?;
    let api = ctx.backends().apis.tower(&target).await?;
    let api = api.as_ref();
    let page_size = ctx.settings().page_size().max(1);
    ctx.set_count(1)?;
    let group = ctx.open_group()?;

    ctx.check_canceled()?;
    let ping = api.get("/api/v2/ping/").await?;
    let instance_details = json!({
        "version": ping.get("version"),
        "active_node": ping.get("active_node"),
        "install_uuid": ping.get("install_uuid"),
    });

    let hosts = paginate(ctx, api, format!("/api/v2/hosts/?page_size={page_size}"), None).await?;
    let hosts_fact = hosts
        .iter()
        .map(|host| {
            json!({
                "name": host.get("name"),
                "host_id": host.get("id"),
                "created": host.get("created"),
                "modified": host.get("modified"),
                "last_job": host.get("last_job"),
            })
        })
        .collect::<Vec<_>>();

    let max_jobs = ctx.settings().features().ansible_max_jobs();
    let jobs = paginate(
        ctx,
        api,
        format!("/api/v2/jobs/?page_size={page_size}&order_by=-finished"),
        Some(max_jobs),
    )
    .await?;
    let job_ids = jobs.iter().filter_map(|job| job.get("id").and_then(Value::as_u64)).collect::<Vec<_>>();

    let mut unique_hosts = BTreeSet::new();
    for id in &job_ids {
        let summaries = paginate(
            ctx,
            api,
            format!("/api/v2/jobs/{id}/job_host_summaries/?page_size={page_size}"),
            None,
        )
        .await?;
        unique_hosts.extend(names(&summaries, "host_name"));
    }
    debug!(jobs = job_ids.len(), hosts = unique_hosts.len(), "collected job hosts");

    let in_inventory = names(&hosts, "name");
    let only_in_jobs = unique_hosts.difference(&in_inventory).cloned().collect::<BTreeSet<_>>();

    let mut facts = RawFacts::new();
    facts.insert(String::from("instance_details"), instance_details);
    facts.insert(String::from("hosts"), Value::Array(hosts_fact));
    facts.insert(
        String::from("jobs"),
        json!({"unique_hosts": unique_hosts, "job_ids": job_ids}),
    );
    facts.insert(
        String::from("comparison"),
        json!({
            "hosts_in_inventory": in_inventory,
            "hosts_only_in_jobs": only_in_jobs,
            "number_of_hosts_in_inventory": in_inventory.len(),
            "number_of_hosts_only_in_jobs": only_in_jobs.len(),
        }),
    );

    info!(hosts = hosts.len(), jobs = job_ids.len(), "inspected ansible controller");
    ctx.record_inspection(group, InspectResult::from_facts(target.host, HostStatus::Success, facts))
}
