//! Red Hat Advanced Cluster Security: secured unit usage.

use async_trait::async_trait;
use facts::{HostStatus, InspectResult, RawFacts};
use serde_json::{json, Value};
use tracing::info;

use super::ApiTarget;
use crate::{ApiError, HttpClient, TaskContext, TaskError};

/// An authenticated session with Central.
#[async_trait]
pub trait RhacsApi: Send + Sync {
    /// GET a path and decode the JSON body.
    async fn get(&self, path: &str) -> Result<Value, ApiError>;
}

#[async_trait]
impl RhacsApi for HttpClient {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.get_json(path).await
    }
}

pub(super) async fn connect(ctx: &TaskContext, target: ApiTarget) -> Result<(), TaskError> {
    let api = ctx.backends().apis.rhacs(&target).await?;
    api.get("/v1/auth/status").await?;
    Ok(())
}

pub(super) async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let target = ctx.api_target()?;
    let api = ctx.backends().apis.rhacs(&target).await?;
    ctx.set_count(1)?;
    let group = ctx.open_group()?;

    ctx.check_canceled()?;
    let current = api.get("/v1/administration/usage/secured-units/current").await?;
    ctx.check_canceled()?;
    let max = api.get("/v1/administration/usage/secured-units/max").await?;

    let mut facts = RawFacts::new();
    facts.insert(
        String::from("secured_units_current"),
        json!({"nodes": current.get("numNodes"), "cpu_units": current.get("numCpuUnits")}),
    );
    facts.insert(
        String::from("secured_units_max"),
        json!({
            "nodes": max.get("maxNodes"),
            "nodes_at": max.get("maxNodesAt"),
            "cpu_units": max.get("maxCpuUnits"),
            "cpu_units_at": max.get("maxCpuUnitsAt"),
        }),
    );
    info!(host = %target.host, "inspected rhacs central");
    ctx.record_inspection(group, InspectResult::from_facts(target.host, HostStatus::Success, facts))
}
