//! Source collectors: the connect and inspect phases of every source kind.
//!
//! Collection dispatches over [`SourceKind`]; each kind has a module exposing `connect` and `inspect`.
//! API sources reach their servers through the traits in each module
//! ([`SatelliteApi`], [`VcenterApi`], [`OpenShiftApi`], [`TowerApi`], [`RhacsApi`]),
//! built by an [`ApiConnector`] so that tests can substitute in-process servers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use facts::{Credential, HostStatus, SourceKind, SourceOptions};
use futures::Future;
use tracing::{info, warn};

use crate::{ansible::AnsibleRunner, ApiError, TaskContext, TaskError};

mod network;
mod openshift;
mod rhacs;
mod satellite;
mod tower;
mod vcenter;

pub use network::extra_vars;
pub use openshift::{ListPage, OpenShiftApi};
pub use rhacs::RhacsApi;
pub use satellite::{HostPage, SatelliteApi, SatelliteFlavor, SatelliteHost};
pub use tower::TowerApi;
pub use vcenter::{ManagedObject, ObjectPage, VcenterApi};

/// Where and how to reach an API source.
#[derive(Clone, Debug)]
pub struct ApiTarget {
    /// Host name or address of the server.
    pub host: String,

    /// Port of the server.
    pub port: u16,

    /// The source's credential.
    pub credential: Credential,

    /// TLS options.
    pub options: SourceOptions,

    /// Per-request timeout.
    pub timeout: Duration,
}

/// Opens sessions with API sources.
#[async_trait]
pub trait ApiConnector: Send + Sync {
    /// Open a Satellite session, selecting the server flavor.
    async fn satellite(&self, target: &ApiTarget) -> Result<Box<dyn SatelliteApi>, ApiError>;

    /// Open a vCenter session.
    async fn vcenter(&self, target: &ApiTarget) -> Result<Box<dyn VcenterApi>, ApiError>;

    /// Open an OpenShift session.
    async fn openshift(&self, target: &ApiTarget) -> Result<Box<dyn OpenShiftApi>, ApiError>;

    /// Open an Ansible controller session.
    async fn tower(&self, target: &ApiTarget) -> Result<Box<dyn TowerApi>, ApiError>;

    /// Open an RHACS session.
    async fn rhacs(&self, target: &ApiTarget) -> Result<Box<dyn RhacsApi>, ApiError>;
}

/// Opens sessions over HTTP.
#[derive(Copy, Clone, Debug, Default)]
pub struct HttpConnector;

#[async_trait]
impl ApiConnector for HttpConnector {
    async fn satellite(&self, target: &ApiTarget) -> Result<Box<dyn SatelliteApi>, ApiError> {
        satellite::open(target).await
    }

    async fn vcenter(&self, target: &ApiTarget) -> Result<Box<dyn VcenterApi>, ApiError> {
        vcenter::open(target).await
    }

    async fn openshift(&self, target: &ApiTarget) -> Result<Box<dyn OpenShiftApi>, ApiError> {
        openshift::open(target).await
    }

    async fn tower(&self, target: &ApiTarget) -> Result<Box<dyn TowerApi>, ApiError> {
        Ok(Box::new(crate::HttpClient::new(target)?))
    }

    async fn rhacs(&self, target: &ApiTarget) -> Result<Box<dyn RhacsApi>, ApiError> {
        Ok(Box::new(crate::HttpClient::new(target)?))
    }
}

/// The external systems tasks talk to.
#[derive(Clone)]
pub struct Backends {
    /// Runs playbooks for network sources.
    pub ansible: Arc<dyn AnsibleRunner>,

    /// Opens API source sessions.
    pub apis: Arc<dyn ApiConnector>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Run the connect phase for the task's source.
pub async fn connect(ctx: &TaskContext) -> Result<(), TaskError> {
    let kind = ctx.source()?.kind();
    match kind {
        SourceKind::Network => network::connect(ctx).await,
        SourceKind::Satellite => api_connect(ctx, satellite::connect).await,
        SourceKind::Vcenter => api_connect(ctx, vcenter::connect).await,
        SourceKind::Openshift => api_connect(ctx, openshift::connect).await,
        SourceKind::Ansible => api_connect(ctx, tower::connect).await,
        SourceKind::Rhacs => api_connect(ctx, rhacs::connect).await,
    }
}

/// Run the inspect phase for the task's source.
pub async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let kind = ctx.source()?.kind();
    match kind {
        SourceKind::Network => network::inspect(ctx).await,
        SourceKind::Satellite => satellite::inspect(ctx).await,
        SourceKind::Vcenter => vcenter::inspect(ctx).await,
        SourceKind::Openshift => openshift::inspect(ctx).await,
        SourceKind::Ansible => tower::inspect(ctx).await,
        SourceKind::Rhacs => rhacs::inspect(ctx).await,
    }
}

/// Connect to an API source: one handshake with the server, recorded as one connection result.
async fn api_connect<'a, F, Fut>(ctx: &'a TaskContext, handshake: F) -> Result<(), TaskError>
where
    F: FnOnce(&'a TaskContext, ApiTarget) -> Fut,
    Fut: Future<Output = Result<(), TaskError>> + 'a,
{
    let target = ctx.api_target()?;
    let host = target.host.clone();
    let credential = target.credential.id();
    ctx.set_count(1)?;
    ctx.check_canceled()?;

    match handshake(ctx, target).await {
        Ok(()) => {
            info!(%host, "connected");
            ctx.record_connection(&host, HostStatus::Success, Some(credential))
        }
        Err(TaskError::Canceled) => Err(TaskError::Canceled),
        Err(err) => {
            warn!(%host, "connect failed: {err}");
            let status = match err {
                TaskError::Unreachable { .. } | TaskError::Timeout { .. } => HostStatus::Unreachable,
                _ => HostStatus::Failed,
            };
            ctx.record_connection(&host, status, Some(credential))?;
            Err(err)
        }
    }
}

/// Treat a missing optional server API as an empty result.
pub(crate) fn optional<T: Default>(resource: &str, result: Result<T, ApiError>) -> Result<T, TaskError> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_not_found() => {
            info!("{}", TaskError::OptionalResourceMissing { resource: resource.to_owned() });
            Ok(T::default())
        }
        Err(err) => Err(err.into()),
    }
}
