//! Runs one scan task: prerequisites, status transitions, and the source-specific body.

use std::sync::Arc;

use facts::{
    Credential, CredentialId, GroupId, HostStatus, InspectGroup, InspectResult, ScanJob, ScanTask, Source,
    StatKind, StatsUpdate, Status, Store, SystemConnectionResult, TaskKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    collect::{self, ApiTarget, Backends},
    deployments, JobLogs, Settings, TaskError,
};

/// Everything a task body needs: the store, configuration, backends, and the task being run.
#[derive(Debug)]
pub struct TaskContext {
    store: Arc<Store>,
    settings: Arc<Settings>,
    backends: Backends,
    logs: JobLogs,
    job: ScanJob,
    task: ScanTask,
    source: Option<Source>,
    cancel: CancellationToken,
}

impl TaskContext {
    /// The store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The configuration.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The external systems.
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Per-job log streams.
    pub fn logs(&self) -> &JobLogs {
        &self.logs
    }

    /// The job the task belongs to.
    pub fn job(&self) -> &ScanJob {
        &self.job
    }

    /// The task being run.
    pub fn task(&self) -> &ScanTask {
        &self.task
    }

    /// The job's cancel token.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The upper bound on hosts handled in parallel.
    pub fn max_concurrency(&self) -> usize {
        self.job.options().max_concurrency().max(1)
    }

    /// Fail with [`TaskError::Canceled`] if the job's cancel token is set.
    pub fn check_canceled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }

    /// The task's source.
    pub fn source(&self) -> Result<&Source, TaskError> {
        self.source
            .as_ref()
            .ok_or_else(|| TaskError::Validation(format!("{} task has no source", self.task.kind())))
    }

    /// The source's credentials, in order.
    pub fn credentials(&self) -> Result<Vec<Credential>, TaskError> {
        self.source()?
            .credentials()
            .iter()
            .map(|id| self.store.credential(*id).map_err(TaskError::from))
            .collect()
    }

    /// Connection details of an API source.
    pub fn api_target(&self) -> Result<ApiTarget, TaskError> {
        let source = self.source()?;
        let host = source
            .api_host()
            .ok_or_else(|| TaskError::Validation(format!("source '{}' has no host", source.name())))?;
        let credential = self
            .credentials()?
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::Validation(format!("source '{}' has no credential", source.name())))?;
        Ok(ApiTarget {
            host: host.to_owned(),
            port: source.port(),
            credential,
            options: source.options().clone(),
            timeout: self.settings.http_timeout(),
        })
    }

    /// Set the number of hosts the task will handle.
    pub fn set_count(&self, count: u64) -> Result<(), TaskError> {
        self.store
            .update_stats(self.task.id(), StatsUpdate::builder().systems_count(count).build())?;
        Ok(())
    }

    fn count(&self, status: HostStatus) -> Result<(), TaskError> {
        let kind = match status {
            HostStatus::Success => StatKind::Scanned,
            HostStatus::Failed | HostStatus::Unknown => StatKind::Failed,
            HostStatus::Unreachable => StatKind::Unreachable,
        };
        self.store.increment_stats(self.task.id(), kind)?;
        Ok(())
    }

    /// Record the connection outcome of one host and count it.
    pub fn record_connection(
        &self,
        host: &str,
        status: HostStatus,
        credential: Option<CredentialId>,
    ) -> Result<(), TaskError> {
        let source = self.source()?.id();
        let result = match credential {
            Some(credential) => SystemConnectionResult::builder()
                .task(self.task.id())
                .source(source)
                .name(host)
                .status(status)
                .credential(credential)
                .build(),
            None => SystemConnectionResult::builder()
                .task(self.task.id())
                .source(source)
                .name(host)
                .status(status)
                .build(),
        };
        self.store.record_connection(result)?;
        self.count(status)
    }

    /// Hosts the prerequisite connect task reached, with the credential that worked.
    pub fn connected_hosts(&self) -> Vec<(String, Option<CredentialId>)> {
        self.task
            .prerequisites()
            .iter()
            .flat_map(|task| self.store.connection_results(*task))
            .filter(|result| result.status() == HostStatus::Success)
            .map(|result| (result.name().clone(), result.credential()))
            .collect()
    }

    /// Open the inspection group this task writes into.
    pub fn open_group(&self) -> Result<GroupId, TaskError> {
        let source = self.source()?;
        let group = InspectGroup::builder()
            .source_type(source.kind())
            .source_name(source.name().clone())
            .server_id(self.settings.server_id().clone())
            .server_version(self.settings.server_version().clone())
            .source(source.id())
            .task(self.task.id())
            .build();
        Ok(self.store.add_group(group)?)
    }

    /// Record the inspection of one host and count it.
    pub fn record_inspection(&self, group: GroupId, result: InspectResult) -> Result<(), TaskError> {
        let status = result.status();
        self.store.record_inspection(group, result)?;
        self.count(status)
    }
}

/// Runs scan tasks.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    store: Arc<Store>,
    settings: Arc<Settings>,
    backends: Backends,
    logs: JobLogs,
}

impl TaskRunner {
    /// Build a runner over shared state.
    pub fn new(store: Arc<Store>, settings: Arc<Settings>, backends: Backends) -> Self {
        let logs = JobLogs::new(settings.log_dir().clone());
        Self {
            store,
            settings,
            backends,
            logs,
        }
    }

    /// The store tasks write into.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The configuration tasks run with.
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// The log streams tasks write into.
    pub fn logs(&self) -> &JobLogs {
        &self.logs
    }

    /// Run a task to a terminal status, returning its status message and status.
    ///
    /// Errors never escape: whatever happens is recorded on the task.
    #[instrument(skip_all, fields(job = %task.job(), task = %task.id(), kind = %task.kind()))]
    pub async fn run(&self, task: ScanTask, cancel: &CancellationToken) -> (String, Status) {
        let id = task.id();
        let (message, status) = match self.execute(task, cancel).await {
            Ok(outcome) => outcome,
            Err(err) => (err.to_string(), Status::Failed),
        };

        if let Ok(task) = self.store.task(id) {
            if !task.status().is_terminal() {
                self.finish(&task, status, &message);
            }
        }
        (message, status)
    }

    async fn execute(&self, task: ScanTask, cancel: &CancellationToken) -> Result<(String, Status), TaskError> {
        let job = self.store.job(task.job())?;
        let source = task.source().map(|id| self.store.source(id)).transpose()?;
        let source_name = source.as_ref().map(|s| s.name().clone()).unwrap_or_default();

        if cancel.is_cancelled() {
            let message = TaskError::Canceled.to_string();
            self.finish(&task, Status::Canceled, &message);
            return Ok((message, Status::Canceled));
        }

        for prerequisite in task.prerequisites() {
            let status = self.store.task(*prerequisite)?.status();
            if status != Status::Completed {
                let message = TaskError::Prerequisite {
                    task: *prerequisite,
                    status,
                }
                .to_string();
                self.finish(&task, Status::Failed, &message);
                return Ok((message, Status::Failed));
            }
        }

        let task = self.store.reset_task(task.id())?;
        let task = self.store.set_task_status(task.id(), Status::Running, "Task is running.")?;
        info!(
            job = %job.id(),
            task = %task.id(),
            source = %source_name,
            kind = %task.kind(),
            "task running"
        );

        let ctx = TaskContext {
            store: self.store.clone(),
            settings: self.settings.clone(),
            backends: self.backends.clone(),
            logs: self.logs.clone(),
            job,
            task: task.clone(),
            source,
            cancel: cancel.clone(),
        };

        let body = match task.kind() {
            TaskKind::Connect => collect::connect(&ctx).await,
            TaskKind::Inspect => collect::inspect(&ctx).await,
            TaskKind::Fingerprint => deployments::run(&ctx).await,
        };

        let stats = self.store.task(task.id())?.stats();
        let (message, status) = match body {
            Ok(()) if stats.systems_count() > 0 && stats.systems_scanned() == 0 && task.kind() != TaskKind::Fingerprint => {
                let err = TaskError::NoHostsScanned {
                    failed: stats.systems_failed(),
                    unreachable: stats.systems_unreachable(),
                };
                (err.to_string(), Status::Failed)
            }
            Ok(()) => (
                format!(
                    "{} of {} systems handled successfully.",
                    stats.systems_scanned(),
                    stats.systems_count()
                ),
                Status::Completed,
            ),
            Err(TaskError::Canceled) => (TaskError::Canceled.to_string(), Status::Canceled),
            Err(err) => (err.to_string(), Status::Failed),
        };

        self.finish(&task, status, &message);
        Ok((message, status))
    }

    fn finish(&self, task: &ScanTask, status: Status, message: &str) {
        self.reconcile(task);
        match self.store.set_task_status(task.id(), status, message) {
            Ok(task) => {
                let stats = task.stats();
                info!(
                    job = %task.job(),
                    task = %task.id(),
                    kind = %task.kind(),
                    %status,
                    scanned = stats.systems_scanned(),
                    failed = stats.systems_failed(),
                    unreachable = stats.systems_unreachable(),
                    "task {status}: {message}"
                );
            }
            Err(err) => warn!(task = %task.id(), "record task status: {err}"),
        }
    }

    /// A task that stops early never handles some of its hosts; its count becomes what it handled.
    fn reconcile(&self, task: &ScanTask) {
        let Ok(current) = self.store.task(task.id()) else {
            return;
        };
        let stats = current.stats();
        if !stats.is_balanced() {
            let update = StatsUpdate::builder().systems_count(stats.handled()).build();
            if let Err(err) = self.store.update_stats(task.id(), update) {
                warn!(task = %task.id(), "reconcile task stats: {err}");
            }
        }
    }
}
