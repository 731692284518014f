//! One instance of the pipeline: a store, an executor, and the operations behind each subcommand.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use facts::{AggregateReport, JobId, ReportId, ScanJob, Status, Store};
use report::{details, tarball, DetailsReport};
use scanner::{
    ansible::ProcessRunner,
    collect::{Backends, HttpConnector},
    JobExecutor, JobLogs, JobRunner, Settings, TaskRunner,
};
use tokio::signal;
use tracing::{info, warn};

use crate::inventory::Inventory;

/// A running pipeline.
#[derive(Debug)]
pub struct Instance {
    store: Arc<Store>,
    settings: Arc<Settings>,
    executor: JobExecutor,
}

impl Instance {
    /// Start an instance whose tasks use `backends`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(settings: Settings, backends: Backends) -> Self {
        let store = Arc::new(Store::new());
        let settings = Arc::new(settings);
        let runner = TaskRunner::new(store.clone(), settings.clone(), backends);
        let (executor, _worker) = JobExecutor::start(JobRunner::new(runner));
        Self {
            store,
            settings,
            executor,
        }
    }

    /// Start an instance that runs Ansible as a subprocess and talks to sources over HTTP.
    pub fn start_default(settings: Settings) -> Self {
        let ansible = ProcessRunner::new(
            settings.runner_program().clone(),
            settings.playbook_dir().clone(),
            JobLogs::new(settings.log_dir().clone()),
        );
        let backends = Backends {
            ansible: Arc::new(ansible),
            apis: Arc::new(HttpConnector),
        };
        Self::start(settings, backends)
    }

    /// The store backing this instance.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run a job to a terminal status. An interrupt signal cancels the job.
    pub async fn run_job(&self, job: JobId) -> Result<ScanJob> {
        self.executor.submit(job).context("queue job")?;
        tokio::select! {
            finished = self.executor.wait(job) => finished.context("wait for job"),
            _ = signal::ctrl_c() => {
                warn!(%job, "interrupted, canceling job");
                self.executor.cancel(job).await.context("cancel job")
            }
        }
    }

    /// Load an inventory and run one of its scans.
    pub async fn scan(&self, inventory: &Inventory, name: &str) -> Result<ScanJob> {
        let scans = inventory.populate(&self.store).context("load inventory")?;
        let Some((_, scan)) = scans.into_iter().find(|(scan, _)| scan == name) else {
            bail!("inventory has no scan named '{name}'");
        };
        let job = self.store.create_job_for_scan(scan).context("create scan job")?;
        info!(%job, scan = name, "starting scan");
        self.run_job(job).await
    }

    /// Upload details files, merge them if there are several, and fingerprint the result.
    ///
    /// Returns the report and the fingerprint job that processed it.
    pub async fn import_details(&self, files: &[PathBuf]) -> Result<(ReportId, ScanJob)> {
        let version = self.settings.server_version().as_str();
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            let payload = std::fs::read(file).with_context(|| format!("read details '{}'", file.display()))?;
            let parsed = DetailsReport::parse(&payload).with_context(|| format!("validate details '{}'", file.display()))?;
            let report = details::upload(&self.store, parsed, version)
                .with_context(|| format!("upload details '{}'", file.display()))?;
            reports.push(report);
        }

        let (report, job) = match reports.as_slice() {
            [] => bail!("no details files given"),
            [report] => (*report, details::fingerprint_job(&self.store, *report).context("create fingerprint job")?),
            many => details::merge(&self.store, many, version).context("merge reports")?,
        };
        let job = self.run_job(job).await?;
        Ok((report, job))
    }

    /// Build a report's aggregate.
    pub fn aggregate(&self, report: ReportId) -> Result<AggregateReport> {
        report::build_aggregate_report(&self.store, report).context("build aggregate report")
    }

    /// Write a report's tarball into `dir`, including the log streams of the job that produced it.
    pub fn write_tarball(&self, report: ReportId, dir: &Path) -> Result<PathBuf> {
        let logs = match self.store.report(report)?.job() {
            Some(job) => JobLogs::new(self.settings.log_dir().clone()).existing(job),
            None => Vec::new(),
        };
        let path = tarball::write(&self.store, report, &logs, dir).context("write report tarball")?;
        info!(%report, path = %path.display(), "wrote report");
        Ok(path)
    }
}

/// Fail unless `job` completed.
pub fn ensure_completed(job: &ScanJob) -> Result<()> {
    if job.status() != Status::Completed {
        bail!("job {} {}: {}", job.id(), job.status(), job.status_message());
    }
    Ok(())
}
