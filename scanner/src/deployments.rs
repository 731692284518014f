//! The fingerprint task: builds the job's report and its deployments.

use facts::{DeploymentsReport, DeploymentsStatus, NewReport, StatsUpdate};
use tracing::{info, warn};

use crate::{TaskContext, TaskError};

/// Fingerprint the job's report, creating it from the prerequisite inspect tasks' groups when the job has none.
///
/// Stats count successful host results: those fingerprinted are scanned,
/// those dropped for lack of canonical facts are failed.
pub(crate) async fn run(ctx: &TaskContext) -> Result<(), TaskError> {
    ctx.check_canceled()?;
    let store = ctx.store();
    let job = ctx.job();

    let report = match job.report() {
        Some(report) => report,
        None => {
            let groups = ctx
                .task()
                .prerequisites()
                .iter()
                .flat_map(|task| store.groups_for_task(*task))
                .map(|group| group.id())
                .collect();
            let report = store.create_report(
                NewReport::builder()
                    .report_version(ctx.settings().server_version().clone())
                    .job(job.id())
                    .groups(groups)
                    .build(),
            )?;
            store.set_job_report(job.id(), report)?;
            info!(job = %job.id(), %report, "created report");
            report
        }
    };

    let contents = store.report_contents(report)?;
    let options = job.options();
    let output = match fingerprint::fingerprint(&contents, |product| options.product_enabled(product)) {
        Ok(output) => output,
        Err(err) => {
            let failed = DeploymentsReport {
                status: DeploymentsStatus::Failed,
                fingerprints: Vec::new(),
            };
            if let Err(err) = store.set_deployments(report, failed) {
                warn!(%report, "record failed deployments: {err}");
            }
            return Err(err.into());
        }
    };
    ctx.check_canceled()?;

    store.update_stats(
        ctx.task().id(),
        StatsUpdate::builder()
            .systems_count(output.hosts)
            .systems_scanned(output.hosts - output.dropped)
            .systems_failed(output.dropped)
            .build(),
    )?;
    store.set_deployments(
        report,
        DeploymentsReport {
            status: DeploymentsStatus::Complete,
            fingerprints: output.fingerprints,
        },
    )?;
    Ok(())
}
