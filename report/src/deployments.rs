use facts::{DeploymentsStatus, ReportId, Store, SystemFingerprint};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// The deployments of a report as rendered.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DeploymentsView {
    /// The report rendered.
    pub report_id: ReportId,

    /// Always `deployments`.
    pub report_type: String,

    /// Version of the software that produced the report.
    pub report_version: String,

    /// Stable external identity of the report.
    pub report_platform_id: Uuid,

    /// Number of inspection groups the fingerprints were built from.
    pub source_count: usize,

    /// Status of fingerprinting; `pending` until a fingerprint task has run.
    pub status: DeploymentsStatus,

    /// One fingerprint per deduplicated host.
    pub system_fingerprints: Vec<SystemFingerprint>,
}

/// Render a report's deployments.
pub fn deployments(store: &Store, id: ReportId) -> Result<DeploymentsView, Error> {
    let report = store.report(id)?;
    let deployments = store.deployments(id)?.unwrap_or_default();
    Ok(DeploymentsView {
        report_id: id,
        report_type: String::from("deployments"),
        report_version: report.report_version().clone(),
        report_platform_id: report.report_platform_id(),
        source_count: report.groups().len(),
        status: deployments.status,
        system_fingerprints: deployments.fingerprints,
    })
}
