//! Reports with their deployments and cached aggregates.

use std::collections::BTreeMap;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{DeploymentsStatus, GroupId, JobId, ReportId, SystemFingerprint};

/// The top-level report envelope.
#[derive(Clone, PartialEq, Eq, Debug, Getters, CopyGetters, Serialize, Deserialize)]
pub struct Report {
    /// Identifier of the report.
    #[getset(get_copy = "pub")]
    pub(crate) id: ReportId,

    /// Stable external identity of the report.
    #[getset(get_copy = "pub")]
    pub(crate) report_platform_id: Uuid,

    /// Version of the software that produced the report.
    #[getset(get = "pub")]
    pub(crate) report_version: String,

    /// The job whose fingerprint task produced the report, if any.
    #[getset(get_copy = "pub")]
    pub(crate) job: Option<JobId>,

    /// Inspection groups included in the report, in insertion order.
    #[getset(get = "pub")]
    pub(crate) groups: Vec<GroupId>,

    /// When the report was created.
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) created_at: OffsetDateTime,

    /// When the report was last changed.
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) updated_at: OffsetDateTime,

    /// Incremented on every change; cached derivations record the revision they saw.
    #[getset(get_copy = "pub")]
    pub(crate) revision: u64,
}

/// The fingerprints produced for one [`Report`].
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct DeploymentsReport {
    /// Status of fingerprinting.
    pub status: DeploymentsStatus,

    /// One fingerprint per deduplicated host.
    pub fingerprints: Vec<SystemFingerprint>,
}

/// A flat summary of a report's fingerprints and raw facts.
///
/// Maps are ordered so that serializing the same report twice yields identical output.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct AggregateReport {
    pub ansible_hosts_all: u64,
    pub ansible_hosts_in_database: u64,
    pub ansible_hosts_in_jobs: u64,
    pub inspect_result_status_failed: u64,
    pub inspect_result_status_success: u64,
    pub inspect_result_status_unknown: u64,
    pub inspect_result_status_unreachable: u64,
    pub instances_hypervisor: u64,
    pub instances_not_redhat: u64,
    pub instances_physical: u64,
    pub instances_unknown: u64,
    pub instances_virtual: u64,
    pub jboss_eap_cores_physical: f64,
    pub jboss_eap_cores_virtual: f64,
    pub jboss_eap_instances: u64,
    pub jboss_ws_cores_physical: f64,
    pub jboss_ws_cores_virtual: f64,
    pub jboss_ws_instances: u64,
    pub missing_cpu_core_count: u64,
    pub missing_cpu_socket_count: u64,
    pub missing_name: u64,
    pub missing_system_creation_date: u64,
    pub missing_system_purpose: u64,
    pub openshift_cluster_instances: u64,
    pub openshift_cores: u64,
    pub openshift_node_instances: u64,
    pub openshift_operators_by_kind: BTreeMap<String, u64>,
    pub openshift_operators_by_name: BTreeMap<String, u64>,
    pub os_by_name_and_version: BTreeMap<String, BTreeMap<String, u64>>,
    pub socket_pairs: u64,
    pub system_creation_date_average: Option<Date>,
    pub vmware_hosts: u64,
    pub vmware_vm_to_host_ratio: f64,
    pub vmware_vms: u64,
}

/// A cached [`AggregateReport`] and the report revision it was computed from.
#[derive(Clone, PartialEq, Debug, Getters, CopyGetters)]
pub struct CachedAggregate {
    /// The report revision the aggregate was computed from.
    #[getset(get_copy = "pub")]
    pub(crate) report_revision: u64,

    /// When the aggregate was computed.
    #[getset(get_copy = "pub")]
    pub(crate) computed_at: OffsetDateTime,

    /// The cached aggregate.
    #[getset(get = "pub")]
    pub(crate) aggregate: AggregateReport,
}
