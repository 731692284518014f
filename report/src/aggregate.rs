//! The aggregate report: counts and distributions over a report.
//!
//! One pass over the report's fingerprints, then one pass over its raw inspection results.
//! Every map is ordered and every sum is taken in report order, so building the aggregate
//! of an unchanged report twice yields identical records.

use std::collections::BTreeSet;

use facts::{
    AggregateReport, GroupContents, HostStatus, InfrastructureType, ProductName, ReportContents, ReportId,
    SourceKind, Store, SystemFingerprint,
};
use serde_json::Value;
use time::Date;
use tracing::debug;

use crate::Error;

/// Placeholder for an unreported OS name or version.
pub const UNKNOWN: &str = "unknown";

/// Return the aggregate of a report, rebuilding it only if the report changed since it was cached.
pub fn build_aggregate_report(store: &Store, id: ReportId) -> Result<AggregateReport, Error> {
    store.aggregate(id, |contents| Ok::<_, Error>(aggregate(contents)))
}

/// Compute the aggregate of a report snapshot.
pub fn aggregate(contents: &ReportContents) -> AggregateReport {
    let mut report = AggregateReport::default();
    let fingerprints = contents
        .deployments
        .as_ref()
        .map(|d| d.fingerprints.as_slice())
        .unwrap_or_default();

    let mut creation_days = Vec::new();
    for fingerprint in fingerprints {
        count_fingerprint(&mut report, fingerprint);
        if let Some(date) = fingerprint.system_creation_date {
            creation_days.push(i64::from(date.to_julian_day()));
        }
    }
    report.system_creation_date_average = average_date(&creation_days);

    let mut raw = RawTotals::default();
    for group in &contents.groups {
        raw.add_group(&mut report, group);
    }
    raw.finish(&mut report);

    debug!(
        report = %contents.report.id(),
        fingerprints = fingerprints.len(),
        "computed aggregate"
    );
    report
}

fn count_fingerprint(report: &mut AggregateReport, fingerprint: &SystemFingerprint) {
    match fingerprint.infrastructure_type {
        InfrastructureType::Virtualized => report.instances_virtual += 1,
        InfrastructureType::BareMetal => report.instances_physical += 1,
        InfrastructureType::Hypervisor => report.instances_hypervisor += 1,
        InfrastructureType::Unknown => report.instances_unknown += 1,
    }
    if fingerprint.is_redhat != Some(true) {
        report.instances_not_redhat += 1;
    }
    if let Some(sockets) = fingerprint.cpu_socket_count {
        report.socket_pairs += (sockets + 1) / 2;
    }

    let cores = fingerprint.cpu_core_count.unwrap_or_default();
    let virtualized = match fingerprint.infrastructure_type {
        InfrastructureType::Virtualized => Some(true),
        InfrastructureType::BareMetal | InfrastructureType::Hypervisor => Some(false),
        InfrastructureType::Unknown => None,
    };
    if fingerprint.has_product(ProductName::JbossEap) {
        report.jboss_eap_instances += 1;
        match virtualized {
            Some(true) => report.jboss_eap_cores_virtual += cores,
            Some(false) => report.jboss_eap_cores_physical += cores,
            None => {}
        }
    }
    if fingerprint.has_product(ProductName::JbossWebServer) {
        report.jboss_ws_instances += 1;
        match virtualized {
            Some(true) => report.jboss_ws_cores_virtual += cores,
            Some(false) => report.jboss_ws_cores_physical += cores,
            None => {}
        }
    }

    let seen_by = |kinds: &[SourceKind]| kinds.iter().any(|kind| fingerprint.seen_by(*kind));
    if fingerprint.cpu_core_count.is_none() && seen_by(&[SourceKind::Network, SourceKind::Satellite]) {
        report.missing_cpu_core_count += 1;
    }
    if fingerprint.cpu_socket_count.is_none()
        && seen_by(&[SourceKind::Network, SourceKind::Satellite, SourceKind::Vcenter])
    {
        report.missing_cpu_socket_count += 1;
    }
    if fingerprint.name.is_none() {
        report.missing_name += 1;
    }
    if fingerprint.system_creation_date.is_none() {
        report.missing_system_creation_date += 1;
    }
    if fingerprint.system_purpose.is_none() && seen_by(&[SourceKind::Network]) {
        report.missing_system_purpose += 1;
    }

    if fingerprint.seen_by(SourceKind::Openshift) {
        report.openshift_cores += fingerprint.cpu_count.unwrap_or_default();
    }

    let os_name = fingerprint.os_name.as_deref().unwrap_or(UNKNOWN);
    let os_version = fingerprint.os_version.as_deref().unwrap_or(UNKNOWN);
    *report
        .os_by_name_and_version
        .entry(os_name.to_owned())
        .or_default()
        .entry(os_version.to_owned())
        .or_default() += 1;
}

/// The floored mean of `days`, as a date.
fn average_date(days: &[i64]) -> Option<Date> {
    if days.is_empty() {
        return None;
    }
    let mean = days.iter().sum::<i64>().div_euclid(days.len() as i64);
    i32::try_from(mean).ok().and_then(|day| Date::from_julian_day(day).ok())
}

/// Sets gathered from raw facts before they are counted.
#[derive(Default)]
struct RawTotals {
    vmware_vms: BTreeSet<String>,
    vmware_hosts: BTreeSet<(String, String)>,
    ansible_in_database: BTreeSet<String>,
    ansible_in_jobs: BTreeSet<String>,
}

impl RawTotals {
    fn add_group(&mut self, report: &mut AggregateReport, group: &GroupContents) {
        let kind = group.group.source_type();
        for result in &group.results {
            match result.status() {
                HostStatus::Success => report.inspect_result_status_success += 1,
                HostStatus::Failed => report.inspect_result_status_failed += 1,
                HostStatus::Unreachable => report.inspect_result_status_unreachable += 1,
                HostStatus::Unknown => report.inspect_result_status_unknown += 1,
            }
            if result.status() != HostStatus::Success {
                continue;
            }

            match kind {
                SourceKind::Openshift => {
                    if result.fact("cluster").is_some() {
                        report.openshift_cluster_instances += 1;
                    }
                    if result.fact("node").is_some() {
                        report.openshift_node_instances += 1;
                    }
                    for operator in result.fact("operators").and_then(Value::as_array).into_iter().flatten() {
                        if let Some(name) = operator.get("name").and_then(Value::as_str) {
                            *report.openshift_operators_by_name.entry(name.to_owned()).or_default() += 1;
                        }
                        if let Some(kind) = operator.get("kind").and_then(Value::as_str) {
                            *report.openshift_operators_by_kind.entry(kind.to_owned()).or_default() += 1;
                        }
                    }
                }
                SourceKind::Vcenter => {
                    let text = |name: &str| result.fact(name).and_then(Value::as_str).filter(|s| !s.is_empty());
                    let Some(vm) = text("vm.uuid").or_else(|| text("vm.name")) else {
                        continue;
                    };
                    self.vmware_vms.insert(vm.to_owned());
                    if let Some(host) = text("vm.host.uuid") {
                        let cluster = text("vm.cluster").unwrap_or_default();
                        self.vmware_hosts.insert((cluster.to_owned(), host.to_owned()));
                    }
                }
                SourceKind::Ansible => {
                    let hosts = result.fact("hosts").and_then(Value::as_array).into_iter().flatten();
                    self.ansible_in_database
                        .extend(hosts.filter_map(|host| host.get("name").and_then(Value::as_str)).map(str::to_owned));
                    let jobs = result
                        .fact("jobs")
                        .and_then(|jobs| jobs.get("unique_hosts"))
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten();
                    self.ansible_in_jobs
                        .extend(jobs.filter_map(Value::as_str).map(str::to_owned));
                }
                SourceKind::Network | SourceKind::Satellite | SourceKind::Rhacs => {}
            }
        }
    }

    fn finish(self, report: &mut AggregateReport) {
        report.vmware_vms = self.vmware_vms.len() as u64;
        report.vmware_hosts = self.vmware_hosts.len() as u64;
        report.vmware_vm_to_host_ratio = if self.vmware_hosts.is_empty() {
            0.0
        } else {
            self.vmware_vms.len() as f64 / self.vmware_hosts.len() as f64
        };

        report.ansible_hosts_in_database = self.ansible_in_database.len() as u64;
        report.ansible_hosts_in_jobs = self.ansible_in_jobs.len() as u64;
        report.ansible_hosts_all = self.ansible_in_database.union(&self.ansible_in_jobs).count() as u64;
    }
}
