//! Fingerprinting reports assembled in the store.

use std::collections::BTreeSet;

use facts::{
    HostStatus, InfrastructureType, InspectGroup, InspectResult, NewReport, Presence, ProductName, RawFacts,
    ReportContents, SourceKind, SourceRef, Store,
};
use fingerprint::{fingerprint, merge_keys};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use time::{macros::date, OffsetDateTime};

/// Builds a report out of uploaded groups.
struct Fixture {
    store: Store,
    groups: Vec<facts::GroupId>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Store::new(),
            groups: Vec::new(),
        }
    }

    fn group(&mut self, kind: SourceKind, name: &str, collected_at: i64, hosts: Vec<(HostStatus, Value)>) -> &mut Self {
        let group = self
            .store
            .add_group(
                InspectGroup::builder()
                    .source_type(kind)
                    .source_name(name)
                    .server_id("server")
                    .server_version("1.0.0")
                    .collected_at(OffsetDateTime::from_unix_timestamp(collected_at).expect("valid timestamp"))
                    .build(),
            )
            .expect("must add group");
        for (index, (status, facts)) in hosts.into_iter().enumerate() {
            let facts: RawFacts = serde_json::from_value(facts).expect("must be a JSON object");
            self.store
                .record_inspection(group, InspectResult::from_facts(format!("{name}-{index}"), status, facts))
                .expect("must record inspection");
        }
        self.groups.push(group);
        self
    }

    fn contents(&self) -> ReportContents {
        let report = self
            .store
            .create_report(NewReport::builder().report_version("1.0.0").groups(self.groups.clone()).build())
            .expect("must create report");
        self.store.report_contents(report).expect("must read report")
    }
}

#[test]
fn network_values_win_over_stale_satellite_values() {
    let contents = Fixture::new()
        .group(
            SourceKind::Network,
            "lab",
            1_700_000_000,
            vec![(
                HostStatus::Success,
                json!({
                    "uname_hostname": "db1",
                    "subscription_manager_id": "X",
                    "ifconfig_ip_addresses": ["1.2.3.4"],
                    "cpu_core_count": 8,
                    "cpu_socket_count": 4,
                }),
            )],
        )
        .group(
            SourceKind::Satellite,
            "sat",
            1_700_100_000,
            vec![(HostStatus::Success, json!({"hostname": "db1.example.com", "uuid": "X", "cores": 4}))],
        )
        .contents();

    let output = fingerprint(&contents, |_| true).expect("must fingerprint");
    assert_eq!(output.hosts, 2);
    assert_eq!(output.fingerprints.len(), 1);

    let host = &output.fingerprints[0];
    assert_eq!(host.cpu_core_count, Some(8.0));
    assert_eq!(host.cpu_socket_count, Some(4));
    assert_eq!(host.name.as_deref(), Some("db1"));
    assert_eq!(host.metadata["cpu_core_count"].source_type, SourceKind::Network);
    assert_eq!(host.metadata["cpu_core_count"].raw_fact_key, "cpu_core_count");
    assert_eq!(host.cpu_count, Some(4));
    assert_eq!(host.metadata["cpu_count"].source_type, SourceKind::Satellite);
    assert_eq!(host.is_redhat, Some(false));
    assert_eq!(
        host.sources.iter().map(|s| s.source_type).collect::<Vec<_>>(),
        vec![SourceKind::Network, SourceKind::Satellite]
    );
}

#[test]
fn jboss_eap_on_a_virtualized_host() {
    let contents = Fixture::new()
        .group(
            SourceKind::Network,
            "lab",
            1_700_000_000,
            vec![(
                HostStatus::Success,
                json!({
                    "uname_hostname": "app1",
                    "jboss_processes": 2,
                    "jboss_eap_packages": 3,
                    "virt_type": "vmware",
                    "cpu_core_count": 2,
                    "cpu_socket_count": 1,
                    "date_yum_history": "2020-02-03 10:11:12",
                }),
            )],
        )
        .contents();

    let output = fingerprint(&contents, |_| true).expect("must fingerprint");
    let host = &output.fingerprints[0];
    assert_eq!(host.infrastructure_type, InfrastructureType::Virtualized);
    assert_eq!(host.virtualized_type.as_deref(), Some("vmware"));
    assert_eq!(host.system_creation_date, Some(date!(2020 - 02 - 03)));
    assert!(host.has_product(ProductName::JbossEap));
    assert_eq!(
        host.product(ProductName::JbossFuse).map(|p| p.presence),
        Some(Presence::Unknown)
    );
}

#[test]
fn failed_and_empty_hosts_are_not_fingerprinted() {
    let contents = Fixture::new()
        .group(
            SourceKind::Satellite,
            "sat",
            1_700_000_000,
            vec![
                (HostStatus::Success, json!({"organization": "acme"})),
                (HostStatus::Failed, json!({"hostname": "gone"})),
                (HostStatus::Success, json!({"hostname": "web"})),
            ],
        )
        .group(
            SourceKind::Openshift,
            "ocp",
            1_700_000_000,
            vec![(HostStatus::Success, json!({"cluster": {"uuid": "c1", "version": "4.12"}}))],
        )
        .contents();

    let output = fingerprint(&contents, |_| true).expect("must fingerprint");
    assert_eq!(output.hosts, 2);
    assert_eq!(output.dropped, 1);
    assert_eq!(output.fingerprints.len(), 1);
    assert_eq!(output.fingerprints[0].name.as_deref(), Some("web"));
}

#[test]
fn disabled_products_do_not_appear() {
    let contents = Fixture::new()
        .group(
            SourceKind::Network,
            "lab",
            1_700_000_000,
            vec![(HostStatus::Success, json!({"uname_hostname": "a", "jboss_eap_packages": 1}))],
        )
        .contents();

    let output = fingerprint(&contents, |product| product != ProductName::JbossEap).expect("must fingerprint");
    assert_eq!(output.fingerprints[0].product(ProductName::JbossEap), None);
}

#[test]
fn fingerprint_origins_come_from_report_groups() {
    let contents = Fixture::new()
        .group(
            SourceKind::Network,
            "lab",
            1_700_000_000,
            vec![
                (HostStatus::Success, json!({"uname_hostname": "a", "ifconfig_mac_addresses": ["AA:01"]})),
                (HostStatus::Success, json!({"uname_hostname": "b", "dmi_system_uuid": "B-1"})),
                (HostStatus::Unreachable, json!({})),
            ],
        )
        .group(
            SourceKind::Vcenter,
            "vc",
            1_700_000_500,
            vec![
                (HostStatus::Success, json!({"vm.name": "a", "vm.mac_addresses": ["aa:01"], "vm.uuid": "V-1"})),
                (HostStatus::Success, json!({"vm.name": "c", "vm.uuid": "b-1"})),
                (HostStatus::Success, json!({"vm.name": "d", "vm.uuid": "V-4", "vm.os": "Red Hat Enterprise Linux 8"})),
            ],
        )
        .contents();

    let output = fingerprint(&contents, |_| true).expect("must fingerprint");
    assert_eq!(output.fingerprints.len(), 3);

    let available = contents
        .groups
        .iter()
        .map(|g| SourceRef {
            source_name: g.group.source_name().clone(),
            source_type: g.group.source_type(),
            server_id: g.group.server_id().clone(),
        })
        .collect::<BTreeSet<_>>();
    for host in &output.fingerprints {
        assert!(!host.sources.is_empty());
        assert!(host.sources.iter().all(|source| available.contains(source)));
        for origin in host.metadata.values() {
            assert!(host.sources.iter().any(|s| s.source_name == origin.source_name));
        }
    }

    for (i, a) in output.fingerprints.iter().enumerate() {
        for b in &output.fingerprints[i + 1..] {
            assert!(merge_keys(a).is_disjoint(&merge_keys(b)));
        }
    }

    let rhel = output
        .fingerprints
        .iter()
        .find(|host| host.name.as_deref() == Some("d"))
        .expect("vm d must be fingerprinted");
    assert_eq!(rhel.is_redhat, Some(true));
    assert_eq!(rhel.infrastructure_type, InfrastructureType::Virtualized);
}
