//! Uploading, rendering, aggregating, and packaging reports.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::Read,
};

use assert_matches::assert_matches;
use facts::{DeploymentsReport, DeploymentsStatus, ReportId, Status, Store, TaskKind};
use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use report::{build_aggregate_report, csv, details, tarball, DetailsReport, Error};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const VERSION: &str = "1.4.2";

fn payload(sources: Value) -> Value {
    json!({
        "report_type": "details",
        "report_platform_id": "5f2de62b-1b4b-4c2e-a8a2-b1f9e8c6d8a1",
        "sources": sources,
    })
}

fn source(kind: &str, name: &str, facts: Value) -> Value {
    json!({
        "server_id": "server-1",
        "source_name": name,
        "source_type": kind,
        "report_version": VERSION,
        "facts": facts,
    })
}

fn upload(store: &Store, payload: Value) -> ReportId {
    let report = DetailsReport::from_value(&payload).expect("must validate");
    details::upload(store, report, VERSION).expect("must upload")
}

/// Fingerprint a report and record its deployments, as its fingerprint task would.
fn fingerprint(store: &Store, id: ReportId) {
    let contents = store.report_contents(id).expect("must read report");
    let output = fingerprint::fingerprint(&contents, |_| true).expect("must fingerprint");
    store
        .set_deployments(
            id,
            DeploymentsReport {
                status: DeploymentsStatus::Complete,
                fingerprints: output.fingerprints,
            },
        )
        .expect("must set deployments");
}

fn sorted_facts(report: &DetailsReport) -> Vec<Vec<String>> {
    report
        .sources
        .iter()
        .map(|source| {
            let mut facts = source
                .facts
                .iter()
                .map(|facts| serde_json::to_string(facts).expect("must encode"))
                .collect::<Vec<_>>();
            facts.sort();
            facts
        })
        .collect()
}

#[test]
fn uploaded_details_come_back_unchanged() {
    let store = Store::new();
    let uploaded = payload(json!([
        source("network", "lab", json!([
            {"uname_hostname": "db01", "cpu_count": 4, "ifconfig_ip_addresses": ["10.0.0.1"]},
            {"uname_hostname": "db02", "etc_release_name": "Red Hat Enterprise Linux", "custom": {"nested": [1, 2]}},
        ])),
        source("satellite", "sat", json!([{"hostname": "db01.example.com", "uuid": "X"}])),
    ]));
    let id = upload(&store, uploaded.clone());

    let rendered = details::details(&store, id).expect("must render");
    assert_eq!(rendered.report_id, Some(id));
    assert_eq!(rendered.report_version.as_deref(), Some(VERSION));
    let original = DetailsReport::from_value(&uploaded).expect("must validate");
    assert_eq!(rendered.report_platform_id, original.report_platform_id);
    assert_eq!(sorted_facts(&rendered), sorted_facts(&original));

    let reparsed = DetailsReport::from_value(&serde_json::to_value(&rendered).expect("must encode"))
        .expect("rendered details must be a valid payload");
    assert_eq!(sorted_facts(&reparsed), sorted_facts(&original));
}

#[test]
fn rejected_uploads_store_nothing() {
    let store = Store::new();
    let bad = payload(json!([
        source("network", "lab", json!([{"uname_hostname": "db01"}])),
        source("network", "", json!([{"uname_hostname": "db02"}])),
    ]));
    let err = DetailsReport::from_value(&bad).expect_err("must reject");
    assert!(err.is_client_error());
    assert_matches!(err, Error::Validation { field, .. } if field == "sources[1].source_name");
    assert_matches!(store.report(ReportId::from(1)), Err(facts::Error::NotFound { .. }));
}

#[test]
fn ansible_hosts_union_database_and_jobs() {
    let store = Store::new();
    let id = upload(
        &store,
        payload(json!([source("ansible", "tower", json!([{
            "instance_details": {"version": "4.2.0"},
            "hosts": [{"name": "a"}, {"name": null}],
            "jobs": {"unique_hosts": ["a", "b", "c"], "job_ids": [1]},
        }]))])),
    );
    fingerprint(&store, id);

    let aggregate = build_aggregate_report(&store, id).expect("must aggregate");
    assert_eq!(aggregate.ansible_hosts_in_database, 1);
    assert_eq!(aggregate.ansible_hosts_in_jobs, 3);
    assert_eq!(aggregate.ansible_hosts_all, 3);
    assert_eq!(aggregate.inspect_result_status_success, 1);
}

#[test]
fn vmware_hosts_are_counted_per_cluster() {
    let store = Store::new();
    let vm = |name: &str, cluster: &str, host: &str| {
        json!({"vm.name": name, "vm.uuid": format!("uuid-{name}"), "vm.cluster": cluster, "vm.host.uuid": host})
    };
    let three_vms = upload(
        &store,
        payload(json!([source("vcenter", "vc", json!([vm("a", "C1", "h1"), vm("b", "C1", "h1"), vm("c", "C1", "h2")]))])),
    );
    let aggregate = build_aggregate_report(&store, three_vms).expect("must aggregate");
    assert_eq!(
        (aggregate.vmware_hosts, aggregate.vmware_vms, aggregate.vmware_vm_to_host_ratio),
        (2, 3, 1.5)
    );

    let two_clusters = upload(
        &store,
        payload(json!([source(
            "vcenter",
            "vc",
            json!([vm("a", "C1", "h1"), vm("b", "C1", "h1"), vm("c", "C1", "h2"), vm("d", "C2", "h3")])
        )])),
    );
    let aggregate = build_aggregate_report(&store, two_clusters).expect("must aggregate");
    assert_eq!(
        (aggregate.vmware_hosts, aggregate.vmware_vms, aggregate.vmware_vm_to_host_ratio),
        (3, 4, 4.0 / 3.0)
    );

    let same_uuid_elsewhere = upload(
        &store,
        payload(json!([source("vcenter", "vc", json!([vm("a", "C1", "h1"), vm("d", "C2", "h1")]))])),
    );
    let aggregate = build_aggregate_report(&store, same_uuid_elsewhere).expect("must aggregate");
    assert_eq!((aggregate.vmware_hosts, aggregate.vmware_vms), (2, 2));
}

#[test]
fn aggregate_counts_fingerprints() {
    let store = Store::new();
    let id = upload(
        &store,
        payload(json!([
            source("network", "lab", json!([
                {
                    "uname_hostname": "db1",
                    "subscription_manager_id": "X",
                    "ifconfig_ip_addresses": ["1.2.3.4"],
                    "cpu_core_count": 8,
                    "cpu_socket_count": 4,
                },
                {
                    "uname_hostname": "app1",
                    "jboss_processes": 2,
                    "jboss_eap_packages": 3,
                    "virt_type": "vmware",
                    "cpu_core_count": 2,
                    "cpu_socket_count": 1,
                },
            ])),
            source("satellite", "sat", json!([{"hostname": "db1.example.com", "uuid": "X", "cores": 4}])),
        ])),
    );
    fingerprint(&store, id);

    let aggregate = build_aggregate_report(&store, id).expect("must aggregate");
    assert_eq!(aggregate.socket_pairs, 2 + 1);
    assert_eq!(aggregate.jboss_eap_instances, 1);
    assert_eq!(aggregate.jboss_eap_cores_virtual, 2.0);
    assert_eq!(aggregate.instances_virtual, 1);
    assert_eq!(aggregate.instances_not_redhat, 2);
    assert_eq!(aggregate.missing_cpu_core_count, 0);
    assert_eq!(aggregate.inspect_result_status_success, 3);
}

#[test]
fn aggregate_is_reused_until_the_report_changes() {
    let store = Store::new();
    let id = upload(
        &store,
        payload(json!([source("network", "lab", json!([{"uname_hostname": "db1", "cpu_socket_count": 2}]))])),
    );
    fingerprint(&store, id);

    let first = build_aggregate_report(&store, id).expect("must aggregate");
    let cached = store.cached_aggregate(id).expect("must cache");
    let second = build_aggregate_report(&store, id).expect("must aggregate");
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).expect("must encode"),
        serde_json::to_string(&second).expect("must encode")
    );
    assert_eq!(store.cached_aggregate(id).expect("must cache"), cached);

    let recomputed = report::aggregate::aggregate(&store.report_contents(id).expect("must read"));
    assert_eq!(recomputed, first);

    fingerprint(&store, id);
    build_aggregate_report(&store, id).expect("must aggregate");
    assert!(store.cached_aggregate(id).expect("must cache").report_revision() > cached.report_revision());
}

#[test]
fn deployments_csv_has_fixed_columns() {
    let store = Store::new();
    let id = upload(
        &store,
        payload(json!([source("network", "lab", json!([{"uname_hostname": "db1", "cpu_count": 2}]))])),
    );
    fingerprint(&store, id);

    let view = report::deployments(&store, id).expect("must render");
    let rendered = csv::deployments(&view).expect("must render");
    let lines = rendered.split("\r\n").collect::<Vec<_>>();
    assert_eq!(lines[0], csv::METADATA_COLUMNS.join(","));
    assert!(lines[1].starts_with(&format!("{id},deployments,{VERSION},")));
    assert_eq!(lines[4], "System Fingerprints:");

    let header = lines[5].split(',').collect::<Vec<_>>();
    assert_eq!(header.len(), csv::FINGERPRINT_COLUMNS.len() + csv::PRODUCT_COLUMNS.len());
    let row = lines[6].split(',').collect::<Vec<_>>();
    let column = |name: &str| row[header.iter().position(|h| *h == name).expect("column must exist")];
    assert_eq!(column("name"), "db1");
    assert_eq!(column("cpu_count"), "2");
    assert_eq!(column("sources"), "lab");
}

#[test]
fn merged_reports_are_fingerprinted_by_a_new_job() {
    let store = Store::new();
    let one = upload(&store, payload(json!([source("network", "a", json!([{"uname_hostname": "h1"}]))])));
    let two = upload(&store, payload(json!([source("network", "b", json!([{"uname_hostname": "h2"}]))])));

    let (merged, job) = details::merge(&store, &[one, two], VERSION).expect("must merge");
    assert_eq!(store.report(merged).expect("report").groups().len(), 2);
    let job = store.job(job).expect("job");
    assert_eq!(job.report(), Some(merged));
    assert_eq!(job.status(), Status::Created);
    let tasks = store.tasks(job.id()).expect("tasks");
    assert_eq!(tasks.iter().map(|t| t.kind()).collect::<Vec<_>>(), vec![TaskKind::Fingerprint]);
}

#[test]
fn tarball_manifest_verifies() {
    let store = Store::new();
    let id = upload(
        &store,
        payload(json!([source("network", "lab", json!([{"uname_hostname": "db1", "cpu_count": 2}]))])),
    );
    fingerprint(&store, id);

    let logs = tempfile::tempdir().expect("temp dir");
    let stdout = logs.path().join("scan-job-1-ansible-stdout.txt");
    std::fs::write(&stdout, "PLAY [all]\n").expect("must write log");
    let logs = vec![(String::from("scan-job-1-ansible-stdout.txt"), stdout)];

    let out = tempfile::tempdir().expect("temp dir");
    let path = tarball::write(&store, id, &logs, out.path()).expect("must assemble");
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(tarball::file_name(id).as_str()));

    let bytes = std::fs::read(&path).expect("must read tarball");
    let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
    let mut files = BTreeMap::new();
    for entry in archive.entries().expect("must list entries") {
        let mut entry = entry.expect("must read entry");
        let name = entry.path().expect("entry path").to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("must read entry");
        files.insert(name, data);
    }

    let root = tarball::root_dir(id);
    let names = files
        .keys()
        .map(|name| name.strip_prefix(&format!("{root}/")).expect("entries live under the root").to_owned())
        .collect::<BTreeSet<_>>();
    assert_eq!(
        names,
        BTreeSet::from(
            [
                "details.json",
                "details.csv",
                "deployments.json",
                "deployments.csv",
                "aggregate.json",
                "scan-job-1-ansible-stdout.txt",
                tarball::MANIFEST,
            ]
            .map(String::from)
        )
    );

    let manifest = String::from_utf8(files[&format!("{root}/{}", tarball::MANIFEST)].clone()).expect("utf-8");
    let lines = manifest.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), names.len() - 1);
    for line in lines {
        let (digest, name) = line.split_once("  ").expect("digest and name");
        let data = &files[&format!("{root}/{name}")];
        assert_eq!(digest, hex::encode(Sha256::digest(data)), "{name}");
    }
}
