//! Inventories and report imports, driven the way the subcommands drive them.

use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use facts::{DeploymentsStatus, JobId, Status, Store};
use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use quipucords::{
    instance::{ensure_completed, Instance},
    inventory::Inventory,
};
use scanner::{JobLogs, Settings, Stream};
use serde_json::{json, Value};

fn inventory(value: Value) -> Inventory {
    serde_json::from_value(value).expect("must parse inventory")
}

fn lab() -> Value {
    json!({
        "credentials": [
            {"name": "root", "kind": "network", "username": "root", "password": "secret"},
            {"name": "ops", "kind": "network", "username": "ops", "ssh_key": "KEY"},
        ],
        "sources": [
            {"name": "lab", "kind": "network", "hosts": ["10.0.0.[1:4]"], "credentials": ["ops", "root"]},
        ],
        "scans": [
            {"name": "nightly", "sources": ["lab"], "options": {"max_concurrency": 2}},
        ],
    })
}

fn details(dir: &Path, name: &str, hosts: &[&str]) -> PathBuf {
    let facts = hosts
        .iter()
        .map(|host| json!({"uname_hostname": host, "subscription_manager_id": format!("sm-{host}"), "cpu_count": 2}))
        .collect::<Vec<_>>();
    let payload = json!({
        "report_type": "details",
        "report_platform_id": "5f2de62b-1b4b-4c2e-a8a2-b1f9e8c6d8a1",
        "sources": [{
            "server_id": "server-1",
            "source_name": name,
            "source_type": "network",
            "report_version": "1.4.2",
            "facts": facts,
        }],
    });
    let path = dir.join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_vec(&payload).expect("must encode")).expect("must write details");
    path
}

fn instance(logs: &Path) -> Instance {
    Instance::start_default(Settings::builder().log_dir(logs).build())
}

#[test]
fn inventory_resolves_names() {
    let store = Store::new();
    let scans = inventory(lab()).populate(&store).expect("must populate");
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].0, "nightly");

    let source = store.source_by_name("lab").expect("source must exist");
    let ops = store.credential_by_name("ops").expect("credential must exist");
    let root = store.credential_by_name("root").expect("credential must exist");
    assert_eq!(source.credentials(), &vec![ops.id(), root.id()]);

    let scan = store.scan(scans[0].1).expect("scan must exist");
    assert_eq!(scan.sources(), &vec![source.id()]);
    assert_eq!(scan.options().max_concurrency(), 2);
}

#[test]
fn inventory_rejects_unknown_credentials() {
    let mut value = lab();
    value["sources"][0]["credentials"] = json!(["nobody"]);
    let err = inventory(value).populate(&Store::new()).expect_err("must reject");
    assert!(format!("{err:#}").contains("no credential named 'nobody'"), "{err:#}");
}

#[test]
fn inventory_rejects_unknown_fields() {
    let mut value = lab();
    value["scans"][0]["schedule"] = json!("daily");
    assert!(serde_json::from_value::<Inventory>(value).is_err());
}

#[tokio::test]
async fn unknown_scans_are_reported() {
    let logs = tempfile::tempdir().expect("must create tempdir");
    let instance = instance(logs.path());
    let err = instance.scan(&inventory(lab()), "weekly").await.expect_err("must fail");
    assert!(err.to_string().contains("no scan named 'weekly'"), "{err}");
}

#[tokio::test]
async fn imported_details_are_fingerprinted_and_packaged() {
    let dir = tempfile::tempdir().expect("must create tempdir");
    let file = details(dir.path(), "lab", &["db1", "db2"]);
    let instance = instance(&dir.path().join("logs"));

    let (report, job) = instance.import_details(&[file]).await.expect("must import");
    ensure_completed(&job).expect("job must complete");
    assert_eq!(job.report(), Some(report));

    let deployments = instance
        .store()
        .deployments(report)
        .expect("must read deployments")
        .expect("report must have deployments");
    assert_eq!(deployments.status, DeploymentsStatus::Complete);
    assert_eq!(deployments.fingerprints.len(), 2);

    let aggregate = instance.aggregate(report).expect("must aggregate");
    assert_eq!(aggregate.inspect_result_status_success, 2);

    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).expect("must create out dir");
    let path = instance.write_tarball(report, &out).expect("must write tarball");
    assert!(path.starts_with(&out));
    assert!(path.is_file());
}

#[tokio::test]
async fn packaged_reports_leave_out_logs_of_earlier_runs() {
    let dir = tempfile::tempdir().expect("must create tempdir");
    let logs = dir.path().join("logs");
    let file = details(dir.path(), "lab", &["db1"]);

    // A previous invocation ran a job with the same id against the same log directory.
    let earlier = JobLogs::new(&logs);
    earlier.append(JobId::from(1), Stream::AnsibleStdout, "A").await;
    earlier.append(JobId::from(1), Stream::AnsibleStderr, "stale").await;

    let instance = instance(&logs);
    let (report, job) = instance.import_details(&[file]).await.expect("must import");
    ensure_completed(&job).expect("job must complete");
    assert_eq!(job.id(), JobId::from(1));
    assert!(JobLogs::new(&logs).existing(job.id()).is_empty());

    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).expect("must create out dir");
    let path = instance.write_tarball(report, &out).expect("must write tarball");
    let bytes = std::fs::read(&path).expect("must read tarball");
    let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
    let names = archive
        .entries()
        .expect("must list entries")
        .map(|entry| {
            let entry = entry.expect("must read entry");
            entry.path().expect("entry path").to_string_lossy().into_owned()
        })
        .collect::<Vec<_>>();
    assert!(!names.is_empty());
    assert!(names.iter().all(|name| !name.contains("scan-job-")), "{names:?}");
}

#[tokio::test]
async fn several_details_files_are_merged() {
    let dir = tempfile::tempdir().expect("must create tempdir");
    let first = details(dir.path(), "east", &["db1", "db2"]);
    let second = details(dir.path(), "west", &["db2", "db3"]);
    let instance = instance(&dir.path().join("logs"));

    let (report, job) = instance.import_details(&[first, second]).await.expect("must import");
    ensure_completed(&job).expect("job must complete");

    let merged = instance.store().report(report).expect("report must exist");
    assert_eq!(merged.groups().len(), 2);
    let deployments = instance
        .store()
        .deployments(report)
        .expect("must read deployments")
        .expect("report must have deployments");
    assert_eq!(deployments.fingerprints.len(), 3);
}

#[tokio::test]
async fn invalid_details_files_are_rejected() {
    let dir = tempfile::tempdir().expect("must create tempdir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, br#"{"report_type": "details", "sources": []}"#).expect("must write details");
    let instance = instance(&dir.path().join("logs"));

    let err = instance.import_details(&[path]).await.expect_err("must reject");
    assert_matches!(err.downcast_ref::<report::Error>(), Some(err) if err.is_client_error());
}

#[test]
fn failed_jobs_are_not_completed() {
    let store = Store::new();
    let scans = inventory(lab()).populate(&store).expect("must populate");
    let job = store.create_job_for_scan(scans[0].1).expect("must create job");
    let failed = store
        .set_job_status(job, Status::Failed, "Connect task failed.")
        .expect("must fail job");

    let err = ensure_completed(&failed).expect_err("must reject");
    assert_eq!(err.to_string(), format!("job {job} failed: Connect task failed."));
}
