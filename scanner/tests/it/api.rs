//! API sources inspected through fake servers.

use std::collections::BTreeMap;

use facts::{HostStatus, InspectResult, JobId, ScanType, SourceKind, Status, TaskKind};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{executor, init_logging, task};
use crate::fakes::{FakeAnsible, FakeApis, FakeRest, FakeSatellite, FakeVcenter, Harness};

/// Run a job's connect task to completion, then its inspect task under `cancel`.
async fn inspect_under(harness: &Harness, job: JobId, cancel: &CancellationToken) -> Status {
    let (_, status) = harness
        .runner
        .run(task(harness, job, TaskKind::Connect), &CancellationToken::new())
        .await;
    assert_eq!(status, Status::Completed);
    let (_, status) = harness.runner.run(task(harness, job, TaskKind::Inspect), cancel).await;
    status
}

fn inspections(harness: &Harness, job: JobId) -> Vec<InspectResult> {
    harness
        .store
        .groups_for_task(task(harness, job, TaskKind::Inspect).id())
        .iter()
        .flat_map(|group| harness.store.inspection_results(group.id()))
        .collect()
}

fn satellite_facts(n: usize) -> Value {
    json!({"hostname": format!("sat-{n}.example.com"), "uuid": format!("u-{n}"), "cores": 4})
}

#[tokio::test]
async fn satellite_hosts_are_paged_and_failures_counted() {
    init_logging();
    let satellite = FakeSatellite::default()
        .host("sat-1", Some(satellite_facts(1)))
        .host("sat-2", Some(satellite_facts(2)))
        .host("sat-3", None)
        .host("sat-4", Some(json!({})))
        .host("sat-5", Some(satellite_facts(5)));
    let apis = FakeApis {
        satellite: Some(satellite.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 2);
    let source = harness.api_source("sat", SourceKind::Satellite, "satellite.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 2);

    let finished = executor(&harness).run_to_completion(job).await.expect("must run job");
    assert_eq!(finished.status(), Status::Completed);
    assert_eq!(satellite.pages(), vec![(1, 1), (1, 2), (2, 2), (3, 2)]);

    let inspect = task(&harness, job, TaskKind::Inspect);
    assert_eq!(inspect.status(), Status::Completed);
    let stats = inspect.stats();
    assert_eq!(
        (stats.systems_count(), stats.systems_scanned(), stats.systems_failed(), stats.systems_unreachable()),
        (5, 3, 2, 0)
    );

    let results = inspections(&harness, job);
    let statuses = results
        .iter()
        .map(|result| (result.name().as_str(), result.status()))
        .collect::<BTreeMap<_, _>>();
    assert_eq!(
        statuses,
        BTreeMap::from([
            ("sat-1", HostStatus::Success),
            ("sat-2", HostStatus::Success),
            ("sat-3", HostStatus::Failed),
            ("sat-4", HostStatus::Failed),
            ("sat-5", HostStatus::Success),
        ])
    );
    let first = results.iter().find(|result| result.name() == "sat-1").expect("sat-1 result");
    assert_eq!(first.fact("uuid"), Some(&json!("u-1")));
    assert_eq!(first.fact("cores"), Some(&json!(4)));
}

#[tokio::test]
async fn satellite_cancel_between_pages_stops_listing() {
    let cancel = CancellationToken::new();
    let satellite = FakeSatellite::default()
        .host("sat-1", Some(satellite_facts(1)))
        .host("sat-2", Some(satellite_facts(2)))
        .host("sat-3", Some(satellite_facts(3)))
        .host("sat-4", Some(satellite_facts(4)))
        .host("sat-5", Some(satellite_facts(5)))
        .cancel_after_page(2, cancel.clone());
    let apis = FakeApis {
        satellite: Some(satellite.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 2);
    let source = harness.api_source("sat", SourceKind::Satellite, "satellite.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 2);

    assert_eq!(inspect_under(&harness, job, &cancel).await, Status::Canceled);
    assert_eq!(satellite.pages(), vec![(1, 1), (1, 2), (2, 2)]);

    let inspect = task(&harness, job, TaskKind::Inspect);
    assert_eq!(inspect.status(), Status::Canceled);
    assert!(inspect.stats().is_balanced());
    assert!(inspections(&harness, job).is_empty());
}

fn vcenter() -> FakeVcenter {
    FakeVcenter::default()
        .object("Datacenter", "datacenter-1", json!({"name": "DC1"}))
        .object("Folder", "group-h4", json!({"name": "host", "parent": "datacenter-1"}))
        .object("ClusterComputeResource", "domain-c1", json!({"name": "C1", "parent": "group-h4"}))
        .object(
            "HostSystem",
            "host-1",
            json!({
                "name": "esx1",
                "parent": "domain-c1",
                "summary.hardware.uuid": "h1",
                "summary.hardware.numCpuCores": 16,
                "summary.hardware.numCpuPkgs": 2,
                "summary.hardware.numCpuThreads": 32,
            }),
        )
        .object(
            "HostSystem",
            "host-2",
            json!({"name": "esx2", "parent": "domain-c1", "summary.hardware.uuid": "h2"}),
        )
        .object(
            "VirtualMachine",
            "vm-1",
            json!({
                "name": "web",
                "summary.config.uuid": "u-web",
                "runtime.powerState": "poweredOn",
                "runtime.host": "host-1",
                "summary.config.numCpu": 2,
                "summary.config.memorySizeMB": 4096,
                "guest.net": [{"ipAddress": ["10.0.0.5"], "macAddress": "00:50:56:AA:BB:CC"}],
            }),
        )
        .object(
            "VirtualMachine",
            "vm-2",
            json!({"name": "db", "summary.config.uuid": "u-db", "runtime.host": "host-2"}),
        )
        .object("VirtualMachine", "vm-3", json!({"name": "orphan", "summary.config.uuid": "u-orphan"}))
}

#[tokio::test]
async fn vcenter_machines_carry_host_and_cluster() {
    init_logging();
    let vcenter = vcenter();
    let apis = FakeApis {
        vcenter: Some(vcenter.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 3);
    let source = harness.api_source("vc", SourceKind::Vcenter, "vcenter.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    let finished = executor(&harness).run_to_completion(job).await.expect("must run job");
    assert_eq!(finished.status(), Status::Completed);
    assert_eq!(vcenter.tokens(), vec![None, Some(String::from("3")), Some(String::from("6"))]);

    let inspect = task(&harness, job, TaskKind::Inspect);
    assert_eq!((inspect.stats().systems_count(), inspect.stats().systems_scanned()), (3, 3));

    let results = inspections(&harness, job);
    let web = results.iter().find(|result| result.name() == "web").expect("web result");
    assert_eq!(web.fact("vm.uuid"), Some(&json!("u-web")));
    assert_eq!(web.fact("vm.state"), Some(&json!("poweredOn")));
    assert_eq!(web.fact("vm.memory_size"), Some(&json!(4.0)));
    assert_eq!(web.fact("vm.host.name"), Some(&json!("esx1")));
    assert_eq!(web.fact("vm.host.uuid"), Some(&json!("h1")));
    assert_eq!(web.fact("vm.host.cpu_cores"), Some(&json!(16)));
    assert_eq!(web.fact("vm.cluster"), Some(&json!("C1")));
    assert_eq!(web.fact("vm.datacenter"), Some(&json!("DC1")));
    assert_eq!(web.fact("vm.ip_addresses"), Some(&json!(["10.0.0.5"])));
    assert_eq!(web.fact("vm.mac_addresses"), Some(&json!(["00:50:56:aa:bb:cc"])));

    let db = results.iter().find(|result| result.name() == "db").expect("db result");
    assert_eq!(db.fact("vm.host.uuid"), Some(&json!("h2")));
    assert_eq!(db.fact("vm.cluster"), Some(&json!("C1")));

    let orphan = results.iter().find(|result| result.name() == "orphan").expect("orphan result");
    assert_eq!(orphan.fact("vm.cluster"), None);
    assert_eq!(orphan.fact("vm.host.uuid"), None);
}

#[tokio::test]
async fn vcenter_cancel_between_pages_records_nothing() {
    let cancel = CancellationToken::new();
    let vcenter = vcenter().cancel_after_page(1, cancel.clone());
    let apis = FakeApis {
        vcenter: Some(vcenter.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 3);
    let source = harness.api_source("vc", SourceKind::Vcenter, "vcenter.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    assert_eq!(inspect_under(&harness, job, &cancel).await, Status::Canceled);
    assert_eq!(vcenter.tokens(), vec![None]);
    let inspect = task(&harness, job, TaskKind::Inspect);
    assert!(inspect.stats().is_balanced());
    assert!(inspections(&harness, job).is_empty());
}

#[tokio::test]
async fn vcenter_page_failure_fails_inspection() {
    let vcenter = vcenter().fail_page(2);
    let apis = FakeApis {
        vcenter: Some(vcenter.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 3);
    let source = harness.api_source("vc", SourceKind::Vcenter, "vcenter.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    assert_eq!(inspect_under(&harness, job, &CancellationToken::new()).await, Status::Failed);
    assert_eq!(vcenter.tokens(), vec![None, Some(String::from("3"))]);
    let inspect = task(&harness, job, TaskKind::Inspect);
    assert!(inspect.stats().is_balanced());
    assert!(inspections(&harness, job).is_empty());
}

const TOWER_HOSTS: &str = "/api/v2/hosts/?page_size=2";
const TOWER_JOBS: &str = "/api/v2/jobs/?page_size=2&order_by=-finished";

fn tower() -> FakeRest {
    FakeRest::default()
        .with("/api/v2/me/", json!({"results": [{"username": "admin"}]}))
        .with(
            "/api/v2/ping/",
            json!({"version": "4.2.0", "active_node": "node1", "install_uuid": "iu-1"}),
        )
        .with(
            TOWER_HOSTS,
            json!({
                "results": [{"name": "a", "id": 1}, {"name": "b", "id": 2}],
                "next": "/api/v2/hosts/?page=2&page_size=2",
            }),
        )
        .with(
            "/api/v2/hosts/?page=2&page_size=2",
            json!({"results": [{"name": "c", "id": 3}], "next": null}),
        )
        .with(TOWER_JOBS, json!({"results": [{"id": 7}, {"id": 8}], "next": null}))
        .with(
            "/api/v2/jobs/7/job_host_summaries/?page_size=2",
            json!({
                "results": [{"host_name": "a"}, {"host_name": "d"}],
                "next": "/api/v2/jobs/7/job_host_summaries/?page=2&page_size=2",
            }),
        )
        .with(
            "/api/v2/jobs/7/job_host_summaries/?page=2&page_size=2",
            json!({"results": [{"host_name": "e"}]}),
        )
        .with(
            "/api/v2/jobs/8/job_host_summaries/?page_size=2",
            json!({"results": [{"host_name": "a"}], "next": ""}),
        )
}

#[tokio::test]
async fn tower_follows_next_links() {
    init_logging();
    let tower = tower();
    let apis = FakeApis {
        tower: Some(tower.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 2);
    let source = harness.api_source("aap", SourceKind::Ansible, "tower.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    let finished = executor(&harness).run_to_completion(job).await.expect("must run job");
    assert_eq!(finished.status(), Status::Completed);
    assert!(tower
        .requests()
        .contains(&String::from("/api/v2/jobs/7/job_host_summaries/?page=2&page_size=2")));

    let results = inspections(&harness, job);
    assert_eq!(results.len(), 1);
    let controller = &results[0];
    assert_eq!(controller.name(), "tower.example.com");
    assert_eq!(controller.status(), HostStatus::Success);
    assert_eq!(
        controller.fact("instance_details"),
        Some(&json!({"version": "4.2.0", "active_node": "node1", "install_uuid": "iu-1"}))
    );
    let names = controller
        .fact("hosts")
        .and_then(Value::as_array)
        .expect("hosts fact")
        .iter()
        .map(|host| host["name"].clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![json!("a"), json!("b"), json!("c")]);
    assert_eq!(
        controller.fact("jobs"),
        Some(&json!({"unique_hosts": ["a", "d", "e"], "job_ids": [7, 8]}))
    );
    assert_eq!(
        controller.fact("comparison"),
        Some(&json!({
            "hosts_in_inventory": ["a", "b", "c"],
            "hosts_only_in_jobs": ["d", "e"],
            "number_of_hosts_in_inventory": 3,
            "number_of_hosts_only_in_jobs": 2,
        }))
    );
}

#[tokio::test]
async fn tower_cancel_between_pages_stops_paging() {
    let cancel = CancellationToken::new();
    let tower = tower().cancel_after(TOWER_HOSTS, cancel.clone());
    let apis = FakeApis {
        tower: Some(tower.clone()),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 2);
    let source = harness.api_source("aap", SourceKind::Ansible, "tower.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    assert_eq!(inspect_under(&harness, job, &cancel).await, Status::Canceled);
    assert_eq!(tower.requests(), vec!["/api/v2/me/", "/api/v2/ping/", TOWER_HOSTS]);
    let inspect = task(&harness, job, TaskKind::Inspect);
    assert!(inspect.stats().is_balanced());
    assert!(inspections(&harness, job).is_empty());
}

#[tokio::test]
async fn tower_pages_without_results_fail_inspection() {
    let tower = tower().with(TOWER_JOBS, json!({"detail": "You do not have permission."}));
    let apis = FakeApis {
        tower: Some(tower),
        ..Default::default()
    };
    let harness = Harness::paged(FakeAnsible::new(), apis, 2);
    let source = harness.api_source("aap", SourceKind::Ansible, "tower.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    let finished = executor(&harness).run_to_completion(job).await.expect("must run job");
    assert_eq!(finished.status(), Status::Failed);
    let inspect = task(&harness, job, TaskKind::Inspect);
    assert_eq!(inspect.status(), Status::Failed);
    assert!(inspect.stats().is_balanced());
    assert!(inspections(&harness, job).is_empty());
}

const RHACS_CURRENT: &str = "/v1/administration/usage/secured-units/current";
const RHACS_MAX: &str = "/v1/administration/usage/secured-units/max";

fn central() -> FakeRest {
    FakeRest::default()
        .with("/v1/auth/status", json!({"userId": "admin"}))
        .with(RHACS_CURRENT, json!({"numNodes": 3, "numCpuUnits": 12}))
        .with(
            RHACS_MAX,
            json!({
                "maxNodes": 5,
                "maxNodesAt": "2024-01-01T00:00:00Z",
                "maxCpuUnits": 20,
                "maxCpuUnitsAt": "2024-02-01T00:00:00Z",
            }),
        )
}

#[tokio::test]
async fn rhacs_records_secured_units() {
    let apis = FakeApis {
        rhacs: Some(central()),
        ..Default::default()
    };
    let harness = Harness::new(FakeAnsible::new(), apis);
    let source = harness.api_source("acs", SourceKind::Rhacs, "central.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    let finished = executor(&harness).run_to_completion(job).await.expect("must run job");
    assert_eq!(finished.status(), Status::Completed);

    let results = inspections(&harness, job);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name(), "central.example.com");
    assert_eq!(
        results[0].fact("secured_units_current"),
        Some(&json!({"nodes": 3, "cpu_units": 12}))
    );
    assert_eq!(
        results[0].fact("secured_units_max"),
        Some(&json!({
            "nodes": 5,
            "nodes_at": "2024-01-01T00:00:00Z",
            "cpu_units": 20,
            "cpu_units_at": "2024-02-01T00:00:00Z",
        }))
    );
}

#[tokio::test]
async fn rhacs_cancel_between_requests_records_nothing() {
    let cancel = CancellationToken::new();
    let central = central().cancel_after(RHACS_CURRENT, cancel.clone());
    let apis = FakeApis {
        rhacs: Some(central.clone()),
        ..Default::default()
    };
    let harness = Harness::new(FakeAnsible::new(), apis);
    let source = harness.api_source("acs", SourceKind::Rhacs, "central.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    assert_eq!(inspect_under(&harness, job, &cancel).await, Status::Canceled);
    assert_eq!(central.requests(), vec!["/v1/auth/status", RHACS_CURRENT]);
    assert!(task(&harness, job, TaskKind::Inspect).stats().is_balanced());
    assert!(inspections(&harness, job).is_empty());
}

#[tokio::test]
async fn rhacs_without_usage_history_fails() {
    let central = FakeRest::default()
        .with("/v1/auth/status", json!({"userId": "admin"}))
        .with(RHACS_CURRENT, json!({"numNodes": 3, "numCpuUnits": 12}));
    let apis = FakeApis {
        rhacs: Some(central),
        ..Default::default()
    };
    let harness = Harness::new(FakeAnsible::new(), apis);
    let source = harness.api_source("acs", SourceKind::Rhacs, "central.example.com");
    let job = harness.job(vec![source], ScanType::Inspect, 25);

    let finished = executor(&harness).run_to_completion(job).await.expect("must run job");
    assert_eq!(finished.status(), Status::Failed);
    let inspect = task(&harness, job, TaskKind::Inspect);
    assert_eq!(inspect.status(), Status::Failed);
    assert!(inspect.status_message().contains(RHACS_MAX), "{}", inspect.status_message());
}
