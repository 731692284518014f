//! Integration tests for the entity store.

use assert_matches::assert_matches;
use facts::{
    query::{Ordering, ResultQuery},
    Credential, DeploymentsReport, DeploymentsStatus, Error, GroupContents, HostStatus, InspectResult, NewJob,
    NewReport, Scan, ScanOptions, ScanType, Source, SourceKind, StatKind, StatsUpdate, Status, Store,
    SystemConnectionResult, TaskKind,
};
use pretty_assertions::assert_eq;
use serde_json::json;


#[test]
fn credential_in_use_cannot_be_deleted() {
    let store = Store::new();
    let (credential, source) = fixtures::network_source(&store, "net", &["10.0.0.[1:3]"]);

    assert_matches!(
        store.delete_credential(credential),
        Err(Error::CredentialInUse { credential: c, used_by }) if c == credential && used_by == source
    );
    assert!(store.credential(credential).is_ok());
}

#[test]
fn rotated_secrets_replace_the_stored_credential() {
    let store = Store::new();
    let (credential, _) = fixtures::network_source(&store, "net", &["10.0.0.1"]);

    let both = Credential::builder()
        .name("ignored")
        .kind(SourceKind::Network)
        .username("root")
        .password("pw")
        .ssh_key("KEY")
        .build();
    assert_matches!(store.rotate_credential(credential, both), Err(Error::Validation { .. }));
    assert_eq!(
        store.credential(credential).expect("must exist").password().as_deref(),
        Some("secret")
    );

    let key = Credential::builder()
        .name("ignored")
        .kind(SourceKind::Vcenter)
        .username("ops")
        .ssh_key("KEY")
        .build();
    store.rotate_credential(credential, key).expect("must rotate");
    let rotated = store.credential(credential).expect("must exist");
    assert_eq!(rotated.name(), "net-cred");
    assert_eq!(rotated.kind(), SourceKind::Network);
    assert_eq!(rotated.username().as_deref(), Some("ops"));
    assert_eq!(rotated.password(), &None);
    assert_eq!(rotated.ssh_key().as_deref(), Some("KEY"));
}

#[test]
fn duplicate_names_are_rejected() {
    let store = Store::new();
    fixtures::network_source(&store, "net", &["10.0.0.1"]);
    let again = Credential::builder()
        .name("net-cred")
        .kind(SourceKind::Network)
        .username("root")
        .password("pw")
        .build();
    assert_matches!(store.add_credential(again), Err(Error::Duplicate { entity: "credential", .. }));
}

#[test]
fn source_credential_kinds_must_match() {
    let store = Store::new();
    let vc = store
        .add_credential(
            Credential::builder()
                .name("vc")
                .kind(SourceKind::Vcenter)
                .username("admin")
                .password("pw")
                .build(),
        )
        .expect("must add credential");
    let source = Source::builder()
        .name("net")
        .kind(SourceKind::Network)
        .hosts(vec![String::from("10.0.0.1")])
        .credentials(vec![vc])
        .build();
    assert_matches!(store.add_source(source), Err(Error::Validation { field: "credentials", .. }));
}

#[test]
fn api_sources_take_one_literal_host() {
    let store = Store::new();
    let cred = store
        .add_credential(
            Credential::builder()
                .name("sat")
                .kind(SourceKind::Satellite)
                .username("admin")
                .password("pw")
                .build(),
        )
        .expect("must add credential");
    let source = Source::builder()
        .name("sat")
        .kind(SourceKind::Satellite)
        .hosts(vec![String::from("10.0.0.0/30")])
        .credentials(vec![cred])
        .build();
    assert_matches!(store.add_source(source), Err(Error::Validation { field: "hosts", .. }));

    let bad_host = Source::builder()
        .name("sat")
        .kind(SourceKind::Satellite)
        .hosts(vec![String::from("10.0.0.300")])
        .credentials(vec![cred])
        .build();
    assert_matches!(store.add_source(bad_host), Err(Error::HostSpec(_)));
}

#[test]
fn inspect_jobs_compose_tasks_in_order() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let (_, b) = fixtures::network_source(&store, "b", &["10.0.1.1"]);
    let scan = store
        .add_scan(Scan::builder().name("scan").sources(vec![a, b]).build())
        .expect("must add scan");

    let job = store.create_job_for_scan(scan).expect("must create job");
    let tasks = store.tasks(job).expect("must list tasks");
    let kinds = tasks.iter().map(|t| (t.kind(), t.source())).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            (TaskKind::Connect, Some(a)),
            (TaskKind::Connect, Some(b)),
            (TaskKind::Inspect, Some(a)),
            (TaskKind::Inspect, Some(b)),
            (TaskKind::Fingerprint, None),
        ]
    );

    assert_eq!(tasks[2].prerequisites(), &vec![tasks[0].id()]);
    assert_eq!(tasks[3].prerequisites(), &vec![tasks[1].id()]);
    assert_eq!(tasks[4].prerequisites(), &vec![tasks[2].id(), tasks[3].id()]);
    assert_eq!(
        tasks.iter().map(|t| t.sequence_number()).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
}

#[test]
fn connect_jobs_have_only_connect_tasks() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let job = store
        .create_job(
            NewJob::builder()
                .scan_type(ScanType::Connect)
                .sources(vec![a])
                .build(),
        )
        .expect("must create job");
    let tasks = store.tasks(job).expect("must list tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind(), TaskKind::Connect);
}

#[test]
fn invalid_concurrency_is_rejected() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let options = ScanOptions::builder().max_concurrency(0).build();
    assert_matches!(
        store.create_job(NewJob::builder().sources(vec![a]).options(options).build()),
        Err(Error::Validation { field: "max_concurrency", .. })
    );
}

#[test]
fn terminal_tasks_never_move_backwards() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let job = store
        .create_job(NewJob::builder().sources(vec![a]).build())
        .expect("must create job");
    let task = store.tasks(job).expect("must list")[0].id();

    store.set_task_status(task, Status::Pending, "queued").expect("pending");
    let running = store.set_task_status(task, Status::Running, "running").expect("running");
    assert!(running.start_time().is_some());
    let done = store.set_task_status(task, Status::Completed, "done").expect("completed");
    assert!(done.end_time().is_some());

    assert_matches!(
        store.set_task_status(task, Status::Running, "again"),
        Err(Error::Transition { from: Status::Completed, to: Status::Running, .. })
    );
    assert_matches!(store.reset_task(task), Err(Error::Transition { .. }));
}

#[test]
fn stats_increment_and_update() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let job = store
        .create_job(NewJob::builder().sources(vec![a]).build())
        .expect("must create job");
    let task = store.tasks(job).expect("must list")[0].id();

    store
        .update_stats(task, StatsUpdate::builder().systems_count(3).build())
        .expect("must update");
    store.increment_stats(task, StatKind::Scanned).expect("must increment");
    store.increment_stats(task, StatKind::Failed).expect("must increment");
    let stats = store.increment_stats(task, StatKind::Unreachable).expect("must increment");

    assert_eq!(stats.systems_count(), 3);
    assert_eq!(stats.handled(), 3);
    assert!(stats.is_balanced());
}

#[test]
fn concurrent_increments_are_serialized() {
    let store = std::sync::Arc::new(Store::new());
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let job = store
        .create_job(NewJob::builder().sources(vec![a]).build())
        .expect("must create job");
    let task = store.tasks(job).expect("must list")[0].id();

    let handles = (0..8)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    store.increment_stats(task, StatKind::Scanned).expect("must increment");
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("thread must not panic");
    }
    assert_eq!(store.task(task).expect("task").stats().systems_scanned(), 800);
}

#[test]
fn reset_clears_results() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let job = store
        .create_job(NewJob::builder().sources(vec![a]).build())
        .expect("must create job");
    let tasks = store.tasks(job).expect("must list");
    let (connect, inspect) = (tasks[0].id(), tasks[1].id());

    store
        .record_connection(
            SystemConnectionResult::builder()
                .task(connect)
                .source(a)
                .name("10.0.0.1")
                .status(HostStatus::Success)
                .build(),
        )
        .expect("must record");
    let group = fixtures::group(&store, inspect, a);
    store
        .record_inspection(
            group,
            InspectResult::from_facts("10.0.0.1", HostStatus::Success, fixtures::facts(json!({"uname_hostname": "a"}))),
        )
        .expect("must record");
    store.increment_stats(inspect, StatKind::Scanned).expect("must increment");

    store.set_task_status(connect, Status::Running, "running").expect("running");
    store.reset_task(connect).expect("must reset");
    store.reset_task(inspect).expect("must reset");

    assert!(store.connection_results(connect).is_empty());
    assert!(store.groups_for_task(inspect).is_empty());
    assert!(store.inspection_results(group).is_empty());
    let task = store.task(inspect).expect("task");
    assert_eq!(task.stats().handled(), 0);
    assert_eq!(task.status(), Status::Pending);
}

#[test]
fn successful_inspections_need_facts() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.1"]);
    let job = store
        .create_job(NewJob::builder().sources(vec![a]).build())
        .expect("must create job");
    let inspect = store.tasks(job).expect("must list")[1].id();
    let group = fixtures::group(&store, inspect, a);

    let empty = InspectResult::builder().name("h").status(HostStatus::Success).build();
    assert_matches!(store.record_inspection(group, empty), Err(Error::Validation { .. }));

    let failed = InspectResult::builder().name("h").status(HostStatus::Failed).build();
    assert!(store.record_inspection(group, failed).is_ok());
}

#[test]
fn connection_pages_filter_and_order() {
    let store = Store::new();
    let (_, a) = fixtures::network_source(&store, "a", &["10.0.0.[1:4]"]);
    let job = store
        .create_job(NewJob::builder().sources(vec![a]).build())
        .expect("must create job");
    let connect = store.tasks(job).expect("must list")[0].id();

    for (host, status) in [
        ("10.0.0.3", HostStatus::Success),
        ("10.0.0.1", HostStatus::Failed),
        ("10.0.0.4", HostStatus::Unreachable),
        ("10.0.0.2", HostStatus::Success),
    ] {
        store
            .record_connection(
                SystemConnectionResult::builder()
                    .task(connect)
                    .source(a)
                    .name(host)
                    .status(status)
                    .build(),
            )
            .expect("must record");
    }

    let success = ResultQuery::builder()
        .status(HostStatus::Success)
        .ordering("name".parse::<Ordering>().expect("ordering"))
        .build();
    let page = store.connection_page(job, &success).expect("must page");
    let names = page.results.iter().map(|r| r.name().as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["10.0.0.2", "10.0.0.3"]);

    let by_status = ResultQuery::builder()
        .ordering("-status".parse::<Ordering>().expect("ordering"))
        .page_size(2)
        .build();
    let page = store.connection_page(job, &by_status).expect("must page");
    assert_eq!(page.count, 4);
    assert!(page.has_next);
    assert_eq!(page.results[0].status(), HostStatus::Unreachable);
    assert_eq!(page.results[1].status(), HostStatus::Failed);
}

#[test]
fn aggregate_is_cached_until_report_changes() {
    let store = Store::new();
    let report = store
        .create_report(NewReport::builder().report_version("1.0.0").build())
        .expect("must create report");

    let mut builds = 0;
    let mut build = |_: &facts::ReportContents| -> Result<facts::AggregateReport, Error> {
        builds += 1;
        Ok(facts::AggregateReport {
            socket_pairs: builds,
            ..Default::default()
        })
    };

    let first = store.aggregate(report, &mut build).expect("must build");
    let second = store.aggregate(report, &mut build).expect("must reuse");
    assert_eq!(first, second);

    store
        .set_deployments(
            report,
            DeploymentsReport {
                status: DeploymentsStatus::Complete,
                fingerprints: Vec::new(),
            },
        )
        .expect("must set deployments");
    let third = store.aggregate(report, &mut build).expect("must rebuild");
    assert_eq!(third.socket_pairs, 2);
}

#[test]
fn merged_reports_union_groups() {
    let store = Store::new();
    let g1 = store.add_group(fixtures::uploaded_group("one")).expect("group");
    let g2 = store.add_group(fixtures::uploaded_group("two")).expect("group");
    let r1 = store
        .create_report(NewReport::builder().report_version("1").groups(vec![g1, g2]).build())
        .expect("report");
    let r2 = store
        .create_report(NewReport::builder().report_version("1").groups(vec![g2]).build())
        .expect("report");

    let merged = store.merge_reports(&[r1, r2], "1").expect("must merge");
    assert_eq!(store.report(merged).expect("report").groups(), &vec![g1, g2]);
    assert_matches!(store.merge_reports(&[r1], "1"), Err(Error::Validation { .. }));
}

#[test]
fn imports_are_all_or_nothing() {
    let store = Store::new();
    let ok = InspectResult::from_facts("h1", HostStatus::Success, fixtures::facts(json!({"cpu_count": 2})));
    let empty = InspectResult::builder().name("h2").status(HostStatus::Success).build();
    let rejected = store.import_report(
        NewReport::builder().report_version("1").build(),
        vec![GroupContents {
            group: fixtures::uploaded_group("one"),
            results: vec![ok.clone(), empty],
        }],
    );
    assert_matches!(rejected, Err(Error::Validation { .. }));
    assert_matches!(store.group(facts::GroupId::from(1)), Err(Error::NotFound { .. }));

    let report = store
        .import_report(
            NewReport::builder().report_version("1").build(),
            vec![GroupContents {
                group: fixtures::uploaded_group("one"),
                results: vec![ok],
            }],
        )
        .expect("must import");
    let contents = store.report_contents(report).expect("contents");
    assert_eq!(contents.groups.len(), 1);
    assert_eq!(contents.groups[0].results[0].fact("cpu_count"), Some(&json!(2)));
}
