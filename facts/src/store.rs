//! The in-memory transactional store behind every table.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, PoisonError},
};

use time::OffsetDateTime;
use tracing::{debug, info};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    id::Key,
    query::{InspectionEntry, Page, ResultQuery},
    AggregateReport, CachedAggregate, ConnectionId, Credential, CredentialId, DeploymentsReport, Error,
    GroupId, HostStatus, InspectGroup, InspectResult, InspectionId, JobId, NewJob, Report, ReportId, Scan,
    ScanId, ScanJob, ScanTask, ScanType, Source, SourceId, StatKind, StatsUpdate, Status, SystemConnectionResult,
    TaskId, TaskKind, TaskStats,
};

/// A table of rows keyed by store-assigned identifiers.
///
/// Identifiers are never reused, even after deletion.
#[derive(Debug)]
struct Table<K, V> {
    last: K,
    rows: BTreeMap<K, V>,
}

impl<K: Key, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            last: K::default(),
            rows: BTreeMap::new(),
        }
    }
}

impl<K: Key, V> Table<K, V> {
    fn insert(&mut self, row: impl FnOnce(K) -> V) -> K {
        let id = self.last.next();
        self.last = id;
        self.rows.insert(id, row(id));
        id
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values()
    }
}

#[derive(Debug, Default)]
struct Tables {
    credentials: Table<CredentialId, Credential>,
    sources: Table<SourceId, Source>,
    scans: Table<ScanId, Scan>,
    jobs: Table<JobId, ScanJob>,
    tasks: Table<TaskId, ScanTask>,
    connections: Table<ConnectionId, SystemConnectionResult>,
    groups: Table<GroupId, InspectGroup>,
    inspections: Table<InspectionId, InspectResult>,
    reports: Table<ReportId, Report>,
    deployments: BTreeMap<ReportId, DeploymentsReport>,
    aggregates: BTreeMap<ReportId, CachedAggregate>,
}

macro_rules! lookup {
    ($table:expr, $id:expr, $entity:literal) => {
        $table.rows.get(&$id).ok_or(Error::NotFound {
            entity: $entity,
            id: $id.into_inner(),
        })
    };
    (mut $table:expr, $id:expr, $entity:literal) => {
        $table.rows.get_mut(&$id).ok_or(Error::NotFound {
            entity: $entity,
            id: $id.into_inner(),
        })
    };
}

/// Parameters for a new [`Report`].
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder)]
pub struct NewReport {
    /// External identity; generated when unset.
    #[builder(default, setter(strip_option))]
    pub report_platform_id: Option<Uuid>,

    /// Version of the software producing the report.
    #[builder(setter(into))]
    pub report_version: String,

    /// The job producing the report, if any.
    #[builder(default, setter(strip_option))]
    pub job: Option<JobId>,

    /// Inspection groups included in the report.
    #[builder(default)]
    pub groups: Vec<GroupId>,
}

/// An inspection group with its results.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GroupContents {
    /// The group.
    pub group: InspectGroup,

    /// Its results, in insertion order.
    pub results: Vec<InspectResult>,
}

/// A consistent snapshot of everything in a report.
#[derive(Clone, PartialEq, Debug)]
pub struct ReportContents {
    /// The report envelope.
    pub report: Report,

    /// The report's groups in report order.
    pub groups: Vec<GroupContents>,

    /// The deployments report, once fingerprinting has run.
    pub deployments: Option<DeploymentsReport>,
}

/// The in-memory, transactional store for every entity in the pipeline.
///
/// Each operation takes the store lock once, validates its input, then applies all of its writes;
/// an operation that returns an error leaves the store unchanged.
/// Share the store between tasks with an [`std::sync::Arc`].
#[derive(Debug, Default)]
pub struct Store {
    tables: Mutex<Tables>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, op: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut tables)
    }

    // Credentials

    /// Validate and insert a credential.
    pub fn add_credential(&self, credential: Credential) -> Result<CredentialId, Error> {
        credential.validate()?;
        self.with(|t| {
            if t.credentials.values().any(|c| c.name() == credential.name()) {
                return Err(Error::Duplicate {
                    entity: "credential",
                    name: credential.name().clone(),
                });
            }
            Ok(t.credentials.insert(|id| {
                let mut credential = credential;
                credential.id = id;
                credential
            }))
        })
    }

    /// Look up a credential.
    pub fn credential(&self, id: CredentialId) -> Result<Credential, Error> {
        self.with(|t| lookup!(t.credentials, id, "credential").cloned())
    }

    /// Look up a credential by name.
    pub fn credential_by_name(&self, name: &str) -> Option<Credential> {
        self.with(|t| t.credentials.values().find(|c| c.name() == name).cloned())
    }

    /// Replace the secret material of a credential.
    pub fn rotate_credential(&self, id: CredentialId, secrets: Credential) -> Result<(), Error> {
        self.with(|t| lookup!(mut t.credentials, id, "credential")?.rotate(secrets))
    }

    /// Delete a credential that no source references.
    pub fn delete_credential(&self, id: CredentialId) -> Result<(), Error> {
        self.with(|t| {
            lookup!(t.credentials, id, "credential")?;
            if let Some(source) = t.sources.values().find(|s| s.credentials().contains(&id)) {
                return Err(Error::CredentialInUse {
                    credential: id,
                    used_by: source.id(),
                });
            }
            t.credentials.rows.remove(&id);
            Ok(())
        })
    }

    // Sources

    /// Validate and insert a source.
    pub fn add_source(&self, source: Source) -> Result<SourceId, Error> {
        self.with(|t| {
            let credentials = source
                .credentials()
                .iter()
                .filter_map(|id| t.credentials.rows.get(id).cloned())
                .collect::<Vec<_>>();
            source.validate(&credentials)?;
            if t.sources.values().any(|s| s.name() == source.name()) {
                return Err(Error::Duplicate {
                    entity: "source",
                    name: source.name().clone(),
                });
            }
            Ok(t.sources.insert(|id| {
                let mut source = source;
                source.id = id;
                source
            }))
        })
    }

    /// Look up a source.
    pub fn source(&self, id: SourceId) -> Result<Source, Error> {
        self.with(|t| lookup!(t.sources, id, "source").cloned())
    }

    /// Look up a source by name.
    pub fn source_by_name(&self, name: &str) -> Option<Source> {
        self.with(|t| t.sources.values().find(|s| s.name() == name).cloned())
    }

    // Scans

    /// Validate and insert a scan.
    pub fn add_scan(&self, scan: Scan) -> Result<ScanId, Error> {
        scan.options().validate()?;
        self.with(|t| {
            if scan.sources().is_empty() {
                return Err(Error::Validation {
                    entity: "scan",
                    field: "sources",
                    reason: String::from("at least one source is required"),
                });
            }
            for source in scan.sources() {
                lookup!(t.sources, *source, "source")?;
            }
            if t.scans.values().any(|s| s.name() == scan.name()) {
                return Err(Error::Duplicate {
                    entity: "scan",
                    name: scan.name().clone(),
                });
            }
            Ok(t.scans.insert(|id| {
                let mut scan = scan;
                scan.id = id;
                scan
            }))
        })
    }

    /// Look up a scan.
    pub fn scan(&self, id: ScanId) -> Result<Scan, Error> {
        self.with(|t| lookup!(t.scans, id, "scan").cloned())
    }

    /// Look up a scan by name.
    pub fn scan_by_name(&self, name: &str) -> Option<Scan> {
        self.with(|t| t.scans.values().find(|s| s.name() == name).cloned())
    }

    // Jobs and tasks

    /// Create a job from a scan, copying its sources and options.
    pub fn create_job_for_scan(&self, scan: ScanId) -> Result<JobId, Error> {
        let scan = self.scan(scan)?;
        self.create_job(
            NewJob::builder()
                .scan(scan.id())
                .scan_type(scan.scan_type())
                .sources(scan.sources().clone())
                .options(scan.options().clone())
                .build(),
        )
    }

    /// Create a job and its tasks.
    ///
    /// Tasks are created in sequence: one connect task per source,
    /// then (for inspect scans) one inspect task per source depending on its connect task,
    /// then one fingerprint task depending on every inspect task.
    /// A job with a report and no sources is a fingerprint-only job with a single fingerprint task.
    pub fn create_job(&self, job: NewJob) -> Result<JobId, Error> {
        job.options.validate()?;
        self.with(|t| {
            for source in &job.sources {
                lookup!(t.sources, *source, "source")?;
            }
            if let Some(report) = job.report {
                lookup!(t.reports, report, "report")?;
            }
            if job.sources.is_empty() && job.report.is_none() {
                return Err(Error::Validation {
                    entity: "job",
                    field: "sources",
                    reason: String::from("a job needs sources or a report to fingerprint"),
                });
            }

            let job_id = t.jobs.insert(|id| ScanJob {
                id,
                scan: job.scan,
                scan_type: job.scan_type,
                sources: job.sources.clone(),
                options: job.options.clone(),
                status: Status::Created,
                status_message: String::from("Job is created."),
                tasks: Vec::new(),
                report: job.report,
                start_time: None,
                end_time: None,
            });

            let mut sequence = 0u32;
            let mut add_task = |t: &mut Tables, source, kind, prerequisites| {
                let task = t.tasks.insert(|id| ScanTask {
                    id,
                    job: job_id,
                    source,
                    kind,
                    sequence_number: sequence,
                    status: Status::Created,
                    status_message: String::from("Task is created."),
                    stats: TaskStats::default(),
                    prerequisites,
                    start_time: None,
                    end_time: None,
                });
                sequence += 1;
                task
            };

            let mut tasks = Vec::new();
            let connects = job
                .sources
                .iter()
                .map(|source| add_task(t, Some(*source), TaskKind::Connect, Vec::new()))
                .collect::<Vec<_>>();
            tasks.extend(&connects);

            let fingerprint_only = job.sources.is_empty();
            if job.scan_type == ScanType::Inspect || fingerprint_only {
                let inspects = job
                    .sources
                    .iter()
                    .zip(&connects)
                    .map(|(source, connect)| add_task(t, Some(*source), TaskKind::Inspect, vec![*connect]))
                    .collect::<Vec<_>>();
                tasks.extend(&inspects);
                tasks.push(add_task(t, None, TaskKind::Fingerprint, inspects));
            }

            if let Some(row) = t.jobs.rows.get_mut(&job_id) {
                row.tasks = tasks;
            }
            info!(job = %job_id, "created job");
            Ok(job_id)
        })
    }

    /// Look up a job.
    pub fn job(&self, id: JobId) -> Result<ScanJob, Error> {
        self.with(|t| lookup!(t.jobs, id, "job").cloned())
    }

    /// Every job, in creation order.
    pub fn jobs(&self) -> Vec<ScanJob> {
        self.with(|t| t.jobs.values().cloned().collect())
    }

    /// The tasks of a job, in sequence order.
    pub fn tasks(&self, job: JobId) -> Result<Vec<ScanTask>, Error> {
        self.with(|t| {
            let job = lookup!(t.jobs, job, "job")?;
            job.tasks
                .iter()
                .map(|id| lookup!(t.tasks, *id, "task").cloned())
                .collect()
        })
    }

    /// Look up a task.
    pub fn task(&self, id: TaskId) -> Result<ScanTask, Error> {
        self.with(|t| lookup!(t.tasks, id, "task").cloned())
    }

    /// Move a job to `status`, recording start and end times.
    pub fn set_job_status(&self, id: JobId, status: Status, message: impl Into<String>) -> Result<ScanJob, Error> {
        let message = message.into();
        self.with(|t| {
            let job = lookup!(mut t.jobs, id, "job")?;
            if !job.status.can_become(status) {
                return Err(Error::Transition {
                    entity: "job",
                    id: id.into_inner(),
                    from: job.status,
                    to: status,
                });
            }
            let now = OffsetDateTime::now_utc();
            if status == Status::Running && job.start_time.is_none() {
                job.start_time = Some(now);
            }
            if status.is_terminal() {
                job.end_time = Some(now);
            }
            job.status = status;
            job.status_message = message;
            Ok(job.clone())
        })
    }

    /// Attach the report produced (or consumed) by a job.
    pub fn set_job_report(&self, id: JobId, report: ReportId) -> Result<(), Error> {
        self.with(|t| {
            lookup!(t.reports, report, "report")?;
            lookup!(mut t.jobs, id, "job")?.report = Some(report);
            Ok(())
        })
    }

    /// Move a task to `status`, recording start and end times.
    pub fn set_task_status(&self, id: TaskId, status: Status, message: impl Into<String>) -> Result<ScanTask, Error> {
        let message = message.into();
        self.with(|t| {
            let task = lookup!(mut t.tasks, id, "task")?;
            if !task.status.can_become(status) {
                return Err(Error::Transition {
                    entity: "task",
                    id: id.into_inner(),
                    from: task.status,
                    to: status,
                });
            }
            let now = OffsetDateTime::now_utc();
            if status == Status::Running {
                task.start_time = Some(now);
            }
            if status.is_terminal() {
                task.end_time = Some(now);
            }
            task.status = status;
            task.status_message = message;
            Ok(task.clone())
        })
    }

    /// Atomically add one to a task counter.
    pub fn increment_stats(&self, id: TaskId, kind: StatKind) -> Result<TaskStats, Error> {
        self.with(|t| {
            let task = lookup!(mut t.tasks, id, "task")?;
            task.stats.increment(kind);
            Ok(task.stats)
        })
    }

    /// Atomically replace a subset of task counters.
    pub fn update_stats(&self, id: TaskId, update: StatsUpdate) -> Result<TaskStats, Error> {
        self.with(|t| {
            let task = lookup!(mut t.tasks, id, "task")?;
            task.stats.apply(update);
            Ok(task.stats)
        })
    }

    /// Clear a non-terminal task's counters and results so that it can run again.
    pub fn reset_task(&self, id: TaskId) -> Result<ScanTask, Error> {
        self.with(|t| {
            let task = lookup!(t.tasks, id, "task")?;
            if task.status.is_terminal() {
                return Err(Error::Transition {
                    entity: "task",
                    id: id.into_inner(),
                    from: task.status,
                    to: Status::Pending,
                });
            }

            t.connections.rows.retain(|_, row| row.task() != id);
            let groups = t
                .groups
                .values()
                .filter(|g| g.task() == Some(id))
                .map(|g| g.id())
                .collect::<HashSet<_>>();
            t.inspections.rows.retain(|_, row| !groups.contains(&row.group));
            t.groups.rows.retain(|gid, _| !groups.contains(gid));

            let task = lookup!(mut t.tasks, id, "task")?;
            task.stats = TaskStats::default();
            task.status = Status::Pending;
            task.status_message = String::from("Task is pending.");
            task.start_time = None;
            task.end_time = None;
            debug!(task = %id, "reset task");
            Ok(task.clone())
        })
    }

    // Results

    /// Record the connection outcome for one host.
    pub fn record_connection(&self, result: SystemConnectionResult) -> Result<ConnectionId, Error> {
        self.with(|t| {
            lookup!(t.tasks, result.task(), "task")?;
            Ok(t.connections.insert(|id| {
                let mut result = result;
                result.id = id;
                result
            }))
        })
    }

    /// Connection outcomes recorded by a task, in insertion order.
    pub fn connection_results(&self, task: TaskId) -> Vec<SystemConnectionResult> {
        self.with(|t| {
            t.connections
                .values()
                .filter(|row| row.task() == task)
                .cloned()
                .collect()
        })
    }

    /// Insert an inspection group.
    pub fn add_group(&self, group: InspectGroup) -> Result<GroupId, Error> {
        self.with(|t| {
            if let Some(task) = group.task() {
                lookup!(t.tasks, task, "task")?;
            }
            Ok(t.groups.insert(|id| {
                let mut group = group;
                group.id = id;
                group
            }))
        })
    }

    /// Look up an inspection group.
    pub fn group(&self, id: GroupId) -> Result<InspectGroup, Error> {
        self.with(|t| lookup!(t.groups, id, "inspect group").cloned())
    }

    /// Groups produced by a task.
    pub fn groups_for_task(&self, task: TaskId) -> Vec<InspectGroup> {
        self.with(|t| t.groups.values().filter(|g| g.task() == Some(task)).cloned().collect())
    }

    /// Record the inspection of one host together with its raw facts.
    ///
    /// Successful results must carry at least one fact.
    pub fn record_inspection(&self, group: GroupId, result: InspectResult) -> Result<InspectionId, Error> {
        if result.status() == HostStatus::Success && result.facts().is_empty() {
            return Err(Error::Validation {
                entity: "inspect result",
                field: "facts",
                reason: format!("successful result for '{}' has no facts", result.name()),
            });
        }
        self.with(|t| {
            lookup!(t.groups, group, "inspect group")?;
            Ok(t.inspections.insert(|id| {
                let mut result = result;
                result.id = id;
                result.group = group;
                result
            }))
        })
    }

    /// Results of a group, in insertion order.
    pub fn inspection_results(&self, group: GroupId) -> Vec<InspectResult> {
        self.with(|t| {
            t.inspections
                .values()
                .filter(|r| r.group == group)
                .cloned()
                .collect()
        })
    }

    /// Page through the connection results of a job.
    pub fn connection_page(&self, job: JobId, query: &ResultQuery) -> Result<Page<SystemConnectionResult>, Error> {
        let rows = self.with(|t| -> Result<_, Error> {
            let job = lookup!(t.jobs, job, "job")?;
            Ok(t.connections
                .values()
                .filter(|row| job.tasks.contains(&row.task()))
                .filter(|row| query.status().map_or(true, |s| row.status() == s))
                .filter(|row| query.source().map_or(true, |s| row.source() == s))
                .cloned()
                .collect::<Vec<_>>())
        })?;

        let mut rows = rows;
        if let Some(ordering) = query.ordering() {
            rows.sort_by(|a, b| ordering.compare((a.name(), a.status()), (b.name(), b.status())));
        }
        Page::paginate(rows, query)
    }

    /// Page through the inspection results of a job.
    pub fn inspection_page(&self, job: JobId, query: &ResultQuery) -> Result<Page<InspectionEntry>, Error> {
        let mut rows = self.with(|t| -> Result<_, Error> {
            let job = lookup!(t.jobs, job, "job")?;
            let groups = t
                .groups
                .values()
                .filter(|g| g.task().map_or(false, |task| job.tasks.contains(&task)))
                .filter(|g| query.source().map_or(true, |s| g.source() == Some(s)))
                .map(|g| (g.id(), g.clone()))
                .collect::<BTreeMap<_, _>>();
            Ok(t.inspections
                .values()
                .filter(|r| query.status().map_or(true, |s| r.status() == s))
                .filter_map(|r| {
                    groups.get(&r.group).map(|group| InspectionEntry {
                        group: group.clone(),
                        result: r.clone(),
                    })
                })
                .collect::<Vec<_>>())
        })?;

        if let Some(ordering) = query.ordering() {
            rows.sort_by(|a, b| {
                ordering.compare(
                    (a.result.name(), a.result.status()),
                    (b.result.name(), b.result.status()),
                )
            });
        }
        Page::paginate(rows, query)
    }

    // Reports

    /// Create a report over existing inspection groups.
    pub fn create_report(&self, report: NewReport) -> Result<ReportId, Error> {
        self.with(|t| {
            for group in &report.groups {
                lookup!(t.groups, *group, "inspect group")?;
            }
            let now = OffsetDateTime::now_utc();
            let id = t.reports.insert(|id| Report {
                id,
                report_platform_id: report.report_platform_id.unwrap_or_else(Uuid::new_v4),
                report_version: report.report_version,
                job: report.job,
                groups: report.groups,
                created_at: now,
                updated_at: now,
                revision: 0,
            });
            info!(report = %id, "created report");
            Ok(id)
        })
    }

    /// Insert uploaded groups with their results and a report over them, all in one operation.
    ///
    /// The `groups` field of `report` is ignored; the report contains exactly the imported groups.
    pub fn import_report(&self, report: NewReport, groups: Vec<GroupContents>) -> Result<ReportId, Error> {
        for contents in &groups {
            if let Some(empty) = contents
                .results
                .iter()
                .find(|r| r.status() == HostStatus::Success && r.facts().is_empty())
            {
                return Err(Error::Validation {
                    entity: "inspect result",
                    field: "facts",
                    reason: format!("successful result for '{}' has no facts", empty.name()),
                });
            }
        }
        self.with(|t| {
            let mut ids = Vec::with_capacity(groups.len());
            for contents in groups {
                let group_id = t.groups.insert(|id| {
                    let mut group = contents.group;
                    group.id = id;
                    group
                });
                for result in contents.results {
                    t.inspections.insert(|id| {
                        let mut result = result;
                        result.id = id;
                        result.group = group_id;
                        result
                    });
                }
                ids.push(group_id);
            }
            let now = OffsetDateTime::now_utc();
            let id = t.reports.insert(|id| Report {
                id,
                report_platform_id: report.report_platform_id.unwrap_or_else(Uuid::new_v4),
                report_version: report.report_version,
                job: report.job,
                groups: ids,
                created_at: now,
                updated_at: now,
                revision: 0,
            });
            info!(report = %id, "imported report");
            Ok(id)
        })
    }

    /// Look up a report.
    pub fn report(&self, id: ReportId) -> Result<Report, Error> {
        self.with(|t| lookup!(t.reports, id, "report").cloned())
    }

    /// A consistent snapshot of a report, its groups and results, and its deployments.
    pub fn report_contents(&self, id: ReportId) -> Result<ReportContents, Error> {
        self.with(|t| contents(t, id))
    }

    /// Create a report whose groups are the union of the groups of `reports`.
    pub fn merge_reports(&self, reports: &[ReportId], report_version: &str) -> Result<ReportId, Error> {
        if reports.len() < 2 {
            return Err(Error::Validation {
                entity: "report",
                field: "reports",
                reason: String::from("at least two reports are required to merge"),
            });
        }
        let mut groups = Vec::new();
        self.with(|t| {
            for id in reports {
                for group in &lookup!(t.reports, *id, "report")?.groups {
                    if !groups.contains(group) {
                        groups.push(*group);
                    }
                }
            }
            Ok::<_, Error>(())
        })?;
        self.create_report(
            NewReport::builder()
                .report_version(report_version)
                .groups(groups)
                .build(),
        )
    }

    /// Replace the deployments report of a report, marking it updated.
    pub fn set_deployments(&self, id: ReportId, deployments: DeploymentsReport) -> Result<(), Error> {
        self.with(|t| {
            touch(lookup!(mut t.reports, id, "report")?);
            t.deployments.insert(id, deployments);
            Ok(())
        })
    }

    /// The deployments report of a report, if fingerprinting has run.
    pub fn deployments(&self, id: ReportId) -> Result<Option<DeploymentsReport>, Error> {
        self.with(|t| {
            lookup!(t.reports, id, "report")?;
            Ok(t.deployments.get(&id).cloned())
        })
    }

    /// Return the cached aggregate of a report, rebuilding it with `build` if the report changed since.
    ///
    /// A stale cache row is replaced in the same operation that reads the report,
    /// so concurrent callers never observe a half-built aggregate.
    pub fn aggregate<E>(
        &self,
        id: ReportId,
        build: impl FnOnce(&ReportContents) -> Result<AggregateReport, E>,
    ) -> Result<AggregateReport, E>
    where
        E: From<Error>,
    {
        self.with(|t| {
            let report = lookup!(t.reports, id, "report")?;
            if let Some(cached) = t.aggregates.get(&id) {
                if cached.report_revision >= report.revision {
                    debug!(report = %id, "using cached aggregate");
                    return Ok(cached.aggregate.clone());
                }
            }

            let revision = report.revision;
            t.aggregates.remove(&id);
            let aggregate = build(&contents(t, id)?)?;
            t.aggregates.insert(
                id,
                CachedAggregate {
                    report_revision: revision,
                    computed_at: OffsetDateTime::now_utc(),
                    aggregate: aggregate.clone(),
                },
            );
            info!(report = %id, revision, "built aggregate");
            Ok(aggregate)
        })
    }

    /// The cached aggregate of a report, fresh or not.
    pub fn cached_aggregate(&self, id: ReportId) -> Option<CachedAggregate> {
        self.with(|t| t.aggregates.get(&id).cloned())
    }
}

fn touch(report: &mut Report) {
    report.revision += 1;
    report.updated_at = OffsetDateTime::now_utc();
}

fn contents(t: &Tables, id: ReportId) -> Result<ReportContents, Error> {
    let report = lookup!(t.reports, id, "report")?.clone();
    let groups = report
        .groups
        .iter()
        .map(|gid| {
            let group = lookup!(t.groups, *gid, "inspect group")?.clone();
            let results = t
                .inspections
                .values()
                .filter(|r| r.group == *gid)
                .cloned()
                .collect();
            Ok(GroupContents { group, results })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(ReportContents {
        deployments: t.deployments.get(&id).cloned(),
        report,
        groups,
    })
}
