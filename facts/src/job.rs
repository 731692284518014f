//! Scan jobs, their tasks, and task statistics.

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use time::OffsetDateTime;
use typed_builder::TypedBuilder;

use crate::{JobId, ReportId, ScanId, ScanOptions, ScanType, SourceId, Status, TaskId, TaskKind};

/// One execution of a [`crate::Scan`], or a fingerprint-only job over an existing report.
#[derive(Clone, PartialEq, Debug, Getters, CopyGetters, Serialize, Deserialize)]
pub struct ScanJob {
    /// Identifier of the job.
    #[getset(get_copy = "pub")]
    pub(crate) id: JobId,

    /// The scan this job executes; `None` for fingerprint-only jobs.
    #[getset(get_copy = "pub")]
    pub(crate) scan: Option<ScanId>,

    /// Copied from the scan when the job is created.
    #[getset(get_copy = "pub")]
    pub(crate) scan_type: ScanType,

    /// Sources scanned, copied from the scan when the job is created.
    #[getset(get = "pub")]
    pub(crate) sources: Vec<SourceId>,

    /// Options copied from the scan when the job is created.
    #[getset(get = "pub")]
    pub(crate) options: ScanOptions,

    /// Current status.
    #[getset(get_copy = "pub")]
    pub(crate) status: Status,

    /// Explains the current status, typically the reason a job failed.
    #[getset(get = "pub")]
    pub(crate) status_message: String,

    /// Tasks in sequence order.
    #[getset(get = "pub")]
    pub(crate) tasks: Vec<TaskId>,

    /// The report fingerprinted by this job.
    #[getset(get_copy = "pub")]
    pub(crate) report: Option<ReportId>,

    /// When the work started.
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) start_time: Option<OffsetDateTime>,

    /// When the work ended.
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) end_time: Option<OffsetDateTime>,
}

/// What a new [`ScanJob`] runs.
#[derive(Clone, PartialEq, Debug, TypedBuilder)]
pub struct NewJob {
    /// The scan being executed, if any.
    #[builder(default, setter(strip_option))]
    pub scan: Option<ScanId>,

    /// Whether to inspect or only connect.
    #[builder(default)]
    pub scan_type: ScanType,

    /// Sources scanned, in order.
    #[builder(default)]
    pub sources: Vec<SourceId>,

    /// Options for the run.
    #[builder(default)]
    pub options: ScanOptions,

    /// The report a fingerprint-only job processes.
    #[builder(default, setter(strip_option))]
    pub report: Option<ReportId>,
}

/// Per-task host counters.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, CopyGetters, Serialize, Deserialize)]
#[getset(get_copy = "pub")]
pub struct TaskStats {
    /// Hosts the task set out to handle.
    pub(crate) systems_count: u64,

    /// Hosts handled successfully.
    pub(crate) systems_scanned: u64,

    /// Hosts that rejected credentials or failed a required step.
    pub(crate) systems_failed: u64,

    /// Hosts that could not be reached.
    pub(crate) systems_unreachable: u64,
}

impl TaskStats {
    /// Hosts with a recorded outcome.
    pub fn handled(&self) -> u64 {
        self.systems_scanned + self.systems_failed + self.systems_unreachable
    }

    /// Whether every host has a recorded outcome.
    pub fn is_balanced(&self) -> bool {
        self.handled() == self.systems_count
    }
}

/// A counter in [`TaskStats`] that can be incremented.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum StatKind {
    /// [`TaskStats::systems_scanned`].
    Scanned,

    /// [`TaskStats::systems_failed`].
    Failed,

    /// [`TaskStats::systems_unreachable`].
    Unreachable,
}

/// Replaces a subset of [`TaskStats`]; unset fields are left unchanged.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct StatsUpdate {
    /// New value for [`TaskStats::systems_count`].
    pub systems_count: Option<u64>,

    /// New value for [`TaskStats::systems_scanned`].
    pub systems_scanned: Option<u64>,

    /// New value for [`TaskStats::systems_failed`].
    pub systems_failed: Option<u64>,

    /// New value for [`TaskStats::systems_unreachable`].
    pub systems_unreachable: Option<u64>,
}

impl TaskStats {
    pub(crate) fn increment(&mut self, kind: StatKind) {
        match kind {
            StatKind::Scanned => self.systems_scanned += 1,
            StatKind::Failed => self.systems_failed += 1,
            StatKind::Unreachable => self.systems_unreachable += 1,
        }
    }

    pub(crate) fn apply(&mut self, update: StatsUpdate) {
        if let Some(count) = update.systems_count {
            self.systems_count = count;
        }
        if let Some(scanned) = update.systems_scanned {
            self.systems_scanned = scanned;
        }
        if let Some(failed) = update.systems_failed {
            self.systems_failed = failed;
        }
        if let Some(unreachable) = update.systems_unreachable {
            self.systems_unreachable = unreachable;
        }
    }
}

/// A unit of work within a [`ScanJob`].
///
/// Tasks form a graph through `prerequisites`: inspect tasks depend on the connect task of their source,
/// and the fingerprint task depends on every inspect task of the job.
#[derive(Clone, PartialEq, Debug, Getters, CopyGetters, Serialize, Deserialize)]
pub struct ScanTask {
    /// Identifier of the task.
    #[getset(get_copy = "pub")]
    pub(crate) id: TaskId,

    /// The job this task belongs to.
    #[getset(get_copy = "pub")]
    pub(crate) job: JobId,

    /// The source this task works on; `None` for fingerprint tasks.
    #[getset(get_copy = "pub")]
    pub(crate) source: Option<SourceId>,

    /// What the task does.
    #[getset(get_copy = "pub")]
    pub(crate) kind: TaskKind,

    /// Position of the task within its job, starting at 0.
    #[getset(get_copy = "pub")]
    pub(crate) sequence_number: u32,

    /// Current status.
    #[getset(get_copy = "pub")]
    pub(crate) status: Status,

    /// Explains the current status.
    #[getset(get = "pub")]
    pub(crate) status_message: String,

    /// Progress counters for the task.
    #[getset(get_copy = "pub")]
    pub(crate) stats: TaskStats,

    /// Tasks that must complete before this one may run.
    #[getset(get = "pub")]
    pub(crate) prerequisites: Vec<TaskId>,

    /// When the work started.
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) start_time: Option<OffsetDateTime>,

    /// When the work ended.
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) end_time: Option<OffsetDateTime>,
}
