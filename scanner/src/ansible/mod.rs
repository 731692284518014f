//! Drives Ansible for network scans and turns its event stream into per-host outcomes.
//!
//! The bridge's only inputs are an [`Inventory`], a [`Playbook`], and extra variables;
//! its only output is a stream of [`RunnerEvent`]s delivered to an [`EventHandler`].
//! [`AnsibleRunner`] implementations decide how the playbook actually runs:
//! [`ProcessRunner`] shells out to `ansible-runner`, tests substitute in-process fakes.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use async_trait::async_trait;
use facts::{JobId, RawFacts};
use serde::Deserialize;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::BridgeError;

mod inventory;
mod process;
mod ssh;

pub use inventory::*;
pub use process::*;
pub use ssh::*;

/// Facts whose names start with this prefix are playbook scratch space and never persisted.
pub const INTERNAL_FACT_PREFIX: &str = "internal_";

/// The playbooks the bridge runs.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, AsRefStr)]
pub enum Playbook {
    /// Checks that a host accepts the credential.
    #[strum(serialize = "connect.yml")]
    Connect,

    /// Collects raw facts.
    #[strum(serialize = "inspect.yml")]
    Inspect,
}

/// How a runner invocation ended.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    /// The playbook ran to completion; per-host statuses stand.
    Successful,

    /// The playbook reported host failures or could not run.
    Failed,

    /// Every host was unreachable.
    Unreachable,

    /// The event handler requested cancellation.
    Canceled,

    /// The run exceeded its time limit.
    Timeout,
}

/// A single invocation of the runner against one inventory group.
#[derive(Clone, Debug, TypedBuilder)]
pub struct RunRequest {
    /// The job the run belongs to; used to name log streams.
    pub job: JobId,

    /// The playbook to run.
    pub playbook: Playbook,

    /// Hosts and their connection variables.
    pub inventory: Inventory,

    /// The inventory group to run against.
    #[builder(setter(into))]
    pub limit: String,

    /// Variables passed with `--extra-vars`.
    #[builder(default)]
    pub extra_vars: Map<String, Value>,

    /// Upper bound on the whole run.
    pub timeout: Duration,

    /// Per-host SSH connection timeout.
    pub ssh_timeout: Duration,

    /// Passphrase-protected keys that must be loaded into an SSH agent before running.
    #[builder(default)]
    pub agent_keys: Vec<(PathBuf, String)>,
}

/// What the event handler wants the runner to do next.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Control {
    /// Keep running.
    Continue,

    /// Stop the run as soon as possible.
    Cancel,
}

/// Receives runner events as they happen.
pub trait EventHandler: Send {
    /// Handle one event.
    fn handle(&mut self, event: RunnerEvent) -> Control;
}

/// Runs playbooks.
#[async_trait]
pub trait AnsibleRunner: Send + Sync {
    /// Run `request`, delivering every event to `events`.
    ///
    /// Host failures are reported through events, not as errors;
    /// an error means the runner itself could not run.
    async fn run(&self, request: RunRequest, events: &mut dyn EventHandler) -> Result<RunStatus, BridgeError>;
}

/// Classification of runner events the bridge acts on.
#[derive(Clone, Eq, PartialEq, Debug, EnumString)]
pub enum EventKind {
    /// A task succeeded on a host.
    #[strum(serialize = "runner_on_ok")]
    Ok,

    /// A task failed on a host.
    #[strum(serialize = "runner_on_failed")]
    Failed,

    /// A host could not be reached.
    #[strum(serialize = "runner_on_unreachable")]
    Unreachable,

    /// Anything else.
    #[strum(default)]
    Other(String),
}

/// One event emitted by the runner, as written by `ansible-runner --json`.
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct RunnerEvent {
    /// Event name, e.g. `runner_on_ok`.
    pub event: String,

    /// Event payload.
    #[serde(default)]
    pub event_data: EventData,

    /// Text the event printed.
    #[serde(default)]
    pub stdout: String,
}

/// The payload of a [`RunnerEvent`].
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct EventData {
    /// The host the event concerns.
    #[serde(default)]
    pub host: Option<String>,

    /// The task that produced the event.
    #[serde(default)]
    pub task: Option<String>,

    /// The task result.
    #[serde(default)]
    pub res: Value,

    /// Whether the task ignores errors.
    #[serde(default)]
    pub ignore_errors: Option<bool>,
}

impl RunnerEvent {
    /// Build an event; used by in-process runners.
    pub fn new(event: &str, host: &str, res: Value) -> Self {
        Self {
            event: event.to_owned(),
            event_data: EventData {
                host: Some(host.to_owned()),
                res,
                ..Default::default()
            },
            stdout: String::new(),
        }
    }

    /// The classified kind of the event.
    pub fn kind(&self) -> EventKind {
        EventKind::from_str(&self.event).unwrap_or_else(|_| EventKind::Other(self.event.clone()))
    }
}

/// The outcome of one host in a run.
#[derive(Clone, PartialEq, Debug)]
pub enum HostOutcome {
    /// The host ran the playbook; these are the persisted facts.
    Success(RawFacts),

    /// A task failed on the host.
    Failed(String),

    /// The host could not be reached.
    Unreachable(String),

    /// No event was received for the host.
    Missing,
}

/// Collects per-host outcomes from runner events, honoring the job's cancel token on every event.
#[derive(Debug)]
pub struct HostResults {
    cancel: CancellationToken,
    ok: BTreeSet<String>,
    facts: BTreeMap<String, RawFacts>,
    failed: BTreeMap<String, String>,
    unreachable: BTreeMap<String, String>,
}

impl HostResults {
    /// Collect events for a run observing `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ok: BTreeSet::new(),
            facts: BTreeMap::new(),
            failed: BTreeMap::new(),
            unreachable: BTreeMap::new(),
        }
    }

    /// The outcome of `host`.
    ///
    /// Unreachability wins over failure, which wins over success.
    pub fn outcome(&self, host: &str) -> HostOutcome {
        if let Some(reason) = self.unreachable.get(host) {
            return HostOutcome::Unreachable(reason.clone());
        }
        if let Some(reason) = self.failed.get(host) {
            return HostOutcome::Failed(reason.clone());
        }
        if self.ok.contains(host) {
            return HostOutcome::Success(self.facts.get(host).cloned().unwrap_or_default());
        }
        HostOutcome::Missing
    }
}

impl EventHandler for HostResults {
    fn handle(&mut self, event: RunnerEvent) -> Control {
        if self.cancel.is_cancelled() {
            return Control::Cancel;
        }

        let Some(host) = event.event_data.host.clone() else {
            return Control::Continue;
        };

        match event.kind() {
            EventKind::Ok => {
                self.ok.insert(host.clone());
                if let Some(Value::Object(facts)) = event.event_data.res.get("ansible_facts") {
                    let collected = self.facts.entry(host).or_default();
                    for (name, value) in facts {
                        if !name.starts_with(INTERNAL_FACT_PREFIX) {
                            collected.insert(name.clone(), value.clone());
                        }
                    }
                }
            }
            EventKind::Failed => {
                let reason = describe(&event);
                if event.event_data.ignore_errors.unwrap_or(false) {
                    warn!(%host, "ignored task failure: {reason}");
                } else {
                    debug!(%host, "task failed: {reason}");
                    self.failed.entry(host).or_insert(reason);
                }
            }
            EventKind::Unreachable => {
                let reason = describe(&event);
                debug!(%host, "unreachable: {reason}");
                self.unreachable.entry(host).or_insert(reason);
            }
            EventKind::Other(_) => {}
        }

        Control::Continue
    }
}

fn describe(event: &RunnerEvent) -> String {
    let task = event.event_data.task.as_deref().unwrap_or("unknown task");
    let msg = event
        .event_data
        .res
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("no message");
    format!("{task}: {msg}")
}
