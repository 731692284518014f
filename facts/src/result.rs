//! Per-host connection and inspection results.

use std::collections::BTreeMap;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use typed_builder::TypedBuilder;

use crate::{ConnectionId, CredentialId, GroupId, HostStatus, InspectionId, SourceId, SourceKind, TaskId};

/// Raw facts about one host, keyed by fact name.
pub type RawFacts = BTreeMap<String, Value>;

/// The outcome of connecting to one host of a source.
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
pub struct SystemConnectionResult {
    /// Assigned by the store on insert.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    pub(crate) id: ConnectionId,

    /// The connect task that produced this result.
    #[getset(get_copy = "pub")]
    task: TaskId,

    /// The source the host belongs to.
    #[getset(get_copy = "pub")]
    source: SourceId,

    /// The host as addressed.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    name: String,

    /// Outcome for the host.
    #[getset(get_copy = "pub")]
    status: HostStatus,

    /// The credential that succeeded, or the last one attempted.
    ///
    /// `None` when no credential handled the host.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    credential: Option<CredentialId>,
}

/// A batch of inspection output from one source run.
///
/// Groups are the unit a report is built from: a report lists the groups it contains,
/// and uploaded details payloads become groups directly.
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
pub struct InspectGroup {
    /// Assigned by the store on insert.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    pub(crate) id: GroupId,

    /// The kind of source that produced the facts.
    #[getset(get_copy = "pub")]
    source_type: SourceKind,

    /// Name of the source that produced the facts.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    source_name: String,

    /// Identifies the server instance that produced the facts.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    server_id: String,

    /// Version of the software that produced the facts.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    server_version: String,

    /// The source scanned, when the group was produced by a local scan.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    source: Option<SourceId>,

    /// The inspect task that produced the group, when produced by a local scan.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    task: Option<TaskId>,

    /// When the facts were collected.
    #[builder(default = OffsetDateTime::now_utc())]
    #[getset(get_copy = "pub")]
    #[serde(with = "time::serde::rfc3339")]
    collected_at: OffsetDateTime,
}

/// One raw observation about a host.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RawFact {
    /// Fact name as emitted by the collector.
    pub name: String,

    /// The fact value, stored unchanged.
    pub value: Value,
}

/// The outcome of inspecting one host, with its raw facts.
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
pub struct InspectResult {
    /// Assigned by the store on insert.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    pub(crate) id: InspectionId,

    /// The group this result belongs to.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    pub(crate) group: GroupId,

    /// Host identifier as reported by the source.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    name: String,

    /// Outcome for the host.
    #[getset(get_copy = "pub")]
    status: HostStatus,

    /// Raw facts collected from the host.
    #[builder(default)]
    #[getset(get = "pub")]
    facts: Vec<RawFact>,
}

impl InspectResult {
    /// Build a result from a fact map, preserving key order.
    pub fn from_facts(name: impl Into<String>, status: HostStatus, facts: RawFacts) -> Self {
        let facts = facts
            .into_iter()
            .map(|(name, value)| RawFact { name, value })
            .collect();
        Self::builder().name(name).status(status).facts(facts).build()
    }

    /// The facts as a map. Later duplicates of a fact name win.
    pub fn fact_map(&self) -> RawFacts {
        self.facts
            .iter()
            .map(|fact| (fact.name.clone(), fact.value.clone()))
            .collect()
    }

    /// Look up a single fact by name.
    pub fn fact(&self, name: &str) -> Option<&Value> {
        self.facts.iter().rev().find(|f| f.name == name).map(|f| &f.value)
    }
}
