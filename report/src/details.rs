//! The details payload: raw facts per source, as uploaded and as rendered.

use std::str::FromStr;

use facts::{
    GroupContents, HostStatus, InspectGroup, InspectResult, JobId, NewJob, NewReport, RawFacts, ReportId,
    SourceKind, Store,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::Error;

/// The only report type a details payload may declare.
pub const REPORT_TYPE: &str = "details";

/// Facts naming a host, in the order they are tried when an uploaded host has to be named.
const NAME_FACTS: &[&str] = &["uname_hostname", "hostname", "vm.name", "vm.dns_name", "name"];

lazy_static! {
    static ref VERSION: Regex = Regex::new(r"^\d+\.\d+\.\d+([-+.][0-9A-Za-z.+-]*)?$").expect("version regex must compile");
}

/// A details report.
///
/// Uploaded payloads omit `report_id` and `report_version`;
/// rendered reports carry both.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DetailsReport {
    /// The report rendered, when rendered from the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<ReportId>,

    /// Always [`REPORT_TYPE`].
    pub report_type: String,

    /// Version of the software that produced the report, when rendered from the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_version: Option<String>,

    /// Stable external identity of the report.
    pub report_platform_id: Uuid,

    /// Facts per source.
    pub sources: Vec<DetailsSource>,
}

/// The facts one source contributed to a details report.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DetailsSource {
    /// Identifies the server that collected the facts.
    pub server_id: String,

    /// Name of the source scanned.
    pub source_name: String,

    /// Kind of the source scanned.
    pub source_type: SourceKind,

    /// Version of the software that collected the facts.
    pub report_version: String,

    /// One fact map per host.
    pub facts: Vec<RawFacts>,
}

impl DetailsReport {
    /// Parse and validate an uploaded payload.
    ///
    /// Every violation is reported with the path of the offending field.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let value = serde_json::from_slice::<Value>(payload)
            .map_err(|err| Error::validation("payload", format!("is not valid JSON: {err}")))?;
        Self::from_value(&value)
    }

    /// Validate a payload already decoded as JSON.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let root = object(value, "payload")?;

        let report_type = string(root, "report_type", "report_type")?;
        if report_type != REPORT_TYPE {
            return Err(Error::validation(
                "report_type",
                format!("must be '{REPORT_TYPE}', not '{report_type}'"),
            ));
        }

        let platform_id = string(root, "report_platform_id", "report_platform_id")?;
        let report_platform_id = Uuid::parse_str(platform_id)
            .map_err(|err| Error::validation("report_platform_id", format!("is not a uuid: {err}")))?;

        let sources = root
            .get("sources")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation("sources", "must be a list"))?;
        if sources.is_empty() {
            return Err(Error::validation("sources", "must contain at least one source"));
        }
        let sources = sources
            .iter()
            .enumerate()
            .map(|(index, source)| parse_source(source, &format!("sources[{index}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            report_id: None,
            report_type: report_type.to_owned(),
            report_version: None,
            report_platform_id,
            sources,
        })
    }
}

fn parse_source(value: &Value, path: &str) -> Result<DetailsSource, Error> {
    let source = object(value, path)?;
    let field = |name: &str| format!("{path}.{name}");

    let server_id = nonempty(source, "server_id", &field("server_id"))?;
    let source_name = nonempty(source, "source_name", &field("source_name"))?;
    let kind = string(source, "source_type", &field("source_type"))?;
    let source_type = SourceKind::from_str(kind)
        .map_err(|_| Error::validation(field("source_type"), format!("'{kind}' is not a source type")))?;
    let report_version = string(source, "report_version", &field("report_version"))?;
    if !VERSION.is_match(report_version) {
        return Err(Error::validation(
            field("report_version"),
            format!("'{report_version}' is not a semantic version"),
        ));
    }

    let facts = source
        .get("facts")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::validation(field("facts"), "must be a list"))?
        .iter()
        .enumerate()
        .map(|(index, host)| {
            let path = format!("{path}.facts[{index}]");
            let host = object(host, &path)?;
            if host.is_empty() {
                return Err(Error::validation(path, "must contain at least one fact"));
            }
            Ok(host.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<RawFacts>())
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DetailsSource {
        server_id: server_id.to_owned(),
        source_name: source_name.to_owned(),
        source_type,
        report_version: report_version.to_owned(),
        facts,
    })
}

fn object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, Error> {
    value
        .as_object()
        .ok_or_else(|| Error::validation(path, "must be an object"))
}

fn string<'a>(object: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a str, Error> {
    match object.get(key) {
        None | Some(Value::Null) => Err(Error::validation(path, "is required")),
        Some(value) => value.as_str().ok_or_else(|| Error::validation(path, "must be a string")),
    }
}

fn nonempty<'a>(object: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a str, Error> {
    let value = string(object, key, path)?;
    if value.trim().is_empty() {
        return Err(Error::validation(path, "must not be empty"));
    }
    Ok(value)
}

/// The name an uploaded host is stored under.
fn host_name(facts: &RawFacts, fallback: impl FnOnce() -> String) -> String {
    NAME_FACTS
        .iter()
        .find_map(|name| facts.get(*name).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .map(str::to_owned)
        .unwrap_or_else(fallback)
}

/// Store an uploaded details report.
///
/// The report and its groups are created in one store operation, so a rejected upload leaves
/// nothing behind. Each source becomes an inspection group; each fact map a successful host result.
pub fn upload(store: &Store, report: DetailsReport, report_version: &str) -> Result<ReportId, Error> {
    if report.report_type != REPORT_TYPE {
        return Err(Error::validation("report_type", format!("must be '{REPORT_TYPE}'")));
    }
    let collected_at = OffsetDateTime::now_utc();
    let groups = report
        .sources
        .into_iter()
        .map(|source| {
            let group = InspectGroup::builder()
                .source_type(source.source_type)
                .source_name(source.source_name.clone())
                .server_id(source.server_id)
                .server_version(source.report_version)
                .collected_at(collected_at)
                .build();
            let results = source
                .facts
                .into_iter()
                .enumerate()
                .map(|(index, facts)| {
                    let name = host_name(&facts, || format!("{}-{}", source.source_name, index + 1));
                    InspectResult::from_facts(name, HostStatus::Success, facts)
                })
                .collect();
            GroupContents { group, results }
        })
        .collect::<Vec<_>>();

    let hosts = groups.iter().map(|g| g.results.len()).sum::<usize>();
    let id = store.import_report(
        NewReport::builder()
            .report_platform_id(report.report_platform_id)
            .report_version(report_version)
            .build(),
        groups,
    )?;
    info!(report = %id, hosts, "uploaded details report");
    Ok(id)
}

/// Render a report's details.
///
/// Hosts whose inspection recorded no facts are omitted.
pub fn details(store: &Store, id: ReportId) -> Result<DetailsReport, Error> {
    let contents = store.report_contents(id)?;
    let sources = contents
        .groups
        .iter()
        .map(|group| DetailsSource {
            server_id: group.group.server_id().clone(),
            source_name: group.group.source_name().clone(),
            source_type: group.group.source_type(),
            report_version: group.group.server_version().clone(),
            facts: group
                .results
                .iter()
                .filter(|result| !result.facts().is_empty())
                .map(InspectResult::fact_map)
                .collect(),
        })
        .collect::<Vec<_>>();
    debug!(report = %id, sources = sources.len(), "rendered details");
    Ok(DetailsReport {
        report_id: Some(id),
        report_type: String::from(REPORT_TYPE),
        report_version: Some(contents.report.report_version().clone()),
        report_platform_id: contents.report.report_platform_id(),
        sources,
    })
}

/// Create the fingerprint-only job that builds the deployments of an uploaded or merged report.
pub fn fingerprint_job(store: &Store, report: ReportId) -> Result<JobId, Error> {
    Ok(store.create_job(NewJob::builder().report(report).build())?)
}

/// Merge reports into a new report over the union of their groups, with a job to fingerprint it.
pub fn merge(store: &Store, reports: &[ReportId], report_version: &str) -> Result<(ReportId, JobId), Error> {
    let merged = store.merge_reports(reports, report_version)?;
    let job = fingerprint_job(store, merged)?;
    info!(report = %merged, %job, merged = reports.len(), "merged reports");
    Ok((merged, job))
}
