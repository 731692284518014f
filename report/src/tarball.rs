//! The report tarball.
//!
//! A gzipped tar whose entries live under `report_id_<N>/`:
//! `details.json`, `details.csv`, `deployments.json`, `deployments.csv`, `aggregate.json`,
//! any scan job log streams, and `SHA256SUM`, which lists the SHA-256 digest of every other entry
//! as `<digest>  <file name>` lines.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use facts::{ReportId, Store};
use flate2::{write::GzEncoder, Compression};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{aggregate, csv, deployments, details, Error};

/// Name of the checksum manifest entry.
pub const MANIFEST: &str = "SHA256SUM";

/// The directory every entry of a report's tarball is placed in.
pub fn root_dir(id: ReportId) -> String {
    format!("report_id_{id}")
}

/// The file name a report's tarball is conventionally written to.
pub fn file_name(id: ReportId) -> String {
    format!("{}.tar.gz", root_dir(id))
}

/// A file placed in the tarball.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Entry {
    /// File name within the root directory.
    pub name: String,

    /// File contents.
    pub data: Vec<u8>,
}

impl Entry {
    fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    fn json(name: &str, value: &impl Serialize) -> Result<Self, Error> {
        Ok(Self::new(name, serde_json::to_vec_pretty(value)?))
    }
}

/// Render every entry of a report's tarball, manifest last.
///
/// `logs` names the log stream files to include, as `(file name, path)` pairs.
/// Building the aggregate refreshes its cache if the report changed.
pub fn entries(store: &Store, id: ReportId, logs: &[(String, PathBuf)]) -> Result<Vec<Entry>, Error> {
    let details = details::details(store, id)?;
    let deployments = deployments(store, id)?;
    let aggregate = aggregate::build_aggregate_report(store, id)?;

    let mut entries = vec![
        Entry::json("details.json", &details)?,
        Entry::new("details.csv", csv::details(&details)),
        Entry::json("deployments.json", &deployments)?,
        Entry::new("deployments.csv", csv::deployments(&deployments)?),
        Entry::json("aggregate.json", &aggregate)?,
    ];
    for (name, path) in logs {
        entries.push(Entry::new(name.as_str(), fs::read(path)?));
    }
    entries.push(Entry::new(MANIFEST, manifest(&entries)));
    Ok(entries)
}

/// The checksum manifest of `entries`.
pub fn manifest(entries: &[Entry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}  {}\n", hex::encode(Sha256::digest(&entry.data)), entry.name))
        .collect()
}

/// Build a report's tarball in memory.
pub fn assemble(store: &Store, id: ReportId, logs: &[(String, PathBuf)]) -> Result<Vec<u8>, Error> {
    let report = store.report(id)?;
    let entries = entries(store, id, logs)?;
    let root = root_dir(id);
    let mtime = u64::try_from(report.updated_at().unix_timestamp()).unwrap_or_default();

    let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in &entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        archive.append_data(&mut header, format!("{root}/{}", entry.name), entry.data.as_slice())?;
        debug!(report = %id, entry = %entry.name, bytes = entry.data.len(), "added tarball entry");
    }
    let mut encoder = archive.into_inner()?;
    encoder.flush()?;
    let bytes = encoder.finish()?;
    info!(report = %id, entries = entries.len(), bytes = bytes.len(), "assembled report tarball");
    Ok(bytes)
}

/// Build a report's tarball and write it into `dir`, returning its path.
pub fn write(store: &Store, id: ReportId, logs: &[(String, PathBuf)], dir: &Path) -> Result<PathBuf, Error> {
    let bytes = assemble(store, id, logs)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name(id));
    fs::write(&path, bytes)?;
    Ok(path)
}
