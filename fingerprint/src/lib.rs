//! Fingerprints turn the raw facts of a report into one canonical record per host.
//!
//! Fingerprinting runs in three steps over a report's successful inspection results:
//! - Normalization maps each source kind's raw fact names onto the attributes of a [`SystemFingerprint`],
//!   remembering which source and raw fact every value came from.
//! - Merging joins records that describe the same host. Two records describe the same host
//!   if they share any [`MergeKey`]; matches are transitive, so the merged fingerprints of a report
//!   never share a key. Conflicting attribute values are resolved by [`facts::SourceKind::precedence`],
//!   then by the most recent collection.
//! - Product detection evaluates the [`products::RULES`] table over each host's raw facts.
//!
//! A raw fact that cannot be parsed never fails fingerprinting: the attribute is left unset
//! and a warning is logged. A host without a single canonical fact is dropped.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

use facts::{HostStatus, ProductName, ReportContents, SystemFingerprint};
use thiserror::Error;
use tracing::{info, warn};

mod merge;
mod normalize;
pub mod products;
pub mod value;

pub use merge::{merge_keys, MergeKey};

/// Errors encountered while fingerprinting.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A raw fact could not be parsed into its canonical type.
    #[error("unable to parse raw fact '{fact}': {reason}")]
    Parse {
        /// The raw fact name.
        fact: String,

        /// What was wrong.
        reason: String,
    },

    /// A merged record could not be assembled into a fingerprint.
    #[error("assemble fingerprint")]
    Assemble(#[from] serde_json::Error),
}

/// The outcome of fingerprinting a report.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Fingerprints {
    /// One fingerprint per deduplicated host.
    pub fingerprints: Vec<SystemFingerprint>,

    /// Successful host results considered.
    pub hosts: u64,

    /// Host results dropped for lack of canonical facts.
    pub dropped: u64,
}

/// Fingerprint every successful host result in a report.
///
/// Products for which `enabled` returns false are not evaluated and do not appear in the output.
/// Results that describe something other than a host, such as an OpenShift cluster
/// or an Ansible controller, contribute no fingerprint and are not counted.
pub fn fingerprint(contents: &ReportContents, enabled: impl Fn(ProductName) -> bool) -> Result<Fingerprints, Error> {
    let mut candidates = Vec::new();
    let mut dropped = 0;
    for group in &contents.groups {
        for result in group.results.iter().filter(|r| r.status() == HostStatus::Success) {
            match normalize::normalize(&group.group, result, &enabled) {
                normalize::Normalized::Host(candidate) => candidates.push(candidate),
                normalize::Normalized::NotAHost => {}
                normalize::Normalized::Empty => {
                    warn!(
                        host = %result.name(),
                        source = %group.group.source_name(),
                        "dropping host without canonical facts"
                    );
                    dropped += 1;
                }
            }
        }
    }

    let hosts = candidates.len() as u64 + dropped;
    let fingerprints = merge::merge(candidates)
        .into_iter()
        .map(merge::Candidate::into_fingerprint)
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        report = %contents.report.id(),
        hosts,
        dropped,
        fingerprints = fingerprints.len(),
        "fingerprinted report"
    );
    Ok(Fingerprints {
        fingerprints,
        hosts,
        dropped,
    })
}
