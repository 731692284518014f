//! Reports: the documents built from inspected facts.
//!
//! A report is viewed four ways:
//! - [`details`]: the raw facts of every inspected host, grouped by source.
//!   Details payloads can also be uploaded to create a report without scanning.
//! - Deployments: the fingerprints built from those facts, see [`deployments()`].
//! - [`aggregate`]: counts and distributions over the fingerprints and raw facts.
//! - The [`tarball`] that packages every rendering together with checksums and scan logs.
//!
//! Each view renders as JSON or, for details and deployments, as CSV through [`csv`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

use thiserror::Error;

pub mod aggregate;
pub mod csv;
mod deployments;
pub mod details;
pub mod tarball;

pub use aggregate::build_aggregate_report;
pub use deployments::{deployments, DeploymentsView};
pub use details::{DetailsReport, DetailsSource};

/// Errors reported while uploading, rendering, or packaging reports.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An uploaded payload violated the details schema. Nothing was stored.
    #[error("invalid details report: '{field}' {reason}")]
    Validation {
        /// Path of the offending field, such as `sources[2].source_type`.
        field: String,

        /// What was wrong.
        reason: String,
    },

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] facts::Error),

    /// A rendering could not be encoded.
    #[error("encode report")]
    Encode(#[from] serde_json::Error),

    /// Reading a log stream or writing the tarball failed.
    #[error("report i/o")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller supplied bad input, as opposed to the system failing.
    ///
    /// These are the errors a REST surface reports with a 400-class status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::Store(facts::Error::Validation { .. } | facts::Error::NotFound { .. })
        )
    }
}
