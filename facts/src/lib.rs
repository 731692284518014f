//! Entities, raw facts, and the transactional store shared by the scanning pipeline.
//!
//! The model is a set of flat tables keyed by identifiers ([`JobId`], [`TaskId`], ...).
//! Entities only refer "down" to other entities by identifier:
//! a [`ScanTask`] knows its [`ScanJob`], an [`InspectResult`] knows its [`InspectGroup`],
//! and parents are recovered by looking them up in the [`Store`].
//!
//! All mutation goes through the [`Store`], which serializes writers and applies each operation atomically.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

use thiserror::Error;

mod credential;
mod fingerprint;
mod id;
mod job;
mod kind;
pub mod query;
mod report;
mod result;
mod scan;
mod source;
mod store;

pub use credential::*;
pub use fingerprint::*;
pub use id::*;
pub use job::*;
pub use kind::*;
pub use report::*;
pub use result::*;
pub use scan::*;
pub use source::*;
pub use store::*;

/// Errors reported by the store and entity validation.
#[derive(Error, Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The referenced entity does not exist.
    #[error("{entity} {id} does not exist")]
    NotFound {
        /// The kind of entity.
        entity: &'static str,

        /// The identifier looked up.
        id: u64,
    },

    /// Input violated a validation rule. The store is unchanged.
    #[error("invalid {entity} field '{field}': {reason}")]
    Validation {
        /// The kind of entity validated.
        entity: &'static str,

        /// The offending field.
        field: &'static str,

        /// What was wrong.
        reason: String,
    },

    /// An entity with the same unique name exists.
    #[error("{entity} named '{name}' already exists")]
    Duplicate {
        /// The kind of entity.
        entity: &'static str,

        /// The conflicting name.
        name: String,
    },

    /// A credential cannot be deleted while a source references it.
    #[error("credential {credential} is used by source {used_by}")]
    CredentialInUse {
        /// The credential that was to be deleted.
        credential: CredentialId,

        /// A source that references it.
        used_by: SourceId,
    },

    /// A status change would move backwards or out of a terminal state.
    #[error("{entity} {id} cannot move from {from} to {to}")]
    Transition {
        /// `job` or `task`.
        entity: &'static str,

        /// The identifier of the job or task.
        id: u64,

        /// Status before the change.
        from: Status,

        /// Requested status.
        to: Status,
    },

    /// A host specifier on a source did not parse.
    #[error(transparent)]
    HostSpec(#[from] hostspec::Error),
}
