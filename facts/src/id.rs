//! Identifiers for every table in the [`crate::Store`].
//!
//! Identifiers are assigned by the store in increasing order per table, starting at 1.
//! Entities refer to each other only through these handles; parents are recovered by lookup.

use derive_more::{Display, From};
use duplicate::duplicate_item;
use serde::{Deserialize, Serialize};

/// Identifies a [`crate::Credential`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(u64);

/// Identifies a [`crate::Source`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(u64);

/// Identifies a [`crate::Scan`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(u64);

/// Identifies a [`crate::ScanJob`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

/// Identifies a [`crate::ScanTask`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

/// Identifies a [`crate::SystemConnectionResult`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

/// Identifies an [`crate::InspectGroup`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(u64);

/// Identifies an [`crate::InspectResult`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InspectionId(u64);

/// Identifies a [`crate::Report`].
///
/// The deployments and aggregate reports of a report share its identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(u64);

/// Table keys assigned by the store.
pub(crate) trait Key: Copy + Ord + Default {
    /// The key following this one.
    fn next(self) -> Self;
}

#[duplicate_item(
    name;
    [CredentialId];
    [SourceId];
    [ScanId];
    [JobId];
    [TaskId];
    [ConnectionId];
    [GroupId];
    [InspectionId];
    [ReportId];
)]
impl name {
    /// Convert self into its inner value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

#[duplicate_item(
    name;
    [CredentialId];
    [SourceId];
    [ScanId];
    [JobId];
    [TaskId];
    [ConnectionId];
    [GroupId];
    [InspectionId];
    [ReportId];
)]
impl Key for name {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}
