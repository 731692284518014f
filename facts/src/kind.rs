//! Closed enumerations shared across the pipeline.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The kind of infrastructure a [`crate::Source`] connects to.
///
/// Credentials carry the same kind as the sources that use them.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Linux hosts reached over SSH.
    Network,

    /// Red Hat Satellite 5 or 6.
    Satellite,

    /// VMware vCenter.
    Vcenter,

    /// OpenShift clusters.
    Openshift,

    /// Ansible Tower or Ansible Automation Platform controllers.
    Ansible,

    /// Red Hat Advanced Cluster Security.
    Rhacs,
}

impl SourceKind {
    /// The port used when a source does not configure one.
    pub fn default_port(self) -> u16 {
        match self {
            SourceKind::Network => 22,
            SourceKind::Openshift => 6443,
            SourceKind::Satellite | SourceKind::Vcenter | SourceKind::Ansible | SourceKind::Rhacs => {
                443
            }
        }
    }

    /// Whether the source is reached through a single API server rather than per host.
    pub fn is_api(self) -> bool {
        self != SourceKind::Network
    }

    /// Rank of this kind when choosing between conflicting fingerprint values; lower wins.
    pub fn precedence(self) -> u8 {
        match self {
            SourceKind::Network => 0,
            SourceKind::Satellite => 1,
            SourceKind::Openshift => 2,
            SourceKind::Vcenter => 3,
            SourceKind::Ansible => 4,
            SourceKind::Rhacs => 5,
        }
    }
}

/// The kind of scan a [`crate::Scan`] performs.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Only determine which hosts are reachable.
    Connect,

    /// Connect, inspect, and fingerprint.
    #[default]
    Inspect,
}

/// The kind of work a [`crate::ScanTask`] performs.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Enumerate reachable targets of one source.
    Connect,

    /// Collect raw facts from the reachable targets of one source.
    Inspect,

    /// Build fingerprints from every inspected source.
    Fingerprint,
}

/// Lifecycle status of a [`crate::ScanJob`] or [`crate::ScanTask`].
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Default,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Recorded but not yet queued.
    #[default]
    Created,

    /// Queued for execution.
    Pending,

    /// Executing.
    Running,

    /// Finished successfully.
    Completed,

    /// Finished unsuccessfully.
    Failed,

    /// Stopped by a cancel request.
    Canceled,
}

impl Status {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Canceled)
    }

    fn stage(self) -> u8 {
        match self {
            Status::Created => 0,
            Status::Pending => 1,
            Status::Running => 2,
            Status::Completed | Status::Failed | Status::Canceled => 3,
        }
    }

    /// Whether moving from `self` to `next` is a valid forward transition.
    ///
    /// Staying in the same non-terminal status is permitted.
    pub fn can_become(self, next: Status) -> bool {
        !self.is_terminal() && next.stage() >= self.stage()
    }
}

/// Outcome of connecting to or inspecting one host.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// The host was reached and, for inspection, produced facts.
    Success,

    /// The host was reached but rejected the credential or failed a required command.
    Failed,

    /// The host could not be reached.
    Unreachable,

    /// No outcome was recorded; used for results restored from uploaded reports without facts.
    Unknown,
}

/// Names of the products the fingerprinter detects.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductName {
    /// JBoss Enterprise Application Platform.
    JbossEap,

    /// JBoss Web Server.
    JbossWebServer,

    /// JBoss BRMS.
    JbossBrms,

    /// JBoss Fuse.
    JbossFuse,
}

/// Products that may be excluded from (or extended in) an inspection.
///
/// These are the names scan options and playbook variables use.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OptionalProduct {
    /// See [`ProductName::JbossEap`].
    JbossEap,

    /// See [`ProductName::JbossFuse`].
    JbossFuse,

    /// See [`ProductName::JbossBrms`].
    JbossBrms,

    /// See [`ProductName::JbossWebServer`].
    JbossWs,
}

impl OptionalProduct {
    /// The detected product this flag controls.
    pub fn product(self) -> ProductName {
        match self {
            OptionalProduct::JbossEap => ProductName::JbossEap,
            OptionalProduct::JbossFuse => ProductName::JbossFuse,
            OptionalProduct::JbossBrms => ProductName::JbossBrms,
            OptionalProduct::JbossWs => ProductName::JbossWebServer,
        }
    }
}

/// How sure the fingerprinter is that a product is installed.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Debug, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// Definitive evidence was found.
    Present,

    /// Circumstantial evidence was found.
    Potential,

    /// The relevant facts were collected and showed no evidence.
    Absent,

    /// None of the relevant facts were collected.
    Unknown,
}

/// The kind of machine a fingerprint describes.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Default,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InfrastructureType {
    /// A virtual machine.
    Virtualized,

    /// A physical machine that hosts no guests.
    BareMetal,

    /// A physical machine hosting guests.
    Hypervisor,

    /// Not determined.
    #[default]
    Unknown,
}

/// Status of a [`crate::DeploymentsReport`].
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentsStatus {
    /// Fingerprinting has not finished.
    #[default]
    Pending,

    /// Fingerprints are available.
    Complete,

    /// Fingerprinting failed.
    Failed,
}
