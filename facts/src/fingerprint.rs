//! System fingerprints and the products detected on them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime};

use crate::{InfrastructureType, Presence, ProductName, SourceKind};

/// Identifies an inspection source that contributed to a fingerprint.
#[derive(Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct SourceRef {
    /// Name of the source.
    pub source_name: String,

    /// Kind of the source.
    pub source_type: SourceKind,

    /// Server that produced the facts.
    pub server_id: String,
}

/// Where a fingerprint attribute value came from.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FactOrigin {
    /// Name of the source.
    pub source_name: String,

    /// Kind of the source.
    pub source_type: SourceKind,

    /// Server that produced the facts.
    pub server_id: String,

    /// The raw fact the value was derived from.
    pub raw_fact_key: String,

    /// When the raw fact was collected.
    #[serde(with = "time::serde::rfc3339")]
    pub collected_at: OffsetDateTime,
}

/// A product detected on a host.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Product {
    /// Which product.
    pub name: ProductName,

    /// How sure detection is.
    pub presence: Presence,

    /// Versions found, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version: Vec<String>,

    /// Raw facts that matched a detection rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_fact_keys: Vec<String>,
}

/// A canonical, deduplicated record of one host.
///
/// Every attribute is optional; which attributes are set depends on the sources that saw the host.
/// `metadata` maps attribute names to the origin of their values.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemFingerprint {
    /// Host name.
    pub name: Option<String>,

    /// Operating system name, e.g. `Red Hat Enterprise Linux Server`.
    pub os_name: Option<String>,

    /// Operating system release string.
    pub os_release: Option<String>,

    /// Operating system version, e.g. `7.9`.
    pub os_version: Option<String>,

    /// CPU architecture, e.g. `x86_64`.
    pub architecture: Option<String>,

    /// BIOS UUID.
    pub bios_uuid: Option<String>,

    /// Red Hat subscription manager identity.
    pub subscription_manager_id: Option<String>,

    /// Red Hat Insights client identity.
    pub insights_client_id: Option<String>,

    /// Logical CPUs.
    pub cpu_count: Option<u64>,

    /// CPU cores; may be fractional for virtual machines.
    pub cpu_core_count: Option<f64>,

    /// CPU sockets.
    pub cpu_socket_count: Option<u64>,

    /// CPU cores per socket.
    pub cpu_core_per_socket: Option<f64>,

    /// Whether hyperthreading is enabled.
    pub cpu_hyperthreading: Option<bool>,

    /// Physical, virtual, or hypervisor.
    pub infrastructure_type: InfrastructureType,

    /// Whether the operating system is a Red Hat product.
    pub is_redhat: Option<bool>,

    /// Red Hat product certificates installed.
    pub redhat_certs: Option<String>,

    /// Number of Red Hat signed packages installed.
    pub redhat_package_count: Option<u64>,

    /// When the system was installed.
    pub system_creation_date: Option<Date>,

    /// When the system last checked in with its management server.
    pub system_last_checkin_date: Option<Date>,

    /// System purpose document, as reported.
    pub system_purpose: Option<Value>,

    /// Hypervisor technology, e.g. `vmware`.
    pub virtualized_type: Option<String>,

    /// Hypervisor host name, for guests.
    pub virtual_host_name: Option<String>,

    /// Hypervisor host UUID, for guests.
    pub virtual_host_uuid: Option<String>,

    /// vCenter cluster.
    pub vm_cluster: Option<String>,

    /// vCenter datacenter.
    pub vm_datacenter: Option<String>,

    /// vCenter DNS name.
    pub vm_dns_name: Option<String>,

    /// vCenter host the VM runs on.
    pub vm_host: Option<String>,

    /// Cores of the vCenter host.
    pub vm_host_core_count: Option<u64>,

    /// Sockets of the vCenter host.
    pub vm_host_socket_count: Option<u64>,

    /// vCenter power state.
    pub vm_state: Option<String>,

    /// vCenter VM UUID.
    pub vm_uuid: Option<String>,

    /// IP addresses, sorted and deduplicated.
    pub ip_addresses: Vec<String>,

    /// MAC addresses, lowercased, sorted and deduplicated.
    pub mac_addresses: Vec<String>,

    /// Sources that contributed to this fingerprint.
    pub sources: Vec<SourceRef>,

    /// Origin of each attribute value, keyed by attribute name.
    pub metadata: BTreeMap<String, FactOrigin>,

    /// Detected products.
    pub products: Vec<Product>,
}

impl SystemFingerprint {
    /// Look up a detected product by name.
    pub fn product(&self, name: ProductName) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }

    /// Whether `name` was detected with [`Presence::Present`].
    pub fn has_product(&self, name: ProductName) -> bool {
        self.product(name)
            .map(|p| p.presence == Presence::Present)
            .unwrap_or(false)
    }

    /// Whether any contributing source is of `kind`.
    pub fn seen_by(&self, kind: SourceKind) -> bool {
        self.sources.iter().any(|s| s.source_type == kind)
    }
}
