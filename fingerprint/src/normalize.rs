//! Mapping each source kind's raw facts onto canonical attributes.

use std::collections::BTreeSet;

use facts::{FactOrigin, InfrastructureType, InspectGroup, InspectResult, ProductName, RawFacts, SourceKind, SourceRef};
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::warn;

use crate::{
    merge::{Attr, Candidate},
    products,
    value::{self, truthy},
    Error,
};

/// The outcome of normalizing one host result.
pub(crate) enum Normalized {
    /// A host record ready to merge.
    Host(Candidate),

    /// The result describes something other than a host.
    NotAHost,

    /// No canonical attribute could be extracted.
    Empty,
}

struct Builder<'a> {
    group: &'a InspectGroup,
    raw: &'a RawFacts,
    candidate: Candidate,
    extracted: bool,
}

impl<'a> Builder<'a> {
    fn new(group: &'a InspectGroup, raw: &'a RawFacts) -> Self {
        let mut candidate = Candidate::default();
        candidate.sources.insert(SourceRef {
            source_name: group.source_name().clone(),
            source_type: group.source_type(),
            server_id: group.server_id().clone(),
        });
        Self {
            group,
            raw,
            candidate,
            extracted: false,
        }
    }

    /// Look up a raw fact; `fact/path` addresses a field inside a structured fact.
    fn lookup(&self, key: &str) -> Option<&'a Value> {
        let raw = self.raw;
        raw.get(key)
            .or_else(|| {
                let (fact, path) = key.split_once('/')?;
                raw.get(fact)?.pointer(&format!("/{path}"))
            })
            .filter(|value| !value.is_null())
    }

    fn has(&self, attr: &str) -> bool {
        self.candidate.attrs.contains_key(attr)
    }

    fn insert(&mut self, attr: &'static str, key: &str, value: Value) {
        let origin = FactOrigin {
            source_name: self.group.source_name().clone(),
            source_type: self.group.source_type(),
            server_id: self.group.server_id().clone(),
            raw_fact_key: key.to_owned(),
            collected_at: self.group.collected_at(),
        };
        self.candidate.attrs.insert(attr, Attr { value, origin });
    }

    /// Set an attribute from a fact.
    fn put(&mut self, attr: &'static str, key: &str, value: impl Into<Value>) {
        self.extracted = true;
        self.insert(attr, key, value.into());
    }

    /// Set an attribute implied by the source kind rather than observed.
    fn put_constant(&mut self, attr: &'static str, key: &str, value: impl Into<Value>) {
        self.insert(attr, key, value.into());
    }

    fn parse<T: Into<Value>>(&mut self, attr: &'static str, key: &str, parse: impl Fn(&str, &Value) -> Result<T, Error>) {
        let Some(raw) = self.lookup(key) else {
            return;
        };
        match parse(key, raw) {
            Ok(parsed) => self.put(attr, key, parsed),
            Err(err) => warn!(
                attribute = attr,
                source = %self.group.source_name(),
                "leaving attribute unset: {err}"
            ),
        }
    }

    fn text(&mut self, attr: &'static str, key: &str) {
        self.parse(attr, key, |fact, raw| {
            value::text(fact, raw)?.ok_or_else(|| Error::Parse {
                fact: fact.to_owned(),
                reason: String::from("empty string"),
            })
        });
    }

    fn lowercase(&mut self, attr: &'static str, key: &str) {
        self.parse(attr, key, |fact, raw| {
            value::text(fact, raw)?.map(|s| s.to_lowercase()).ok_or_else(|| Error::Parse {
                fact: fact.to_owned(),
                reason: String::from("empty string"),
            })
        });
    }

    fn integer(&mut self, attr: &'static str, key: &str) {
        self.parse(attr, key, value::integer);
    }

    fn float(&mut self, attr: &'static str, key: &str) {
        self.parse(attr, key, value::float);
    }

    /// A sorted, deduplicated list; empty lists leave the attribute unset.
    fn list(&mut self, attr: &'static str, key: &str, lowercase: bool) {
        let Some(raw) = self.lookup(key) else {
            return;
        };
        match value::strings(key, raw) {
            Ok(items) => {
                let items = items
                    .into_iter()
                    .map(|item| if lowercase { item.to_lowercase() } else { item })
                    .collect::<BTreeSet<_>>();
                if !items.is_empty() {
                    self.put(attr, key, items.into_iter().collect::<Vec<_>>());
                }
            }
            Err(err) => warn!(attribute = attr, source = %self.group.source_name(), "leaving attribute unset: {err}"),
        }
    }

    /// The first of `keys` that parses as a date.
    fn first_date(&mut self, attr: &'static str, keys: &[&str]) {
        for key in keys {
            self.parse(attr, key, |fact, raw| value::date(fact, raw).map(|date| date.to_string()));
            if self.has(attr) {
                return;
            }
        }
    }

    fn infrastructure(&mut self, key: &str, kind: InfrastructureType) {
        self.put("infrastructure_type", key, kind.as_ref());
    }

    fn detect_products(&mut self, enabled: &dyn Fn(ProductName) -> bool) {
        for product in ProductName::iter().filter(|product| enabled(*product)) {
            self.candidate.products.insert(product, products::detect(product, self.raw));
        }
    }

    fn finish(self) -> Normalized {
        if self.extracted {
            Normalized::Host(self.candidate)
        } else {
            Normalized::Empty
        }
    }
}

/// Normalize one successful host result of a group.
pub(crate) fn normalize(group: &InspectGroup, result: &InspectResult, enabled: &dyn Fn(ProductName) -> bool) -> Normalized {
    let raw = result.fact_map();
    let mut builder = Builder::new(group, &raw);
    match group.source_type() {
        SourceKind::Network => network(&mut builder),
        SourceKind::Satellite => satellite(&mut builder),
        SourceKind::Vcenter => vcenter(&mut builder),
        SourceKind::Openshift if raw.contains_key("node") => openshift_node(&mut builder),
        SourceKind::Openshift | SourceKind::Ansible | SourceKind::Rhacs => return Normalized::NotAHost,
    }
    builder.detect_products(enabled);
    builder.finish()
}

fn network(b: &mut Builder<'_>) {
    b.text("name", "uname_hostname");
    b.text("os_name", "etc_release_name");
    b.text("os_version", "etc_release_version");
    b.text("os_release", "etc_release_release");
    b.text("architecture", "uname_processor");
    b.lowercase("bios_uuid", "dmi_system_uuid");
    b.text("subscription_manager_id", "subscription_manager_id");
    b.text("insights_client_id", "insights_client_id");
    b.integer("cpu_count", "cpu_count");
    b.float("cpu_core_count", "cpu_core_count");
    b.integer("cpu_socket_count", "cpu_socket_count");
    b.float("cpu_core_per_socket", "cpu_core_per_socket");
    b.parse("cpu_hyperthreading", "cpu_hyperthreading", value::boolean);
    b.list("ip_addresses", "ifconfig_ip_addresses", false);
    b.list("mac_addresses", "ifconfig_mac_addresses", true);
    b.text("redhat_certs", "redhat_packages_certs");
    b.integer("redhat_package_count", "redhat_packages_gpg_num_rh_packages");
    b.first_date(
        "system_creation_date",
        &["date_anaconda_log", "date_filesystem_create", "date_yum_history"],
    );
    b.text("virtualized_type", "virt_type");

    match b.lookup("redhat_packages_gpg_is_redhat") {
        Some(raw) => b.put("is_redhat", "redhat_packages_gpg_is_redhat", truthy(raw)),
        None => b.put_constant("is_redhat", "redhat_packages_gpg_is_redhat", false),
    }

    if let Some(purpose) = b.lookup("system_purpose_json") {
        let purpose = match purpose {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| purpose.clone()),
            other => other.clone(),
        };
        b.put("system_purpose", "system_purpose_json", purpose);
    }

    let guests = b.lookup("virt_num_guests").and_then(|raw| value::integer("virt_num_guests", raw).ok());
    let role = b.lookup("virt_virt").and_then(Value::as_str).map(str::to_lowercase);
    if guests.unwrap_or(0) > 0 {
        b.infrastructure("virt_num_guests", InfrastructureType::Hypervisor);
    } else if role.as_deref() == Some("virt-host") {
        b.infrastructure("virt_virt", InfrastructureType::Hypervisor);
    } else if b.lookup("virt_type").map(truthy).unwrap_or(false) {
        b.infrastructure("virt_type", InfrastructureType::Virtualized);
    } else if role.as_deref() == Some("virt-guest") {
        b.infrastructure("virt_virt", InfrastructureType::Virtualized);
    } else if b
        .lookup("virt_what_type")
        .and_then(Value::as_str)
        .map(|kind| kind.trim().eq_ignore_ascii_case("bare metal"))
        .unwrap_or(false)
    {
        b.infrastructure("virt_what_type", InfrastructureType::BareMetal);
    }
}

fn satellite(b: &mut Builder<'_>) {
    b.text("name", "hostname");
    b.text("os_name", "os_name");
    b.text("os_release", "os_release");
    b.text("os_version", "os_version");
    b.text("architecture", "architecture");
    b.text("subscription_manager_id", "uuid");
    b.integer("cpu_count", "cores");
    b.float("cpu_core_count", "cores");
    b.integer("cpu_socket_count", "num_sockets");
    b.list("ip_addresses", "ip_addresses", false);
    b.list("mac_addresses", "mac_addresses", true);
    b.text("virtual_host_uuid", "virtual_host_uuid");
    b.text("virtual_host_name", "virtual_host_name");
    b.first_date("system_creation_date", &["registration_time"]);
    b.first_date("system_last_checkin_date", &["last_checkin_time"]);
    b.put_constant("is_redhat", "satellite", true);

    let kind = match b.lookup("virtual").and_then(Value::as_str) {
        Some("hypervisor") => Some(InfrastructureType::Hypervisor),
        Some("virtual") => Some(InfrastructureType::Virtualized),
        Some("physical") => Some(InfrastructureType::BareMetal),
        _ => None,
    };
    if let Some(kind) = kind {
        b.infrastructure("virtual", kind);
    }
}

fn vcenter(b: &mut Builder<'_>) {
    b.text("name", "vm.name");
    b.text("os_release", "vm.os");
    b.text("vm_state", "vm.state");
    b.text("vm_uuid", "vm.uuid");
    b.lowercase("bios_uuid", "vm.uuid");
    b.integer("cpu_count", "vm.cpu_count");
    b.text("vm_dns_name", "vm.dns_name");
    b.list("ip_addresses", "vm.ip_addresses", false);
    b.list("mac_addresses", "vm.mac_addresses", true);
    b.text("vm_host", "vm.host.name");
    b.text("virtual_host_name", "vm.host.name");
    b.text("virtual_host_uuid", "vm.host.uuid");
    b.integer("vm_host_core_count", "vm.host.cpu_cores");
    b.integer("vm_host_socket_count", "vm.host.cpu_count");
    b.text("vm_cluster", "vm.cluster");
    b.text("vm_datacenter", "vm.datacenter");
    b.first_date("system_last_checkin_date", &["vm.last_check_in"]);
    b.put_constant("infrastructure_type", "vcenter", InfrastructureType::Virtualized.as_ref());
    b.put_constant("virtualized_type", "vcenter", "vmware");

    if let Some(os) = b.lookup("vm.os").and_then(Value::as_str) {
        b.put("is_redhat", "vm.os", os.to_lowercase().contains("red hat"));
    }
}

fn openshift_node(b: &mut Builder<'_>) {
    b.text("name", "node/name");
    b.text("architecture", "node/architecture");
    b.first_date("system_creation_date", &["node/creation_timestamp"]);
    b.put_constant("is_redhat", "openshift", true);

    if let Some(cpu) = b.lookup("node/capacity/cpu").and_then(Value::as_f64) {
        b.put("cpu_count", "node/capacity/cpu", cpu.ceil() as u64);
    }

    let ips = b
        .lookup("node/addresses")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|address| {
            matches!(
                address.get("type").and_then(Value::as_str),
                Some("InternalIP") | Some("ExternalIP")
            )
        })
        .filter_map(|address| address.get("address").and_then(Value::as_str))
        .map(str::to_owned)
        .collect::<BTreeSet<_>>();
    if !ips.is_empty() {
        b.put("ip_addresses", "node/addresses", ips.into_iter().collect::<Vec<_>>());
    }
}
