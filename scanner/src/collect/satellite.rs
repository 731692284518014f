//! Red Hat Satellite sources.
//!
//! Satellite 6 speaks REST in two schema flavors, chosen by probing `/api/status`;
//! a server without that endpoint is treated as Satellite 5 and spoken to over XML-RPC.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use facts::{Credential, HostStatus, InspectResult, RawFacts};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use strum::Display;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::ApiTarget;
use crate::{
    xml::rpc::{self, Param},
    ApiError, HttpClient, TaskContext, TaskError,
};

/// Which Satellite API a session speaks.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum SatelliteFlavor {
    /// Satellite 5, XML-RPC.
    #[strum(serialize = "satellite 5")]
    Satellite5,

    /// Satellite 6, API v1.
    #[strum(serialize = "satellite 6 (api v1)")]
    Satellite6V1,

    /// Satellite 6, API v2.
    #[strum(serialize = "satellite 6 (api v2)")]
    Satellite6V2,
}

/// A host registered with Satellite.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SatelliteHost {
    /// Satellite's identifier for the host.
    pub id: String,

    /// Host name.
    pub name: String,
}

/// One page of registered hosts.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct HostPage {
    /// Hosts registered in total.
    pub total: usize,

    /// Hosts on this page.
    pub hosts: Vec<SatelliteHost>,
}

/// A session with a Satellite server.
#[async_trait]
pub trait SatelliteApi: Send + Sync {
    /// The API the session speaks.
    fn flavor(&self) -> SatelliteFlavor;

    /// List registered hosts; pages start at 1.
    async fn hosts(&self, page: usize, per_page: usize) -> Result<HostPage, ApiError>;

    /// Collect the raw facts of one host.
    async fn host_facts(&self, host: &SatelliteHost) -> Result<RawFacts, ApiError>;
}

pub(super) async fn open(target: &ApiTarget) -> Result<Box<dyn SatelliteApi>, ApiError> {
    let http = HttpClient::new(target)?;
    match http.get_json("/api/status").await {
        Ok(status) => match status.get("api_version").and_then(Value::as_u64) {
            Some(2) => Ok(Box::new(Satellite6::new(http, SatelliteFlavor::Satellite6V2))),
            Some(1) => Ok(Box::new(Satellite6::new(http, SatelliteFlavor::Satellite6V1))),
            _ => Err(ApiError::protocol(
                http.url("/api/status"),
                "unsupported api_version",
                &status.to_string(),
            )),
        },
        Err(err) if err.is_not_found() => {
            debug!("no /api/status, trying satellite 5");
            Ok(Box::new(Satellite5::login(http, &target.credential).await?))
        }
        Err(err) => Err(err),
    }
}

pub(super) async fn connect(ctx: &TaskContext, target: ApiTarget) -> Result<(), TaskError> {
    let api = ctx.backends().apis.satellite(&target).await?;
    let page = api.hosts(1, 1).await?;
    info!(flavor = %api.flavor(), hosts = page.total, "satellite session open");
    Ok(())
}

pub(super) async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let target = ctx.api_target()?;
    let api = ctx.backends().apis.satellite(&target).await?;
    let per_page = ctx.settings().page_size().max(1);

    let mut hosts = Vec::new();
    let mut page = 1;
    loop {
        ctx.check_canceled()?;
        let batch = api.hosts(page, per_page).await?;
        let done = batch.hosts.is_empty() || hosts.len() + batch.hosts.len() >= batch.total;
        hosts.extend(batch.hosts);
        if done {
            break;
        }
        page += 1;
    }

    ctx.set_count(hosts.len() as u64)?;
    let group = ctx.open_group()?;
    info!(flavor = %api.flavor(), hosts = hosts.len(), "inspecting satellite hosts");

    for chunk in hosts.chunks(ctx.max_concurrency()) {
        ctx.check_canceled()?;
        let collected = join_all(chunk.iter().map(|host| api.host_facts(host))).await;
        for (host, facts) in chunk.iter().zip(collected) {
            let result = match facts {
                Ok(facts) if !facts.is_empty() => InspectResult::from_facts(host.name.as_str(), HostStatus::Success, facts),
                Ok(_) => {
                    warn!(host = %host.name, "satellite returned no facts");
                    InspectResult::builder().name(host.name.as_str()).status(HostStatus::Failed).build()
                }
                Err(err) => {
                    warn!(host = %host.name, "collect host facts: {err}");
                    InspectResult::builder().name(host.name.as_str()).status(HostStatus::Failed).build()
                }
            };
            ctx.record_inspection(group, result)?;
        }
    }
    Ok(())
}

fn insert(facts: &mut RawFacts, name: &str, value: Option<Value>) {
    match value {
        None | Some(Value::Null) => {}
        Some(value) => {
            facts.insert(name.to_owned(), value);
        }
    }
}

fn integer(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Satellite 6 over REST.
struct Satellite6 {
    http: HttpClient,
    flavor: SatelliteFlavor,
}

impl Satellite6 {
    fn new(http: HttpClient, flavor: SatelliteFlavor) -> Self {
        Self { http, flavor }
    }

    fn hosts_path(&self) -> &'static str {
        match self.flavor {
            SatelliteFlavor::Satellite6V1 => "/api/hosts",
            _ => "/api/v2/hosts",
        }
    }

    async fn entitlements(&self, host: &Value, id: &str) -> Result<Vec<Value>, ApiError> {
        let path = match self.flavor {
            SatelliteFlavor::Satellite6V1 => {
                let Some(uuid) = subscription_uuid(host) else {
                    return Ok(Vec::new());
                };
                format!("/katello/api/v2/systems/{uuid}/subscriptions")
            }
            _ => format!("/api/v2/hosts/{id}/subscriptions"),
        };
        let response = match self.http.get_json(&path).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(response
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .map(|sub| {
                        json!({
                            "name": sub.get("product_name").or_else(|| sub.get("name")),
                            "amount": sub.get("amount").or_else(|| sub.get("quantity_consumed")),
                            "account_number": sub.get("account_number"),
                            "contract_number": sub.get("contract_number"),
                            "start_date": sub.get("start_date"),
                            "end_date": sub.get("end_date"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn subscription_uuid(host: &Value) -> Option<&str> {
    host.pointer("/subscription_facet_attributes/uuid")
        .or_else(|| host.get("uuid"))
        .and_then(Value::as_str)
}

#[async_trait]
impl SatelliteApi for Satellite6 {
    fn flavor(&self) -> SatelliteFlavor {
        self.flavor
    }

    async fn hosts(&self, page: usize, per_page: usize) -> Result<HostPage, ApiError> {
        let path = self.hosts_path();
        let response = self
            .http
            .get_json_query(path, &[("page", page.to_string()), ("per_page", per_page.to_string())])
            .await?;
        let results = response
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| ApiError::protocol(self.http.url(path), "missing results", &response.to_string()))?;
        let hosts = results
            .iter()
            .map(|row| row.get("host").unwrap_or(row))
            .filter_map(|row| {
                let id = match row.get("id")? {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    _ => return None,
                };
                let name = row.get("name")?.as_str()?.to_owned();
                Some(SatelliteHost { id, name })
            })
            .collect::<Vec<_>>();
        let total = response
            .get("subtotal")
            .or_else(|| response.get("total"))
            .and_then(Value::as_u64)
            .map(|total| total as usize)
            .unwrap_or(hosts.len());
        Ok(HostPage { total, hosts })
    }

    async fn host_facts(&self, host: &SatelliteHost) -> Result<RawFacts, ApiError> {
        let path = format!("{}/{}", self.hosts_path(), host.id);
        let record = self.http.get_json(&path).await?;
        let record = record.get("host").cloned().unwrap_or(record);
        let facts = self
            .http
            .get_json_query(&format!("{path}/facts"), &[("per_page", String::from("10000"))])
            .await?;
        let facts = facts
            .get("results")
            .and_then(Value::as_object)
            .and_then(|results| results.values().next())
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let entitlements = self.entitlements(&record, &host.id).await?;
        Ok(satellite6_facts(&record, &facts, entitlements))
    }
}

/// Raw facts of a Satellite 6 host from its record, its fact map, and its subscriptions.
fn satellite6_facts(host: &Value, facts: &Map<String, Value>, entitlements: Vec<Value>) -> RawFacts {
    let mut raw = RawFacts::new();
    let fact = |name: &str| facts.get(name).cloned();

    insert(&mut raw, "hostname", host.get("name").cloned());
    insert(&mut raw, "uuid", subscription_uuid(host).map(|uuid| json!(uuid)));
    insert(&mut raw, "os_release", host.get("operatingsystem_name").cloned());
    insert(&mut raw, "os_name", fact("distribution::name"));
    insert(&mut raw, "os_version", fact("distribution::version"));
    insert(
        &mut raw,
        "architecture",
        host.get("architecture_name").cloned().or_else(|| fact("uname::machine")),
    );
    insert(&mut raw, "organization", host.get("organization_name").cloned());
    insert(&mut raw, "location", host.get("location_name").cloned());

    let sockets = integer(facts.get("cpu::cpu_socket(s)"));
    let per_socket = integer(facts.get("cpu::core(s)_per_socket"));
    insert(&mut raw, "num_sockets", sockets.map(Value::from));
    insert(
        &mut raw,
        "cores",
        sockets.zip(per_socket).map(|(s, c)| Value::from(s * c)),
    );

    let facet = host.get("subscription_facet_attributes");
    insert(&mut raw, "registration_time", facet.and_then(|f| f.get("registered_at")).cloned());
    insert(&mut raw, "last_checkin_time", facet.and_then(|f| f.get("last_checkin")).cloned());
    insert(
        &mut raw,
        "virtual_host_uuid",
        facet.and_then(|f| f.pointer("/virtual_host/uuid")).cloned(),
    );
    insert(
        &mut raw,
        "virtual_host_name",
        facet.and_then(|f| f.pointer("/virtual_host/name")).cloned(),
    );
    let guests = facet
        .and_then(|f| f.get("virtual_guests"))
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    let is_guest = facts
        .get("virt::is_guest")
        .map(|v| v == &json!(true) || v == &json!("true"))
        .unwrap_or(false);
    raw.insert(String::from("num_virtual_guests"), json!(guests));
    raw.insert(String::from("is_virtualized"), json!(is_guest));
    let kind = if guests > 0 {
        "hypervisor"
    } else if is_guest {
        "virtual"
    } else {
        "physical"
    };
    raw.insert(String::from("virtual"), json!(kind));

    let mut ips = BTreeSet::new();
    let mut macs = BTreeSet::new();
    for (name, value) in facts {
        let Some(value) = value.as_str().filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Some(rest) = name.strip_prefix("net::interface::") {
            let mut parts = rest.splitn(2, "::");
            let (Some(iface), Some(field)) = (parts.next(), parts.next()) else {
                continue;
            };
            if iface == "lo" {
                continue;
            }
            match field {
                "ipv4_address" => {
                    ips.insert(value.to_owned());
                }
                "mac_address" => {
                    macs.insert(value.to_lowercase());
                }
                _ => {}
            }
        } else if let Some(iface) = name.strip_prefix("ipaddress_") {
            if iface != "lo" {
                ips.insert(value.to_owned());
            }
        } else if let Some(iface) = name.strip_prefix("macaddress_") {
            if iface != "lo" {
                macs.insert(value.to_lowercase());
            }
        }
    }
    raw.insert(String::from("ip_addresses"), json!(ips));
    raw.insert(String::from("mac_addresses"), json!(macs));
    raw.insert(String::from("entitlements"), Value::Array(entitlements));
    raw
}

const RPC_PATH: &str = "/rpc/api";

/// Satellite 5 over XML-RPC.
struct Satellite5 {
    http: HttpClient,
    key: String,
    systems: OnceCell<Vec<SatelliteHost>>,
    virtual_hosts: OnceCell<VirtualLayout>,
}

/// Which systems host guests, and which host each guest runs on.
#[derive(Default)]
struct VirtualLayout {
    hypervisors: BTreeSet<String>,
    guests: BTreeMap<String, (String, String)>,
}

impl Satellite5 {
    async fn login(http: HttpClient, credential: &Credential) -> Result<Self, ApiError> {
        let user = credential.username().clone().unwrap_or_default();
        let password = credential.password().clone().unwrap_or_default();
        let key = call(&http, "auth.login", &[Param::String(user), Param::String(password)])
            .await
            .map_err(|err| match err {
                ApiError::Protocol { url, reason, .. } if reason.contains("fault") => {
                    ApiError::Unauthorized { url, status: 200 }
                }
                err => err,
            })?;
        let key = key
            .as_str()
            .ok_or_else(|| ApiError::protocol(http.url(RPC_PATH), "session key is not a string", &key.to_string()))?
            .to_owned();
        Ok(Self {
            http,
            key,
            systems: OnceCell::new(),
            virtual_hosts: OnceCell::new(),
        })
    }

    async fn call(&self, method: &str, mut params: Vec<Param>) -> Result<Value, ApiError> {
        params.insert(0, Param::String(self.key.clone()));
        call(&self.http, method, &params).await
    }

    /// Every system the user can see, listed once per session.
    async fn systems(&self) -> Result<&[SatelliteHost], ApiError> {
        self.systems
            .get_or_try_init(|| async {
                let systems = self.call("system.listUserSystems", Vec::new()).await?;
                Ok(systems
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|system| {
                        let id = system.get("id")?.as_i64()?.to_string();
                        let name = system.get("name")?.as_str()?.to_owned();
                        Some(SatelliteHost { id, name })
                    })
                    .collect())
            })
            .await
            .map(Vec::as_slice)
    }

    async fn layout(&self) -> Result<&VirtualLayout, ApiError> {
        self.virtual_hosts
            .get_or_try_init(|| async {
                let mut layout = VirtualLayout::default();
                let hosts = self.call("system.listVirtualHosts", Vec::new()).await?;
                for host in hosts.as_array().into_iter().flatten() {
                    let Some(id) = host.get("id").and_then(Value::as_i64) else {
                        continue;
                    };
                    let name = host.get("name").and_then(Value::as_str).unwrap_or_default().to_owned();
                    let uuid = self
                        .call("system.getUuid", vec![Param::Int(id)])
                        .await?
                        .as_str()
                        .unwrap_or_default()
                        .to_owned();
                    layout.hypervisors.insert(id.to_string());
                    let guests = self.call("system.listVirtualGuests", vec![Param::Int(id)]).await?;
                    for guest in guests.as_array().into_iter().flatten() {
                        if let Some(guest) = guest.get("id").and_then(Value::as_i64) {
                            layout.guests.insert(guest.to_string(), (uuid.clone(), name.clone()));
                        }
                    }
                }
                Ok(layout)
            })
            .await
    }
}

async fn call(http: &HttpClient, method: &str, params: &[Param]) -> Result<Value, ApiError> {
    let url = http.url(RPC_PATH);
    let document = http.post_xml(RPC_PATH, None, rpc::call(method, params)).await?;
    match rpc::response(&document) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(fault)) => Err(ApiError::protocol(url, format!("{method} fault"), &fault)),
        Err(err) => Err(ApiError::protocol(url, err, &document)),
    }
}

#[async_trait]
impl SatelliteApi for Satellite5 {
    fn flavor(&self) -> SatelliteFlavor {
        SatelliteFlavor::Satellite5
    }

    async fn hosts(&self, page: usize, per_page: usize) -> Result<HostPage, ApiError> {
        let all = self.systems().await?;
        let total = all.len();
        let hosts = all
            .iter()
            .skip(page.saturating_sub(1) * per_page)
            .take(per_page)
            .cloned()
            .collect();
        Ok(HostPage { total, hosts })
    }

    async fn host_facts(&self, host: &SatelliteHost) -> Result<RawFacts, ApiError> {
        let id = host
            .id
            .parse::<i64>()
            .map_err(|err| ApiError::protocol(self.http.url(RPC_PATH), err, &host.id))?;
        let details = self.call("system.getDetails", vec![Param::Int(id)]).await?;
        let cpu = self.call("system.getCpu", vec![Param::Int(id)]).await?;
        let network = self.call("system.getNetwork", vec![Param::Int(id)]).await?;
        let devices = self.call("system.getNetworkDevices", vec![Param::Int(id)]).await?;
        let registered = self.call("system.getRegistrationDate", vec![Param::Int(id)]).await?;
        let uuid = self.call("system.getUuid", vec![Param::Int(id)]).await?;
        let layout = self.layout().await?;

        let mut raw = RawFacts::new();
        insert(
            &mut raw,
            "hostname",
            details
                .get("hostname")
                .cloned()
                .or_else(|| network.get("hostname").cloned())
                .or_else(|| Some(json!(host.name))),
        );
        insert(&mut raw, "uuid", uuid.as_str().filter(|u| !u.is_empty()).map(|u| json!(u)));
        insert(&mut raw, "os_release", details.get("release").cloned());
        insert(
            &mut raw,
            "os_version",
            details
                .get("release")
                .and_then(Value::as_str)
                .map(|release| release.trim_end_matches(|c: char| c.is_alphabetic()))
                .filter(|version| !version.is_empty())
                .map(|version| json!(version)),
        );
        insert(&mut raw, "cores", integer(cpu.get("count")).map(Value::from));
        insert(&mut raw, "num_sockets", integer(cpu.get("socket_count")).map(Value::from));
        insert(&mut raw, "architecture", cpu.get("arch").cloned());
        insert(&mut raw, "registration_time", Some(registered));

        let mut ips = BTreeSet::new();
        let mut macs = BTreeSet::new();
        if let Some(ip) = network.get("ip").and_then(Value::as_str).filter(|ip| !ip.is_empty()) {
            ips.insert(ip.to_owned());
        }
        for device in devices.as_array().into_iter().flatten() {
            if device.get("interface").and_then(Value::as_str) == Some("lo") {
                continue;
            }
            if let Some(ip) = device.get("ip").and_then(Value::as_str).filter(|ip| !ip.is_empty()) {
                ips.insert(ip.to_owned());
            }
            if let Some(mac) = device
                .get("hardware_address")
                .and_then(Value::as_str)
                .filter(|mac| !mac.is_empty())
            {
                macs.insert(mac.to_lowercase());
            }
        }
        raw.insert(String::from("ip_addresses"), json!(ips));
        raw.insert(String::from("mac_addresses"), json!(macs));

        let kind = if layout.hypervisors.contains(&host.id) {
            "hypervisor"
        } else if let Some((uuid, name)) = layout.guests.get(&host.id) {
            raw.insert(String::from("virtual_host_uuid"), json!(uuid));
            raw.insert(String::from("virtual_host_name"), json!(name));
            "virtual"
        } else {
            "physical"
        };
        raw.insert(String::from("virtual"), json!(kind));
        raw.insert(String::from("is_virtualized"), json!(kind == "virtual"));
        Ok(raw)
    }
}
