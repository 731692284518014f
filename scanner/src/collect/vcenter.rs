//! VMware vCenter sources, walked with the vSphere property collector.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use facts::{HostStatus, InspectResult, RawFacts};
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info};

use super::ApiTarget;
use crate::{
    xml::{self, escape, Element},
    ApiError, HttpClient, TaskContext, TaskError,
};

/// One inventory object with the properties requested for its type.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ManagedObject {
    /// Managed object type, e.g. `VirtualMachine`.
    pub kind: String,

    /// Managed object reference, e.g. `vm-42`.
    pub id: String,

    /// Property values by property path.
    pub props: BTreeMap<String, Value>,
}

impl ManagedObject {
    fn prop(&self, path: &str) -> Option<&Value> {
        self.props.get(path).filter(|value| !value.is_null())
    }

    fn text(&self, path: &str) -> Option<&str> {
        self.prop(path).and_then(Value::as_str)
    }
}

/// One page of a property collector traversal.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ObjectPage {
    /// Objects on this page.
    pub objects: Vec<ManagedObject>,

    /// Continuation token; `None` on the last page.
    pub token: Option<String>,
}

/// A logged-in vCenter session.
#[async_trait]
pub trait VcenterApi: Send + Sync {
    /// Product name and version reported by the server.
    fn about(&self) -> String;

    /// Retrieve a page of the inventory; pass the previous page's token to continue.
    async fn retrieve(&self, page_size: usize, token: Option<&str>) -> Result<ObjectPage, ApiError>;
}

const SDK_PATH: &str = "/sdk";

/// Properties requested per managed object type.
const PROPERTIES: &[(&str, &[&str])] = &[
    ("Datacenter", &["name", "parent"]),
    ("Folder", &["name", "parent"]),
    ("ClusterComputeResource", &["name", "parent"]),
    ("ComputeResource", &["name", "parent"]),
    (
        "HostSystem",
        &[
            "name",
            "parent",
            "summary.hardware.uuid",
            "summary.hardware.numCpuCores",
            "summary.hardware.numCpuPkgs",
            "summary.hardware.numCpuThreads",
        ],
    ),
    (
        "VirtualMachine",
        &[
            "name",
            "runtime.host",
            "runtime.powerState",
            "summary.config.uuid",
            "summary.config.numCpu",
            "summary.config.memorySizeMB",
            "summary.guest.hostName",
            "config.guestFullName",
            "guest.net",
        ],
    ),
];

const VIEW_TYPES: &[&str] = &["Datacenter", "Folder", "ComputeResource", "HostSystem", "VirtualMachine"];

struct Soap {
    http: HttpClient,
    about: String,
    collector: String,
    view: String,
}

fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns="urn:vim25">"#,
            "<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"
        ),
        body
    )
}

async fn invoke(http: &HttpClient, body: String) -> Result<Element, ApiError> {
    let url = http.url(SDK_PATH);
    let document = match http.post_xml(SDK_PATH, Some("urn:vim25"), envelope(&body)).await {
        Err(ApiError::Status { url, status, body }) if body.contains("InvalidLogin") => {
            return Err(ApiError::Unauthorized { url, status })
        }
        other => other?,
    };
    let root = xml::parse(&document).map_err(|err| ApiError::protocol(&url, err, &document))?;
    if let Some(fault) = root.find("Fault") {
        let reason = fault.child_text("faultstring").unwrap_or_else(|| String::from("soap fault"));
        return Err(ApiError::protocol(url, reason, &fault.text()));
    }
    Ok(root)
}

pub(super) async fn open(target: &ApiTarget) -> Result<Box<dyn VcenterApi>, ApiError> {
    let http = HttpClient::new(target)?;
    let url = http.url(SDK_PATH);

    let content = invoke(
        &http,
        String::from(r#"<RetrieveServiceContent><_this type="ServiceInstance">ServiceInstance</_this></RetrieveServiceContent>"#),
    )
    .await?;
    let returnval = content
        .find("returnval")
        .ok_or_else(|| ApiError::protocol(&url, "service content without returnval", &content.text()))?;
    let field = |name: &str| {
        returnval
            .child_text(name)
            .ok_or_else(|| ApiError::protocol(&url, format!("service content without {name}"), ""))
    };
    let sessions = field("sessionManager")?;
    let collector = field("propertyCollector")?;
    let views = field("viewManager")?;
    let root = field("rootFolder")?;
    let about = returnval
        .child("about")
        .and_then(|about| about.child_text("fullName"))
        .unwrap_or_default();

    let credential = &target.credential;
    invoke(
        &http,
        format!(
            r#"<Login><_this type="SessionManager">{}</_this><userName>{}</userName><password>{}</password></Login>"#,
            escape(&sessions),
            escape(credential.username().as_deref().unwrap_or_default()),
            escape(credential.password().as_deref().unwrap_or_default()),
        ),
    )
    .await?;

    let types = VIEW_TYPES
        .iter()
        .map(|kind| format!("<type>{kind}</type>"))
        .collect::<String>();
    let view = invoke(
        &http,
        format!(
            r#"<CreateContainerView><_this type="ViewManager">{}</_this><container type="Folder">{}</container>{types}<recursive>true</recursive></CreateContainerView>"#,
            escape(&views),
            escape(&root),
        ),
    )
    .await?;
    let view = view
        .find("returnval")
        .map(|view| view.text().trim().to_owned())
        .ok_or_else(|| ApiError::protocol(&url, "container view without returnval", &view.text()))?;

    debug!(%about, "vcenter session open");
    Ok(Box::new(Soap {
        http,
        about,
        collector,
        view,
    }))
}

impl Soap {
    fn filter_spec(&self) -> String {
        let prop_sets = PROPERTIES
            .iter()
            .map(|(kind, paths)| {
                let paths = paths
                    .iter()
                    .map(|path| format!("<pathSet>{path}</pathSet>"))
                    .collect::<String>();
                format!("<propSet><type>{kind}</type><all>false</all>{paths}</propSet>")
            })
            .collect::<String>();
        format!(
            concat!(
                "<specSet>{}",
                r#"<objectSet><obj type="ContainerView">{}</obj><skip>true</skip>"#,
                r#"<selectSet xsi:type="TraversalSpec"><name>traverseEntities</name>"#,
                "<type>ContainerView</type><path>view</path><skip>false</skip></selectSet>",
                "</objectSet></specSet>"
            ),
            prop_sets,
            escape(&self.view)
        )
    }
}

#[async_trait]
impl VcenterApi for Soap {
    fn about(&self) -> String {
        self.about.clone()
    }

    async fn retrieve(&self, page_size: usize, token: Option<&str>) -> Result<ObjectPage, ApiError> {
        let this = format!(r#"<_this type="PropertyCollector">{}</_this>"#, escape(&self.collector));
        let body = match token {
            None => format!(
                "<RetrievePropertiesEx>{this}{}<options><maxObjects>{page_size}</maxObjects></options></RetrievePropertiesEx>",
                self.filter_spec()
            ),
            Some(token) => format!(
                "<ContinueRetrievePropertiesEx>{this}<token>{}</token></ContinueRetrievePropertiesEx>",
                escape(token)
            ),
        };
        let response = invoke(&self.http, body).await?;
        Ok(response.find("returnval").map(object_page).unwrap_or_default())
    }
}

fn object_page(returnval: &Element) -> ObjectPage {
    let objects = returnval
        .children_named("objects")
        .filter_map(|object| {
            let obj = object.child("obj")?;
            let props = object
                .children_named("propSet")
                .filter_map(|prop| {
                    let name = prop.child_text("name")?;
                    Some((name, prop.child("val").map(property).unwrap_or(Value::Null)))
                })
                .collect();
            Some(ManagedObject {
                kind: obj.attrs.get("type").cloned().unwrap_or_default(),
                id: obj.text().trim().to_owned(),
                props,
            })
        })
        .collect();
    ObjectPage {
        objects,
        token: returnval.child_text("token").filter(|token| !token.is_empty()),
    }
}

/// Decode a property value from its `xsi:type`; complex values become objects.
fn property(element: &Element) -> Value {
    let kind = element
        .attrs
        .get("type")
        .map(|kind| kind.rsplit(':').next().unwrap_or(kind.as_str()))
        .unwrap_or_default();
    if kind.starts_with("ArrayOf") {
        return Value::Array(element.elements().map(property).collect());
    }
    if element.elements().next().is_none() {
        let text = element.text();
        let text = text.trim();
        return match kind {
            "int" | "long" | "short" | "byte" => text.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(text)),
            "boolean" => Value::Bool(text == "true"),
            _ => json!(text),
        };
    }

    let mut fields = BTreeMap::<String, Vec<Value>>::new();
    for child in element.elements() {
        fields.entry(child.name.clone()).or_default().push(property(child));
    }
    Value::Object(
        fields
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Array(values)
                };
                (name, value)
            })
            .collect::<Map<_, _>>(),
    )
}

/// Strings held in a value that is either a string or an array of strings.
fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
        _ => Vec::new(),
    }
}

/// Raw facts for every virtual machine in the inventory, with host, cluster, and datacenter context.
fn vm_facts(objects: &[ManagedObject], checked_in: &str) -> Vec<(String, RawFacts)> {
    let by_id = objects
        .iter()
        .map(|object| (object.id.as_str(), object))
        .collect::<BTreeMap<_, _>>();

    let ancestor = |start: Option<&str>, kind: &str| {
        let mut seen = BTreeSet::new();
        let mut current = start;
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            let object = by_id.get(id)?;
            if object.kind == kind {
                return object.text("name").map(str::to_owned);
            }
            current = object.text("parent");
        }
        None
    };

    objects
        .iter()
        .filter(|object| object.kind == "VirtualMachine")
        .map(|vm| {
            let mut raw = RawFacts::new();
            let mut put = |name: &str, value: Option<Value>| {
                if let Some(value) = value.filter(|v| !v.is_null()) {
                    raw.insert(name.to_owned(), value);
                }
            };
            let name = vm.text("name").unwrap_or(&vm.id).to_owned();
            put("vm.name", Some(json!(name)));
            put("vm.uuid", vm.prop("summary.config.uuid").cloned());
            put("vm.state", vm.prop("runtime.powerState").cloned());
            put("vm.cpu_count", vm.prop("summary.config.numCpu").cloned());
            put(
                "vm.memory_size",
                vm.prop("summary.config.memorySizeMB")
                    .and_then(Value::as_f64)
                    .map(|mb| json!(mb / 1024.0)),
            );
            put("vm.os", vm.prop("config.guestFullName").cloned());
            put("vm.dns_name", vm.prop("summary.guest.hostName").cloned());

            let nics = match vm.prop("guest.net") {
                Some(Value::Array(nics)) => nics.clone(),
                Some(nic @ Value::Object(_)) => vec![nic.clone()],
                _ => Vec::new(),
            };
            let ips = nics
                .iter()
                .flat_map(|nic| strings(nic.get("ipAddress")))
                .collect::<BTreeSet<_>>();
            let macs = nics
                .iter()
                .flat_map(|nic| strings(nic.get("macAddress")))
                .map(|mac| mac.to_lowercase())
                .collect::<BTreeSet<_>>();
            put("vm.ip_addresses", Some(json!(ips)));
            put("vm.mac_addresses", Some(json!(macs)));

            let host = vm.text("runtime.host").and_then(|id| by_id.get(id));
            if let Some(host) = host {
                put("vm.host.name", host.prop("name").cloned());
                put("vm.host.uuid", host.prop("summary.hardware.uuid").cloned());
                put("vm.host.cpu_cores", host.prop("summary.hardware.numCpuCores").cloned());
                put("vm.host.cpu_count", host.prop("summary.hardware.numCpuPkgs").cloned());
                put("vm.host.cpu_threads", host.prop("summary.hardware.numCpuThreads").cloned());
            }
            let parent = host.and_then(|host| host.text("parent"));
            put("vm.cluster", ancestor(parent, "ClusterComputeResource").map(Value::from));
            put("vm.datacenter", ancestor(parent, "Datacenter").map(Value::from));
            put("vm.last_check_in", Some(json!(checked_in)));
            (name, raw)
        })
        .collect()
}

pub(super) async fn connect(ctx: &TaskContext, target: ApiTarget) -> Result<(), TaskError> {
    let api = ctx.backends().apis.vcenter(&target).await?;
    info!(about = %api.about(), "vcenter session open");
    Ok(())
}

pub(super) async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let target = ctx.api_target()?;
    let api = ctx.backends().apis.vcenter(&target).await?;
    let page_size = ctx.settings().page_size().max(1);

    let mut objects = Vec::new();
    let mut token = None;
    loop {
        ctx.check_canceled()?;
        let page = api.retrieve(page_size, token.as_deref()).await?;
        debug!(objects = page.objects.len(), "vcenter page");
        objects.extend(page.objects);
        match page.token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    let checked_in = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| TaskError::Validation(err.to_string()))?;
    let vms = vm_facts(&objects, &checked_in);
    ctx.set_count(vms.len() as u64)?;
    let group = ctx.open_group()?;
    info!(about = %api.about(), vms = vms.len(), "inspecting vcenter");

    for (name, facts) in vms {
        ctx.record_inspection(group, InspectResult::from_facts(name, HostStatus::Success, facts))?;
    }
    Ok(())
}
