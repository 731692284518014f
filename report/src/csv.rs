//! CSV renderings of details and deployments.
//!
//! Both files start with the same metadata section, two blank lines, then labeled sections:
//!
//! ```text
//! Report ID,Report Type,Report Version,Report Platform ID,Number Sources
//! 7,details,1.4.2,5f2de62b-...,2
//!
//!
//! Source
//! Server Identifier,Source Name,Source Type
//! ...
//! Facts
//! <fact names, sorted>
//! ...
//! ```
//!
//! Details carry one `Source` and one `Facts` section per source.
//! Deployments carry one `System Fingerprints:` section whose columns are [`FINGERPRINT_COLUMNS`]
//! followed by [`PRODUCT_COLUMNS`].
//!
//! Cells holding lists join their items with `;`; other structured values are written as compact JSON.

use std::{borrow::Cow, collections::BTreeSet};

use facts::{ProductName, SystemFingerprint};
use serde_json::Value;

use crate::{DeploymentsView, DetailsReport, Error};

/// Columns of the metadata section.
pub const METADATA_COLUMNS: &[&str] = &[
    "Report ID",
    "Report Type",
    "Report Version",
    "Report Platform ID",
    "Number Sources",
];

/// Columns of a details `Source` section.
pub const SOURCE_COLUMNS: &[&str] = &["Server Identifier", "Source Name", "Source Type"];

/// Fingerprint attributes written to deployments, in column order.
pub const FINGERPRINT_COLUMNS: &[&str] = &[
    "name",
    "os_name",
    "os_release",
    "os_version",
    "architecture",
    "bios_uuid",
    "subscription_manager_id",
    "insights_client_id",
    "cpu_count",
    "cpu_core_count",
    "cpu_socket_count",
    "cpu_core_per_socket",
    "cpu_hyperthreading",
    "infrastructure_type",
    "is_redhat",
    "redhat_certs",
    "redhat_package_count",
    "system_creation_date",
    "system_last_checkin_date",
    "system_purpose",
    "virtualized_type",
    "virtual_host_name",
    "virtual_host_uuid",
    "vm_cluster",
    "vm_datacenter",
    "vm_dns_name",
    "vm_host",
    "vm_host_core_count",
    "vm_host_socket_count",
    "vm_state",
    "vm_uuid",
    "ip_addresses",
    "mac_addresses",
    "sources",
];

/// Product presence columns written to deployments after [`FINGERPRINT_COLUMNS`].
pub const PRODUCT_COLUMNS: &[(&str, ProductName)] = &[
    ("jboss eap", ProductName::JbossEap),
    ("jboss fuse", ProductName::JbossFuse),
    ("jboss brms", ProductName::JbossBrms),
    ("jboss web server", ProductName::JbossWebServer),
];

#[derive(Default)]
struct Writer {
    out: String,
}

impl Writer {
    fn row<'a>(&mut self, cells: impl IntoIterator<Item = Cow<'a, str>>) {
        let mut first = true;
        for cell in cells {
            if !first {
                self.out.push(',');
            }
            first = false;
            self.out.push_str(&escape(&cell));
        }
        self.out.push_str("\r\n");
    }

    fn label(&mut self, label: &str) {
        self.row([Cow::Borrowed(label)]);
    }

    fn blank(&mut self) {
        self.out.push_str("\r\n");
    }

    fn metadata(&mut self, id: String, kind: &str, version: &str, platform_id: String, sources: usize) {
        self.row(METADATA_COLUMNS.iter().map(|c| Cow::Borrowed(*c)));
        self.row([
            Cow::Owned(id),
            Cow::Borrowed(kind),
            Cow::Borrowed(version),
            Cow::Owned(platform_id),
            Cow::Owned(sources.to_string()),
        ]);
        self.blank();
        self.blank();
    }
}

fn escape(cell: &str) -> Cow<'_, str> {
    if cell.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(cell)
    }
}

/// The text of one cell.
fn cell(value: Option<&Value>) -> Cow<'static, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(text)) => Cow::Owned(text.clone()),
        Some(Value::Array(items)) if items.iter().all(|item| !item.is_array() && !item.is_object()) => {
            Cow::Owned(items.iter().map(|item| cell(Some(item))).collect::<Vec<_>>().join(";"))
        }
        Some(other) => Cow::Owned(other.to_string()),
    }
}

/// Render details as CSV.
pub fn details(report: &DetailsReport) -> String {
    let mut w = Writer::default();
    w.metadata(
        report.report_id.map(|id| id.to_string()).unwrap_or_default(),
        &report.report_type,
        report.report_version.as_deref().unwrap_or_default(),
        report.report_platform_id.to_string(),
        report.sources.len(),
    );

    for source in &report.sources {
        w.label("Source");
        w.row(SOURCE_COLUMNS.iter().map(|c| Cow::Borrowed(*c)));
        w.row([
            Cow::Borrowed(source.server_id.as_str()),
            Cow::Borrowed(source.source_name.as_str()),
            Cow::Borrowed(source.source_type.as_ref()),
        ]);

        w.label("Facts");
        let columns = source.facts.iter().flat_map(|facts| facts.keys()).collect::<BTreeSet<_>>();
        w.row(columns.iter().map(|c| Cow::Borrowed(c.as_str())));
        for facts in &source.facts {
            w.row(columns.iter().map(|c| cell(facts.get(*c))));
        }
        w.blank();
    }
    w.out
}

/// Render deployments as CSV.
pub fn deployments(view: &DeploymentsView) -> Result<String, Error> {
    let mut w = Writer::default();
    w.metadata(
        view.report_id.to_string(),
        &view.report_type,
        &view.report_version,
        view.report_platform_id.to_string(),
        view.source_count,
    );

    w.label("System Fingerprints:");
    w.row(
        FINGERPRINT_COLUMNS
            .iter()
            .copied()
            .chain(PRODUCT_COLUMNS.iter().map(|(column, _)| *column))
            .map(Cow::Borrowed),
    );
    for fingerprint in &view.system_fingerprints {
        w.row(fingerprint_row(fingerprint)?);
    }
    w.blank();
    Ok(w.out)
}

fn fingerprint_row(fingerprint: &SystemFingerprint) -> Result<Vec<Cow<'static, str>>, Error> {
    let value = serde_json::to_value(fingerprint)?;
    let mut row = FINGERPRINT_COLUMNS
        .iter()
        .map(|column| match *column {
            "sources" => Cow::Owned(
                fingerprint
                    .sources
                    .iter()
                    .map(|source| source.source_name.as_str())
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
            column => cell(value.get(column)),
        })
        .collect::<Vec<_>>();
    row.extend(PRODUCT_COLUMNS.iter().map(|(_, product)| {
        fingerprint
            .product(*product)
            .map(|p| Cow::Owned(p.presence.to_string()))
            .unwrap_or(Cow::Borrowed(""))
    }));
    Ok(row)
}
