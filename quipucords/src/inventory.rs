//! The inventory file: credentials, sources, and scans, referring to each other by name.
//!
//! ```json
//! {
//!   "credentials": [{"name": "lab-root", "kind": "network", "username": "root", "ssh_key": "..."}],
//!   "sources": [{"name": "lab", "kind": "network", "hosts": ["10.0.0.[1:20]"], "credentials": ["lab-root"]}],
//!   "scans": [{"name": "nightly", "sources": ["lab"], "options": {"max_concurrency": 10}}]
//! }
//! ```

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use facts::{
    Credential, CredentialId, Scan, ScanId, ScanOptions, ScanType, Source, SourceId, SourceKind, SourceOptions, Store,
};
use serde::Deserialize;
use tracing::info;

/// Everything a scan needs to know about the environment it scans.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inventory {
    /// Authentication material.
    #[serde(default)]
    pub credentials: Vec<Credential>,

    /// Endpoints to scan.
    #[serde(default)]
    pub sources: Vec<InventorySource>,

    /// Named scan configurations.
    #[serde(default)]
    pub scans: Vec<InventoryScan>,
}

/// A source whose credentials are named.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventorySource {
    /// Unique name.
    pub name: String,

    /// What the source points at.
    pub kind: SourceKind,

    /// Host specifiers.
    pub hosts: Vec<String>,

    /// Host specifiers to skip.
    #[serde(default)]
    pub exclude_hosts: Vec<String>,

    /// Port to connect to, when not the default for the kind.
    #[serde(default)]
    pub port: Option<u16>,

    /// Names of the credentials to try, in order.
    pub credentials: Vec<String>,

    /// Connection options.
    #[serde(default)]
    pub options: SourceOptions,
}

/// A scan whose sources are named.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryScan {
    /// Unique name.
    pub name: String,

    /// Whether to inspect or only connect.
    #[serde(default)]
    pub scan_type: ScanType,

    /// Names of the sources scanned, in order.
    pub sources: Vec<String>,

    /// How the scan runs.
    #[serde(default)]
    pub options: ScanOptions,
}

impl Inventory {
    /// Read an inventory file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read(path).with_context(|| format!("read inventory '{}'", path.display()))?;
        serde_json::from_slice(&content).with_context(|| format!("parse inventory '{}'", path.display()))
    }

    /// Add every entry to `store`, returning the scans by name.
    ///
    /// Entries are validated by the store as they are added.
    pub fn populate(&self, store: &Store) -> Result<Vec<(String, ScanId)>> {
        for credential in &self.credentials {
            store
                .add_credential(credential.clone())
                .with_context(|| format!("add credential '{}'", credential.name()))?;
        }

        for source in &self.sources {
            let credentials = source
                .credentials
                .iter()
                .map(|name| credential_id(store, name))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("resolve credentials of source '{}'", source.name))?;
            let built = Source::builder()
                .name(source.name.clone())
                .kind(source.kind)
                .hosts(source.hosts.clone())
                .exclude_hosts(source.exclude_hosts.clone())
                .credentials(credentials)
                .options(source.options.clone());
            let built = match source.port {
                Some(port) => built.port(port).build(),
                None => built.build(),
            };
            store
                .add_source(built)
                .with_context(|| format!("add source '{}'", source.name))?;
        }

        let mut scans = Vec::with_capacity(self.scans.len());
        for scan in &self.scans {
            let sources = scan
                .sources
                .iter()
                .map(|name| source_id(store, name))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("resolve sources of scan '{}'", scan.name))?;
            let id = store
                .add_scan(
                    Scan::builder()
                        .name(scan.name.clone())
                        .scan_type(scan.scan_type)
                        .sources(sources)
                        .options(scan.options.clone())
                        .build(),
                )
                .with_context(|| format!("add scan '{}'", scan.name))?;
            scans.push((scan.name.clone(), id));
        }

        info!(
            credentials = self.credentials.len(),
            sources = self.sources.len(),
            scans = scans.len(),
            "loaded inventory"
        );
        Ok(scans)
    }
}

fn credential_id(store: &Store, name: &str) -> Result<CredentialId> {
    match store.credential_by_name(name) {
        Some(credential) => Ok(credential.id()),
        None => bail!("no credential named '{name}'"),
    }
}

fn source_id(store: &Store, name: &str) -> Result<SourceId> {
    match store.source_by_name(name) {
        Some(source) => Ok(source.id()),
        None => bail!("no source named '{name}'"),
    }
}
