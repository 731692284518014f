//! Network sources: hosts reached over SSH through the Ansible bridge.

use std::collections::{BTreeMap, BTreeSet};

use facts::{Credential, CredentialId, HostStatus, InspectResult, OptionalProduct, ScanOptions};
use serde_json::{json, Map, Value};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::{
    ansible::{HostOutcome, HostResults, Inventory, KeyFile, Playbook, RunRequest, RunStatus},
    TaskContext, TaskError,
};

/// Playbook variables derived from scan options.
///
/// Each optional product becomes a flag saying whether it is inspected,
/// and a `_ext` flag saying whether its extended search runs;
/// `search_directories` is the space-joined list of extra directories.
pub fn extra_vars(options: &ScanOptions) -> Map<String, Value> {
    let mut vars = Map::new();
    let extended = options.enabled_extended_product_search();
    for product in OptionalProduct::iter() {
        let enabled = !options.disabled_optional_products().contains(&product);
        vars.insert(product.to_string(), json!(enabled));
        vars.insert(format!("{product}_ext"), json!(extended.products().contains(&product)));
    }
    vars.insert(
        String::from("search_directories"),
        json!(extended.search_directories().join(" ")),
    );
    vars
}

/// Material a run needs to authenticate with one credential.
struct Session {
    key: Option<KeyFile>,
    agent_keys: Vec<(std::path::PathBuf, String)>,
}

impl Session {
    fn open(credential: &Credential) -> Result<Self, TaskError> {
        let key = credential.ssh_key().as_deref().map(KeyFile::write).transpose()?;
        let agent_keys = match (&key, credential.ssh_passphrase()) {
            (Some(key), Some(passphrase)) => vec![(key.path().to_path_buf(), passphrase.clone())],
            _ => Vec::new(),
        };
        Ok(Self { key, agent_keys })
    }

    fn inventory(&self, ctx: &TaskContext, hosts: &[String], credential: &Credential) -> Result<Inventory, TaskError> {
        let source = ctx.source()?;
        Ok(Inventory::build(
            hosts,
            ctx.max_concurrency(),
            source.port(),
            credential,
            self.key.as_ref().map(KeyFile::path),
            source.options(),
        ))
    }
}

fn request(
    ctx: &TaskContext,
    session: &Session,
    playbook: Playbook,
    inventory: &Inventory,
    group: &str,
) -> RunRequest {
    let settings = ctx.settings();
    let timeout = match playbook {
        Playbook::Connect => settings.ansible_connect_timeout(),
        Playbook::Inspect => settings.ansible_inspect_timeout(),
    };
    let extra = match playbook {
        Playbook::Connect => Map::new(),
        Playbook::Inspect => extra_vars(ctx.job().options()),
    };
    RunRequest::builder()
        .job(ctx.job().id())
        .playbook(playbook)
        .inventory(inventory.clone())
        .limit(group)
        .extra_vars(extra)
        .timeout(timeout)
        .ssh_timeout(settings.ssh_connect_timeout())
        .agent_keys(session.agent_keys.clone())
        .build()
}

fn timeout_error(ctx: &TaskContext, playbook: Playbook) -> TaskError {
    let after = match playbook {
        Playbook::Connect => ctx.settings().ansible_connect_timeout(),
        Playbook::Inspect => ctx.settings().ansible_inspect_timeout(),
    };
    TaskError::Timeout {
        operation: format!("ansible {playbook}"),
        after,
    }
}

/// Try each credential in order against the hosts no earlier credential reached.
///
/// Hosts no credential reached are recorded without a credential:
/// unreachable if their last attempt was unreachable, failed otherwise.
pub(super) async fn connect(ctx: &TaskContext) -> Result<(), TaskError> {
    let source = ctx.source()?;
    let hosts = source.expand_hosts()?;
    ctx.set_count(hosts.len() as u64)?;
    info!(source = %source.name(), hosts = hosts.len(), "connecting");

    let mut remaining = hosts;
    let mut unreachable = BTreeSet::new();
    let mut timed_out = false;

    for credential in ctx.credentials()? {
        if remaining.is_empty() {
            break;
        }
        let session = Session::open(&credential)?;
        let inventory = session.inventory(ctx, &remaining, &credential)?;
        let mut reached = BTreeSet::new();

        for (group, hosts) in inventory.groups() {
            ctx.check_canceled()?;
            debug!(credential = %credential.name(), %group, hosts = hosts.len(), "connect batch");

            let mut results = HostResults::new(ctx.cancel().clone());
            let status = ctx
                .backends()
                .ansible
                .run(request(ctx, &session, Playbook::Connect, &inventory, group), &mut results)
                .await?;

            for host in hosts {
                match results.outcome(host) {
                    HostOutcome::Success(_) => {
                        ctx.record_connection(host, HostStatus::Success, Some(credential.id()))?;
                        reached.insert(host.clone());
                        unreachable.remove(host);
                    }
                    HostOutcome::Unreachable(_) => {
                        unreachable.insert(host.clone());
                    }
                    HostOutcome::Failed(_) | HostOutcome::Missing => {
                        unreachable.remove(host);
                    }
                }
            }

            match status {
                RunStatus::Canceled => return Err(TaskError::Canceled),
                RunStatus::Timeout => {
                    warn!(credential = %credential.name(), %group, "connect timed out");
                    timed_out = true;
                }
                RunStatus::Successful | RunStatus::Failed | RunStatus::Unreachable => {}
            }
        }

        remaining.retain(|host| !reached.contains(host));
    }

    for host in &remaining {
        let status = if unreachable.contains(host) {
            HostStatus::Unreachable
        } else {
            HostStatus::Failed
        };
        ctx.record_connection(host, status, None)?;
    }

    let stats = ctx.store().task(ctx.task().id())?.stats();
    if timed_out && stats.systems_count() > 0 && stats.systems_scanned() == 0 {
        return Err(timeout_error(ctx, Playbook::Connect));
    }
    Ok(())
}

/// Inspect every host the connect task reached, with the credential that reached it.
pub(super) async fn inspect(ctx: &TaskContext) -> Result<(), TaskError> {
    let connected = ctx.connected_hosts();
    ctx.set_count(connected.len() as u64)?;
    let group_id = ctx.open_group()?;

    let mut by_credential = BTreeMap::<Option<CredentialId>, Vec<String>>::new();
    for (host, credential) in connected {
        by_credential.entry(credential).or_default().push(host);
    }

    let credentials = ctx.credentials()?;
    let mut timed_out = false;
    for (credential, hosts) in by_credential {
        let Some(credential) = credentials.iter().find(|c| Some(c.id()) == credential) else {
            for host in &hosts {
                warn!(%host, "credential that reached host no longer exists");
                ctx.record_inspection(group_id, InspectResult::builder().name(host).status(HostStatus::Failed).build())?;
            }
            continue;
        };

        let session = Session::open(credential)?;
        let inventory = session.inventory(ctx, &hosts, credential)?;
        for (group, hosts) in inventory.groups() {
            ctx.check_canceled()?;
            debug!(%group, hosts = hosts.len(), "inspect batch");

            let mut results = HostResults::new(ctx.cancel().clone());
            let status = ctx
                .backends()
                .ansible
                .run(request(ctx, &session, Playbook::Inspect, &inventory, group), &mut results)
                .await?;

            let interrupted = matches!(status, RunStatus::Canceled | RunStatus::Timeout);
            for host in hosts {
                let result = match results.outcome(host) {
                    HostOutcome::Success(facts) if !facts.is_empty() => {
                        InspectResult::from_facts(host.as_str(), HostStatus::Success, facts)
                    }
                    HostOutcome::Success(_) => {
                        warn!(%host, "inspection produced no facts");
                        InspectResult::builder().name(host).status(HostStatus::Failed).build()
                    }
                    HostOutcome::Unreachable(_) => InspectResult::builder()
                        .name(host)
                        .status(HostStatus::Unreachable)
                        .build(),
                    HostOutcome::Failed(reason) => {
                        debug!(%host, "inspection failed: {reason}");
                        InspectResult::builder().name(host).status(HostStatus::Failed).build()
                    }
                    HostOutcome::Missing if status == RunStatus::Canceled => continue,
                    HostOutcome::Missing => {
                        if !interrupted {
                            warn!(%host, "runner reported nothing for host");
                        }
                        InspectResult::builder().name(host).status(HostStatus::Failed).build()
                    }
                };
                ctx.record_inspection(group_id, result)?;
            }

            match status {
                RunStatus::Canceled => return Err(TaskError::Canceled),
                RunStatus::Timeout => {
                    warn!(%group, "inspect timed out");
                    timed_out = true;
                }
                RunStatus::Successful | RunStatus::Failed | RunStatus::Unreachable => {}
            }
        }
    }

    let stats = ctx.store().task(ctx.task().id())?.stats();
    if timed_out && stats.systems_count() > 0 && stats.systems_scanned() == 0 {
        return Err(timeout_error(ctx, Playbook::Inspect));
    }
    Ok(())
}
