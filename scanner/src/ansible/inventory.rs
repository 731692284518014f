//! The JSON inventory handed to the runner.

use std::path::Path;

use facts::{Credential, SourceOptions};
use serde_json::{json, Map, Value};

/// An Ansible inventory: hosts split into groups of at most `max_concurrency`, sharing one credential.
///
/// Group names are `group_0`, `group_1`, ...; a run targets one group with `--limit`.
#[derive(Clone, PartialEq, Debug)]
pub struct Inventory {
    groups: Vec<(String, Vec<String>)>,
    vars: Map<String, Value>,
}

impl Inventory {
    /// Build an inventory for `hosts`, authenticating with `credential`.
    ///
    /// `key_file` is the on-disk copy of the credential's SSH key, if it has one.
    pub fn build(
        hosts: &[String],
        max_concurrency: usize,
        port: u16,
        credential: &Credential,
        key_file: Option<&Path>,
        options: &SourceOptions,
    ) -> Self {
        let groups = hosts
            .chunks(max_concurrency.max(1))
            .enumerate()
            .map(|(n, chunk)| (format!("group_{n}"), chunk.to_vec()))
            .collect();

        let mut vars = Map::new();
        vars.insert(String::from("ansible_port"), json!(port));
        if let Some(user) = credential.username() {
            vars.insert(String::from("ansible_user"), json!(user));
        }
        if let Some(password) = credential.password() {
            vars.insert(String::from("ansible_ssh_pass"), json!(password));
        }
        if let Some(path) = key_file {
            vars.insert(
                String::from("ansible_ssh_private_key_file"),
                json!(path.to_string_lossy()),
            );
        }
        if let Some(method) = credential.become_method() {
            vars.insert(String::from("ansible_become_method"), json!(method));
        }
        if let Some(user) = credential.become_user() {
            vars.insert(String::from("ansible_become_user"), json!(user));
        }
        if let Some(password) = credential.become_password() {
            vars.insert(String::from("ansible_become_pass"), json!(password));
        }
        let connection = if options.use_paramiko().unwrap_or(false) {
            "paramiko"
        } else {
            "ssh"
        };
        vars.insert(String::from("ansible_connection"), json!(connection));

        Self { groups, vars }
    }

    /// Groups in order, with their hosts.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().map(|(name, hosts)| (name.as_str(), hosts.as_slice()))
    }

    /// The hosts of a group.
    pub fn hosts(&self, group: &str) -> &[String] {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, hosts)| hosts.as_slice())
            .unwrap_or_default()
    }

    /// Variables shared by every host.
    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    /// Render the inventory in Ansible's JSON inventory format.
    pub fn to_json(&self) -> Value {
        let children = self
            .groups
            .iter()
            .map(|(name, hosts)| {
                let hosts = hosts
                    .iter()
                    .map(|host| (host.clone(), json!({ "ansible_host": host })))
                    .collect::<Map<_, _>>();
                (name.clone(), json!({ "hosts": hosts }))
            })
            .collect::<Map<_, _>>();
        json!({ "all": { "children": children, "vars": self.vars } })
    }
}
