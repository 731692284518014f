//! Credentials and the secret material they carry.

use derivative::Derivative;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{CredentialId, Error, SourceKind};

/// Authentication material used to reach the targets of a [`crate::Source`].
///
/// Secret fields are never printed by the `Debug` implementation.
#[derive(Clone, PartialEq, Eq, Derivative, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Credential {
    /// Assigned by the store on insert.
    #[builder(default)]
    #[serde(default)]
    #[getset(get_copy = "pub")]
    pub(crate) id: CredentialId,

    /// Unique, human readable name.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    name: String,

    /// The kind of source this credential authenticates against.
    #[getset(get_copy = "pub")]
    kind: SourceKind,

    /// The user to authenticate as.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[getset(get = "pub")]
    username: Option<String>,

    /// Password for `username`.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    #[getset(get = "pub")]
    password: Option<String>,

    /// Contents of a private SSH key.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    #[getset(get = "pub")]
    ssh_key: Option<String>,

    /// Passphrase protecting `ssh_key`.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    #[getset(get = "pub")]
    ssh_passphrase: Option<String>,

    /// Privilege escalation method, e.g. `sudo`.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[getset(get = "pub")]
    become_method: Option<String>,

    /// Privilege escalation user.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[getset(get = "pub")]
    become_user: Option<String>,

    /// Privilege escalation password.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    #[getset(get = "pub")]
    become_password: Option<String>,

    /// Bearer token for API sources.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    #[getset(get = "pub")]
    auth_token: Option<String>,
}

impl Credential {
    /// Check that exactly one set of authentication material is present for the credential's kind.
    ///
    /// - Network credentials need a username and either a password or an SSH key.
    /// - Satellite, vCenter and Ansible credentials need a username and password.
    /// - OpenShift credentials need either a token or a username and password.
    /// - RHACS credentials need a token.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |field: &'static str, reason: &str| Error::Validation {
            entity: "credential",
            field,
            reason: format!("{reason} (credential '{}')", self.name),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }

        let user = self.username.is_some();
        let pass = self.password.is_some();
        let key = self.ssh_key.is_some();
        let token = self.auth_token.is_some();

        if self.ssh_passphrase.is_some() && !key {
            return Err(invalid("ssh_passphrase", "requires ssh_key"));
        }

        match self.kind {
            SourceKind::Network => {
                if !user {
                    return Err(invalid("username", "is required"));
                }
                if pass == key {
                    return Err(invalid("password", "exactly one of password or ssh_key is required"));
                }
                if token {
                    return Err(invalid("auth_token", "is not supported for network credentials"));
                }
            }
            SourceKind::Satellite | SourceKind::Vcenter | SourceKind::Ansible => {
                if !user || !pass {
                    return Err(invalid("password", "username and password are required"));
                }
                if key || token {
                    return Err(invalid("ssh_key", "only username and password are supported"));
                }
            }
            SourceKind::Openshift => {
                let basic = user && pass;
                if token == basic || (!basic && (user || pass)) {
                    return Err(invalid(
                        "auth_token",
                        "exactly one of auth_token or username and password is required",
                    ));
                }
                if key {
                    return Err(invalid("ssh_key", "is not supported for openshift credentials"));
                }
            }
            SourceKind::Rhacs => {
                if !token {
                    return Err(invalid("auth_token", "is required"));
                }
                if user || pass || key {
                    return Err(invalid("auth_token", "only auth_token is supported"));
                }
            }
        }

        if self.kind != SourceKind::Network
            && (self.become_method.is_some() || self.become_user.is_some() || self.become_password.is_some())
        {
            return Err(invalid("become_method", "privilege escalation is only supported for network credentials"));
        }

        Ok(())
    }

    /// Replace the secret material, keeping identity and kind.
    ///
    /// Secrets are otherwise immutable.
    pub fn rotate(&mut self, secrets: Credential) -> Result<(), Error> {
        let mut next = secrets;
        next.id = self.id;
        next.name = self.name.clone();
        next.kind = self.kind;
        next.validate()?;
        *self = next;
        Ok(())
    }
}
