//! Sources: what to scan and how to reach it.

use getset::{CopyGetters, Getters};
use hostspec::HostSpec;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{Credential, CredentialId, Error, SourceId, SourceKind};

/// Connection options that only apply to some source kinds.
#[derive(Clone, PartialEq, Eq, Debug, Default, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Verify the server certificate of API sources. Defaults to verifying.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    ssl_cert_verify: Option<bool>,

    /// Talk plain HTTP to API sources.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    disable_ssl: Option<bool>,

    /// Pin a TLS protocol version for API sources.
    #[builder(default, setter(strip_option, into))]
    #[getset(get = "pub")]
    ssl_protocol: Option<String>,

    /// Use the paramiko SSH transport for network sources.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    use_paramiko: Option<bool>,
}

/// A configured endpoint to scan: a set of network hosts or a single API server.
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
pub struct Source {
    /// Assigned by the store on insert.
    #[builder(default)]
    #[serde(default)]
    #[getset(get_copy = "pub")]
    pub(crate) id: SourceId,

    /// Unique, human readable name.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    name: String,

    /// The kind of infrastructure this source points at.
    #[getset(get_copy = "pub")]
    kind: SourceKind,

    /// Host specifiers; see [`hostspec::HostSpec`].
    ///
    /// API sources list exactly one host.
    #[getset(get = "pub")]
    hosts: Vec<String>,

    /// Host specifiers subtracted from `hosts`. Network sources only.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub")]
    exclude_hosts: Vec<String>,

    /// Port to connect to; defaults per kind.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    port: Option<u16>,

    /// Credentials to try, in order.
    #[getset(get = "pub")]
    credentials: Vec<CredentialId>,

    /// Additional connection options.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub")]
    options: SourceOptions,
}

impl Source {
    /// The port to connect to.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    /// The single host of an API source.
    pub fn api_host(&self) -> Option<&str> {
        self.hosts.first().map(String::as_str)
    }

    /// Parse `hosts` into specifiers.
    pub fn host_specs(&self) -> Result<Vec<HostSpec>, Error> {
        Ok(hostspec::parse_all(&self.hosts)?)
    }

    /// Parse `exclude_hosts` into specifiers.
    pub fn exclude_specs(&self) -> Result<Vec<HostSpec>, Error> {
        Ok(hostspec::parse_all(&self.exclude_hosts)?)
    }

    /// Expand `hosts` minus `exclude_hosts` into literal hosts.
    pub fn expand_hosts(&self) -> Result<Vec<String>, Error> {
        let hosts = self.host_specs()?;
        let exclude = self.exclude_specs()?;
        Ok(hostspec::expand(&hosts, &exclude))
    }

    /// Validate the source against the credentials it references.
    ///
    /// `credentials` must contain every credential named by the source.
    pub fn validate(&self, credentials: &[Credential]) -> Result<(), Error> {
        let invalid = |field: &'static str, reason: String| Error::Validation {
            entity: "source",
            field,
            reason: format!("{reason} (source '{}')", self.name),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name", String::from("must not be empty")));
        }
        if self.hosts.is_empty() {
            return Err(invalid("hosts", String::from("at least one host is required")));
        }
        if self.credentials.is_empty() {
            return Err(invalid("credentials", String::from("at least one credential is required")));
        }

        if self.kind.is_api() {
            if self.hosts.len() != 1 {
                return Err(invalid("hosts", String::from("API sources take exactly one host")));
            }
            if self.credentials.len() != 1 {
                return Err(invalid("credentials", String::from("API sources take exactly one credential")));
            }
            if !self.exclude_hosts.is_empty() {
                return Err(invalid("exclude_hosts", String::from("only network sources exclude hosts")));
            }
            let host = HostSpec::parse(&self.hosts[0])?;
            if !host.is_literal() {
                return Err(invalid("hosts", format!("'{host}' names more than one host")));
            }
        } else {
            self.host_specs()?;
            self.exclude_specs()?;
        }

        for id in &self.credentials {
            let Some(credential) = credentials.iter().find(|c| c.id() == *id) else {
                return Err(Error::NotFound { entity: "credential", id: id.into_inner() });
            };
            if credential.kind() != self.kind {
                return Err(invalid(
                    "credentials",
                    format!("credential '{}' is a {} credential", credential.name(), credential.kind()),
                ));
            }
        }

        Ok(())
    }
}
