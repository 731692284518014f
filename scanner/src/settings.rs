//! Explicit configuration threaded through the job executor.

use std::{path::PathBuf, time::Duration};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Feature flags for optional collection.
#[derive(Clone, Copy, Eq, PartialEq, Debug, TypedBuilder, CopyGetters, Serialize, Deserialize)]
#[getset(get_copy = "pub")]
#[serde(default)]
pub struct Features {
    /// Collect the pod to application rollup from OpenShift clusters.
    #[builder(default = false)]
    openshift_workloads: bool,

    /// Collect managed cluster metrics from OpenShift clusters running ACM.
    #[builder(default = true)]
    openshift_acm_metrics: bool,

    /// Collect cluster operators and OLM subscriptions from OpenShift clusters.
    #[builder(default = true)]
    openshift_operators: bool,

    /// The most recent jobs considered when collecting job hosts from Ansible controllers.
    #[builder(default = 10_000)]
    ansible_max_jobs: usize,
}

impl Default for Features {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configures every tunable of the scanning pipeline.
#[derive(Clone, Eq, PartialEq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on one run of the connect playbook.
    #[builder(default = Duration::from_secs(600))]
    #[getset(get_copy = "pub")]
    #[serde(with = "seconds")]
    ansible_connect_timeout: Duration,

    /// Upper bound on one run of the inspect playbook.
    #[builder(default = Duration::from_secs(3600))]
    #[getset(get_copy = "pub")]
    #[serde(with = "seconds")]
    ansible_inspect_timeout: Duration,

    /// Per-host SSH connection timeout, passed to Ansible.
    #[builder(default = Duration::from_secs(10))]
    #[getset(get_copy = "pub")]
    #[serde(with = "seconds")]
    ssh_connect_timeout: Duration,

    /// How long a cancel request waits for running tasks to stop.
    #[builder(default = Duration::from_secs(30))]
    #[getset(get_copy = "pub")]
    #[serde(with = "seconds")]
    drain_timeout: Duration,

    /// Timeout for a single API request.
    #[builder(default = Duration::from_secs(60))]
    #[getset(get_copy = "pub")]
    #[serde(with = "seconds")]
    http_timeout: Duration,

    /// Rows requested per page from paginated APIs.
    #[builder(default = 100)]
    #[getset(get_copy = "pub")]
    page_size: usize,

    /// Directory receiving per-job log streams.
    #[builder(default = std::env::temp_dir().join("quipucords").join("logs"), setter(into))]
    #[getset(get = "pub")]
    log_dir: PathBuf,

    /// Directory holding `connect.yml` and `inspect.yml`.
    #[builder(default = PathBuf::from("/usr/share/quipucords/playbooks"), setter(into))]
    #[getset(get = "pub")]
    playbook_dir: PathBuf,

    /// The Ansible runner program.
    #[builder(default = String::from("ansible-runner"), setter(into))]
    #[getset(get = "pub")]
    runner_program: String,

    /// Version recorded on inspection groups and reports.
    #[builder(default = String::from(env!("CARGO_PKG_VERSION")), setter(into))]
    #[getset(get = "pub")]
    server_version: String,

    /// Identity of this server instance, recorded on inspection groups.
    #[builder(default = String::from("quipucords"), setter(into))]
    #[getset(get = "pub")]
    server_id: String,

    /// Optional collection flags.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    features: Features,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
