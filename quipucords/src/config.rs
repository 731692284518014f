//! Maps command line flags and `QPC_*` environment variables onto [`Settings`].

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use getset::Getters;
use scanner::{Features, Settings};

fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("quipucords").join("logs")
}

/// Configures the scanning pipeline.
#[derive(Parser, Debug, Getters)]
pub struct Pipeline {
    /// Directory receiving per-job Ansible log streams.
    #[clap(long, env = "QPC_LOG_DIRECTORY", default_value_os_t = default_log_dir())]
    #[getset(get = "pub")]
    log_dir: PathBuf,

    /// Directory holding the connect and inspect playbooks.
    #[clap(long, env = "QPC_PLAYBOOK_DIRECTORY", default_value = "/usr/share/quipucords/playbooks")]
    playbook_dir: PathBuf,

    /// The Ansible runner program.
    #[clap(long, env = "QPC_ANSIBLE_RUNNER", default_value = "ansible-runner")]
    runner_program: String,

    /// Seconds one run of the connect playbook may take.
    #[clap(long, env = "QPC_CONNECT_JOB_TIMEOUT", default_value_t = 600)]
    connect_timeout: u64,

    /// Seconds one run of the inspect playbook may take.
    #[clap(long, env = "QPC_INSPECT_JOB_TIMEOUT", default_value_t = 3600)]
    inspect_timeout: u64,

    /// Seconds Ansible waits for an SSH connection to a host.
    #[clap(long, env = "QPC_SSH_CONNECT_TIMEOUT", default_value_t = 10)]
    ssh_connect_timeout: u64,

    /// Seconds a canceled job is given to stop before its tasks are marked canceled.
    #[clap(long, env = "QPC_CANCEL_DRAIN_TIMEOUT", default_value_t = 30)]
    drain_timeout: u64,

    /// Seconds a single API request may take.
    #[clap(long, env = "QPC_HTTP_TIMEOUT", default_value_t = 60)]
    http_timeout: u64,

    /// Rows requested per page from paginated APIs.
    #[clap(long, env = "QPC_PAGE_SIZE", default_value_t = 100)]
    page_size: usize,

    /// Identity of this instance, recorded on inspection groups.
    #[clap(long, env = "QPC_SERVER_ID", default_value = "quipucords")]
    server_id: String,

    /// Collect the pod to application rollup from OpenShift clusters.
    #[clap(long, env = "QPC_FEATURE_OCP_WORKLOADS")]
    ocp_workloads: bool,

    /// Skip managed cluster metrics on OpenShift clusters running ACM.
    #[clap(long, env = "QPC_EXCLUDE_OCP_ACM_METRICS")]
    exclude_ocp_acm_metrics: bool,

    /// Skip cluster operators and OLM subscriptions on OpenShift clusters.
    #[clap(long, env = "QPC_EXCLUDE_OCP_OPERATORS")]
    exclude_ocp_operators: bool,

    /// The most recent jobs considered when collecting job hosts from Ansible controllers.
    #[clap(long, env = "QPC_ANSIBLE_MAX_JOBS", default_value_t = 10_000)]
    ansible_max_jobs: usize,
}

impl Pipeline {
    /// The settings these options describe.
    pub fn settings(&self) -> Settings {
        Settings::builder()
            .ansible_connect_timeout(Duration::from_secs(self.connect_timeout))
            .ansible_inspect_timeout(Duration::from_secs(self.inspect_timeout))
            .ssh_connect_timeout(Duration::from_secs(self.ssh_connect_timeout))
            .drain_timeout(Duration::from_secs(self.drain_timeout))
            .http_timeout(Duration::from_secs(self.http_timeout))
            .page_size(self.page_size)
            .log_dir(self.log_dir.clone())
            .playbook_dir(self.playbook_dir.clone())
            .runner_program(self.runner_program.clone())
            .server_id(self.server_id.clone())
            .features(
                Features::builder()
                    .openshift_workloads(self.ocp_workloads)
                    .openshift_acm_metrics(!self.exclude_ocp_acm_metrics)
                    .openshift_operators(!self.exclude_ocp_operators)
                    .ansible_max_jobs(self.ansible_max_jobs)
                    .build(),
            )
            .build()
    }
}
