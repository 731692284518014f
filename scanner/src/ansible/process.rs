//! The `ansible-runner` subprocess and the capture of its output.

use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    time::{timeout_at, Instant},
};
use tracing::{debug, info, warn};

use super::{AnsibleRunner, Control, EventHandler, RunRequest, RunStatus, RunnerEvent, SshAgent};
use crate::{BridgeError, JobLogs, Stream};

/// Exit code `ansible-playbook` uses when hosts were unreachable.
const EXIT_HOSTS_UNREACHABLE: i32 = 4;

/// Runs playbooks with the `ansible-runner` program.
///
/// Each run gets a private directory holding the inventory and extra variables;
/// events are read from the program's JSON output, one per line,
/// and the text of every event is teed into the job's log streams.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    program: String,
    playbook_dir: PathBuf,
    logs: JobLogs,
}

impl ProcessRunner {
    /// Run `program` with playbooks from `playbook_dir`, logging into `logs`.
    pub fn new(program: impl Into<String>, playbook_dir: impl Into<PathBuf>, logs: JobLogs) -> Self {
        Self {
            program: program.into(),
            playbook_dir: playbook_dir.into(),
            logs,
        }
    }
}

#[async_trait]
impl AnsibleRunner for ProcessRunner {
    async fn run(&self, request: RunRequest, events: &mut dyn EventHandler) -> Result<RunStatus, BridgeError> {
        let private = tempfile::Builder::new().prefix("qpc-runner-").tempdir()?;
        let inventory = private.path().join("inventory").join("hosts.json");
        let extra_vars = private.path().join("env").join("extravars");
        tokio::fs::create_dir_all(private.path().join("inventory")).await?;
        tokio::fs::create_dir_all(private.path().join("env")).await?;
        tokio::fs::write(&inventory, serde_json::to_vec(&request.inventory.to_json())?).await?;
        tokio::fs::write(&extra_vars, serde_json::to_vec(&request.extra_vars)?).await?;

        let agent = if request.agent_keys.is_empty() {
            None
        } else {
            Some(SshAgent::start(&request.agent_keys).await?)
        };

        let playbook = self.playbook_dir.join(request.playbook.as_ref());
        let mut command = Command::new(&self.program);
        command
            .arg("run")
            .arg(private.path())
            .arg("--playbook")
            .arg(&playbook)
            .arg("--inventory")
            .arg(&inventory)
            .arg("--limit")
            .arg(&request.limit)
            .arg("--json")
            .arg("--cmdline")
            .arg(format!("--timeout {}", request.ssh_timeout.as_secs()))
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(agent) = &agent {
            command.env("SSH_AUTH_SOCK", agent.socket());
        }

        info!(job = %request.job, playbook = %request.playbook, group = %request.limit, "starting ansible runner");
        let mut child = command.spawn().map_err(|error| BridgeError::Spawn {
            program: self.program.clone(),
            error,
        })?;

        let stderr = child.stderr.take().map(|stderr| {
            let logs = self.logs.clone();
            let job = request.job;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logs.append(job, Stream::AnsibleStderr, &line).await;
                }
            })
        });

        let deadline = Instant::now() + request.timeout;
        let mut status = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = match timeout_at(deadline, lines.next_line()).await {
                    Err(_) => {
                        warn!(job = %request.job, "ansible runner exceeded {} seconds", request.timeout.as_secs());
                        status = Some(RunStatus::Timeout);
                        break;
                    }
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => break,
                    Ok(Err(err)) => return Err(err.into()),
                };

                let Ok(event) = serde_json::from_str::<RunnerEvent>(&line) else {
                    self.logs.append(request.job, Stream::AnsibleStdout, &line).await;
                    continue;
                };
                if !event.stdout.is_empty() {
                    self.logs.append(request.job, Stream::AnsibleStdout, &event.stdout).await;
                }
                if events.handle(event) == Control::Cancel {
                    info!(job = %request.job, "cancel requested, stopping ansible runner");
                    status = Some(RunStatus::Canceled);
                    break;
                }
            }
        }

        let status = match status {
            Some(status) => {
                child.start_kill()?;
                child.wait().await?;
                status
            }
            None => {
                let exit = child.wait().await?;
                match exit.code() {
                    Some(0) => RunStatus::Successful,
                    Some(EXIT_HOSTS_UNREACHABLE) => RunStatus::Unreachable,
                    _ => RunStatus::Failed,
                }
            }
        };

        if let Some(stderr) = stderr {
            if let Err(err) = stderr.await {
                warn!(job = %request.job, "drain ansible runner stderr: {err}");
            }
        }
        debug!(job = %request.job, %status, "ansible runner finished");
        Ok(status)
    }
}
