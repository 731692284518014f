//! SSH key material for runs: temporary key files and an agent for passphrase-protected keys.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tempfile::{NamedTempFile, TempDir};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::BridgeError;

const AGENT_STARTUP: Duration = Duration::from_secs(5);
const AGENT_POLL: Duration = Duration::from_millis(50);

/// An SSH private key written to disk for the duration of a run.
///
/// The file is deleted when the value is dropped, on every exit path.
#[derive(Debug)]
pub struct KeyFile {
    file: NamedTempFile,
}

impl KeyFile {
    /// Write `key` to a new private temporary file.
    pub fn write(key: &str) -> Result<Self, BridgeError> {
        let mut file = tempfile::Builder::new().prefix("qpc-key-").tempfile()?;
        file.write_all(key.as_bytes())?;
        if !key.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(Self { file })
    }

    /// Where the key lives.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// An `ssh-agent` holding passphrase-protected keys for one run.
///
/// The agent is killed and its socket directory removed when the value is dropped.
#[derive(Debug)]
pub struct SshAgent {
    _child: Child,
    dir: TempDir,
    socket: PathBuf,
}

impl SshAgent {
    /// Start an agent and load each `(key path, passphrase)` into it.
    pub async fn start(keys: &[(PathBuf, String)]) -> Result<Self, BridgeError> {
        let dir = tempfile::Builder::new().prefix("qpc-agent-").tempdir()?;
        let socket = dir.path().join("agent.sock");
        let child = Command::new("ssh-agent")
            .arg("-D")
            .arg("-a")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| BridgeError::Spawn {
                program: String::from("ssh-agent"),
                error,
            })?;

        let deadline = tokio::time::Instant::now() + AGENT_STARTUP;
        while !socket.exists() {
            if tokio::time::Instant::now() >= deadline {
                return Err(BridgeError::Agent(String::from("agent socket never appeared")));
            }
            tokio::time::sleep(AGENT_POLL).await;
        }

        let agent = Self {
            _child: child,
            dir,
            socket,
        };
        let askpass = agent.write_askpass()?;
        for (key, passphrase) in keys {
            agent.add(&askpass, key, passphrase).await?;
        }
        Ok(agent)
    }

    /// The value for `SSH_AUTH_SOCK`.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn write_askpass(&self) -> Result<PathBuf, BridgeError> {
        let path = self.dir.path().join("askpass.sh");
        std::fs::write(&path, "#!/bin/sh\nprintf '%s\\n' \"$QPC_SSH_PASSPHRASE\"\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(path)
    }

    async fn add(&self, askpass: &Path, key: &Path, passphrase: &str) -> Result<(), BridgeError> {
        debug!(key = %key.display(), "loading key into agent");
        let output = Command::new("ssh-add")
            .arg(key)
            .env("SSH_AUTH_SOCK", &self.socket)
            .env("SSH_ASKPASS", askpass)
            .env("SSH_ASKPASS_REQUIRE", "force")
            .env("DISPLAY", ":0")
            .env("QPC_SSH_PASSPHRASE", passphrase)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| BridgeError::Spawn {
                program: String::from("ssh-add"),
                error,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BridgeError::Agent(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ))
        }
    }
}
