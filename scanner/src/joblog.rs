//! Per-job log streams captured from external programs.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use facts::JobId;
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::{debug, warn};

/// A captured output stream.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, EnumIter, AsRefStr)]
pub enum Stream {
    /// Standard output of the Ansible runner.
    #[strum(serialize = "ansible-stdout")]
    AnsibleStdout,

    /// Standard error of the Ansible runner.
    #[strum(serialize = "ansible-stderr")]
    AnsibleStderr,
}

/// The directory holding log streams, one file per job and stream.
///
/// Files are named `scan-job-{job}-{stream}.txt`.
#[derive(Clone, Debug)]
pub struct JobLogs {
    dir: PathBuf,
}

impl JobLogs {
    /// Store streams under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding stream files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file name of a stream.
    pub fn file_name(job: JobId, stream: Stream) -> String {
        format!("scan-job-{job}-{stream}.txt")
    }

    /// The path of a stream.
    pub fn path(&self, job: JobId, stream: Stream) -> PathBuf {
        self.dir.join(Self::file_name(job, stream))
    }

    /// Append text to a stream, creating the file if needed.
    ///
    /// Failure to write a log stream never fails the scan; it is logged instead.
    pub async fn append(&self, job: JobId, stream: Stream, text: &str) {
        if let Err(err) = self.try_append(job, stream, text).await {
            warn!(%job, %stream, "write job log: {err}");
        }
    }

    async fn try_append(&self, job: JobId, stream: Stream, text: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(job, stream))
            .await?;
        file.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Remove every stream of a job so a reused job id starts from empty files.
    pub async fn clear(&self, job: JobId) {
        for stream in Stream::iter() {
            match tokio::fs::remove_file(self.path(job, stream)).await {
                Ok(()) => debug!(%job, %stream, "removed stale job log"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(%job, %stream, "remove job log: {err}"),
            }
        }
    }

    /// Streams that exist for a job, as `(file name, path)` pairs.
    pub fn existing(&self, job: JobId) -> Vec<(String, PathBuf)> {
        Stream::iter()
            .map(|stream| (Self::file_name(job, stream), self.path(job, stream)))
            .filter(|(_, path)| path.is_file())
            .collect()
    }
}
