//! Errors raised while running tasks and talking to sources.

use std::time::Duration;

use facts::{Status, TaskId};
use thiserror::Error;

/// Responses quoted in error messages are cut to this many characters.
pub const MAX_QUOTED_RESPONSE: usize = 512;

/// Errors that end a scan task.
///
/// Per-host failures are recorded on the host's result row and do not surface as a `TaskError`
/// unless they leave the task without a single successfully handled host.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TaskError {
    /// A target could not be reached.
    #[error("unable to reach '{target}': {reason}")]
    Unreachable {
        /// The host or URL.
        target: String,

        /// Underlying failure.
        reason: String,
    },

    /// A target rejected the credential.
    #[error("credential rejected by '{target}'")]
    AuthenticationRefused {
        /// The host or URL.
        target: String,
    },

    /// A remote command returned non-zero.
    #[error("remote command failed on '{host}': {reason}")]
    RemoteCommand {
        /// The host the command ran on.
        host: String,

        /// Underlying failure.
        reason: String,
    },

    /// An optional server-side API is absent.
    #[error("optional resource '{resource}' is not available")]
    OptionalResourceMissing {
        /// The missing API.
        resource: String,
    },

    /// A prerequisite task did not complete.
    #[error("prerequisite task {task} is {status}, not completed")]
    Prerequisite {
        /// The prerequisite task.
        task: TaskId,

        /// Its status.
        status: Status,
    },

    /// The job's cancel token was observed.
    #[error("canceled")]
    Canceled,

    /// A job or host timeout elapsed.
    #[error("{operation} timed out after {} seconds", .after.as_secs())]
    Timeout {
        /// What timed out.
        operation: String,

        /// The elapsed limit.
        after: Duration,
    },

    /// A server responded with something other than the expected schema.
    #[error("unexpected response from '{target}': {response}")]
    Protocol {
        /// The host or URL.
        target: String,

        /// The response, truncated to [`MAX_QUOTED_RESPONSE`] characters.
        response: String,
    },

    /// Task input is invalid.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Every host failed or was unreachable.
    #[error("no hosts were scanned successfully ({failed} failed, {unreachable} unreachable)")]
    NoHostsScanned {
        /// Hosts that failed.
        failed: u64,

        /// Hosts that could not be reached.
        unreachable: u64,
    },

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] facts::Error),

    /// The Ansible bridge failed outside of any host.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Fingerprinting the report failed.
    #[error(transparent)]
    Fingerprint(#[from] fingerprint::Error),
}

impl TaskError {
    /// Build a [`TaskError::Protocol`], truncating the response.
    pub fn protocol(target: impl Into<String>, response: &str) -> Self {
        Self::Protocol {
            target: target.into(),
            response: truncate(response),
        }
    }
}

/// Errors from source APIs.
#[derive(Error, Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// The server could not be reached.
    #[error("unable to reach '{url}': {reason}")]
    Unreachable {
        /// The request URL.
        url: String,

        /// Underlying failure.
        reason: String,
    },

    /// The server rejected the credential.
    #[error("'{url}' rejected the credential with status {status}")]
    Unauthorized {
        /// The request URL.
        url: String,

        /// HTTP status code.
        status: u16,
    },

    /// The resource does not exist on this server.
    #[error("'{url}' does not exist")]
    NotFound {
        /// The request URL.
        url: String,
    },

    /// Any other unsuccessful status.
    #[error("'{url}' responded with status {status}: {body}")]
    Status {
        /// The request URL.
        url: String,

        /// HTTP status code.
        status: u16,

        /// Response body, truncated.
        body: String,
    },

    /// The response did not match the expected schema.
    #[error("unexpected response from '{url}': {reason}: {body}")]
    Protocol {
        /// The request URL.
        url: String,

        /// What was wrong.
        reason: String,

        /// Response body, truncated.
        body: String,
    },
}

impl ApiError {
    /// Build an [`ApiError::Protocol`], truncating the body.
    pub fn protocol(url: impl Into<String>, reason: impl ToString, body: &str) -> Self {
        Self::Protocol {
            url: url.into(),
            reason: reason.to_string(),
            body: truncate(body),
        }
    }

    /// Whether the error means the resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

impl From<ApiError> for TaskError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unreachable { url, reason } => TaskError::Unreachable { target: url, reason },
            ApiError::Unauthorized { url, .. } => TaskError::AuthenticationRefused { target: url },
            ApiError::NotFound { url } => TaskError::Protocol {
                target: url,
                response: String::from("resource not found"),
            },
            ApiError::Status { url, status, body } => TaskError::Protocol {
                target: url,
                response: truncate(&format!("status {status}: {body}")),
            },
            ApiError::Protocol { url, reason, body } => TaskError::Protocol {
                target: url,
                response: truncate(&format!("{reason}: {body}")),
            },
        }
    }
}

/// Errors from the Ansible bridge itself, as opposed to the hosts it runs against.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// The runner program could not be started.
    #[error("start '{program}'")]
    Spawn {
        /// The program.
        program: String,

        /// Underlying failure.
        #[source]
        error: std::io::Error,
    },

    /// Reading or writing runner files failed.
    #[error("runner i/o")]
    Io(#[from] std::io::Error),

    /// The inventory or variables could not be encoded.
    #[error("encode runner input")]
    Encode(#[from] serde_json::Error),

    /// The SSH agent could not be primed with a key.
    #[error("prime ssh agent: {0}")]
    Agent(String),
}

/// Cut `text` to [`MAX_QUOTED_RESPONSE`] characters.
pub fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_QUOTED_RESPONSE) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_owned(),
    }
}
