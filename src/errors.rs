use std::fmt;
use thiserror::Error;

use crate::management::ManagementError;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("server {0} is already running")]
    AlreadyRunning(String),

    #[error("a process is already listening on {endpoint}")]
    PortInUse { endpoint: String },

    #[error("server {name} exited during startup with code {code:?}; see logs")]
    ProcessExitedEarly { name: String, code: Option<i32> },

    #[error("server {0} failed to become ready before the startup timeout")]
    ReadinessTimeout(String),

    #[error("failed to shut down server {name} {reason}; the process was destroyed")]
    Shutdown {
        name: String,
        reason: ShutdownReason,
        #[source]
        cause: Option<Box<ManagerError>>,
    },

    #[error("shutdown client for server {name} {detail}")]
    ShutdownClient { name: String, detail: String },

    #[error("management invocation failed: {0}")]
    RemoteInvocation(#[from] ManagementError),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server {0} is already registered")]
    DuplicateServer(String),

    #[error("failed to spawn process for server {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a stop attempt was not clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The graceful shutdown request itself failed.
    RequestFailed,
    /// The request was accepted but the process outlived the shutdown timeout.
    Timeout,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::RequestFailed => write!(f, "because the graceful request failed"),
            ShutdownReason::Timeout => write!(f, "before the shutdown timeout"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
