//! The management-channel seam.
//!
//! The supervisor never speaks the management protocol itself; it consumes an
//! opaque `invoke(target, operation, args)` capability supplied by the
//! harness. Establishing the underlying channel may fail on its own, so the
//! connector is a separate trait, and the resulting client is cached per
//! descriptor until the next stop or restart.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Kind of the well-known instance-control object.
pub const SERVER_KIND: &str = "Server";
/// Kind of the well-known deployment object.
pub const DEPLOYER_KIND: &str = "MainDeployer";

pub const SHUTDOWN_OP: &str = "shutdown";
pub const THREAD_DUMP_OP: &str = "listThreadDump";
pub const DEPLOY_OP: &str = "deploy";
pub const UNDEPLOY_OP: &str = "undeploy";
pub const REDEPLOY_OP: &str = "redeploy";

/// Identifier of a remote management object, rendered `<domain>:type=<Kind>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub domain: String,
    pub kind: String,
}

impl RemoteTarget {
    pub fn new(domain: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:type={}", self.domain, self.kind)
    }
}

/// Where a management channel should be established.
#[derive(Debug, Clone)]
pub struct ManagementEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Any failure unwrapped from the management channel. The supervisor maps
/// every one of these into a single `ManagerError::RemoteInvocation` carrying
/// the original cause; no per-subtype handling exists above this boundary.
#[derive(Error, Debug)]
pub enum ManagementError {
    #[error("cannot resolve management object {0}")]
    Naming(String),

    #[error("cannot reach management endpoint {endpoint}: {detail}")]
    Connection { endpoint: String, detail: String },

    #[error("remote operation {operation} on {target} failed: {detail}")]
    Remote {
        target: String,
        operation: String,
        detail: String,
    },

    #[error("unexpected result from {operation}: {detail}")]
    UnexpectedResult { operation: String, detail: String },
}

/// Invoke named operations against a running instance.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn invoke(
        &self,
        target: &RemoteTarget,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value, ManagementError>;
}

/// Establish a management channel to one instance.
#[async_trait]
pub trait ManagementConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &ManagementEndpoint,
    ) -> Result<Arc<dyn ManagementClient>, ManagementError>;
}
