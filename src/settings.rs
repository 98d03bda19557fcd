//! Global launch and shutdown configuration shared by every managed server.

use serde::Deserialize;
use std::path::PathBuf;

/// Settings consumed by the supervisor. Loading these from a file is the
/// harness's business; the struct deserializes from whatever format the
/// harness uses, with serde defaults for everything optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerSettings {
    /// Working directory for spawned instances.
    pub binary_dir: PathBuf,
    /// Runtime executable used to launch instances.
    pub launcher: PathBuf,
    /// Library-path argument for the start invocation.
    pub start_classpath: String,
    /// Library-path argument for the shutdown-client invocation.
    pub stop_classpath: String,
    /// Main entry point of the managed server.
    pub main_class: String,
    /// Entry point of the short-lived shutdown client.
    pub shutdown_class: String,
    /// Directory holding per-configuration instance directories.
    pub instance_root: PathBuf,
    /// Optional group flag appended to the start invocation.
    #[serde(default)]
    pub udp_group: Option<String>,
    /// Seconds to poll for readiness before giving up; one attempt per second.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,
    /// Seconds to poll for process exit after a graceful shutdown request.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    /// Seconds to wait after force-destroying a process, so a just-killed
    /// instance cannot race a concurrent readiness probe into looking alive.
    #[serde(default = "default_destroy_grace")]
    pub destroy_grace: u64,
    /// Select the shutdown-client strategy over the management channel.
    #[serde(default)]
    pub use_shutdown_client: bool,
}

fn default_startup_timeout() -> u64 {
    120
}

fn default_shutdown_timeout() -> u64 {
    45
}

fn default_destroy_grace() -> u64 {
    45
}

impl ManagerSettings {
    /// Directory of one named instance configuration.
    pub fn instance_dir(&self, config: &str) -> PathBuf {
        self.instance_root.join(config)
    }
}
