//! Graceful-shutdown strategies.
//!
//! Two interchangeable, configuration-selected strategies exist: asking the
//! instance to terminate through its management channel, or running a
//! short-lived shutdown-client process. Tests inject their own strategy per
//! descriptor instead of subclassing anything.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::errors::ManagerError;
use crate::launch;
use crate::relay::spawn_capture;
use crate::server::Server;
use crate::settings::ManagerSettings;

/// Bound on the shutdown client's run time.
const CLIENT_WAIT: Duration = Duration::from_secs(20);
/// Settle delay after the client wait, before judging its exit status.
const CLIENT_SETTLE: Duration = Duration::from_millis(500);

/// Result of one graceful-shutdown request. `failure == None` means the
/// request was accepted; whether the shutdown is clean is decided later, by
/// polling the process. The client's combined output is kept either way for
/// diagnostics.
pub struct GracefulOutcome {
    pub client_output: Option<String>,
    pub failure: Option<ManagerError>,
}

impl GracefulOutcome {
    pub fn accepted(client_output: Option<String>) -> Self {
        Self {
            client_output,
            failure: None,
        }
    }

    pub fn failed(failure: ManagerError, client_output: Option<String>) -> Self {
        Self {
            client_output,
            failure: Some(failure),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.failure.is_none()
    }
}

/// Request graceful termination of a managed instance.
#[async_trait]
pub trait ShutdownStrategy: Send + Sync {
    async fn request_shutdown(
        &self,
        server: &mut Server,
        settings: &ManagerSettings,
    ) -> GracefulOutcome;
}

/// Default strategy: invoke the remote `shutdown` operation.
pub struct ManagementShutdown;

#[async_trait]
impl ShutdownStrategy for ManagementShutdown {
    async fn request_shutdown(
        &self,
        server: &mut Server,
        _settings: &ManagerSettings,
    ) -> GracefulOutcome {
        match server.shutdown_instance().await {
            Ok(()) => GracefulOutcome::accepted(None),
            Err(e) => GracefulOutcome::failed(e, None),
        }
    }
}

/// Alternative strategy: run the shutdown client as a separate process and
/// judge its exit status. Its combined stdout/stderr is pumped into a
/// capture buffer for diagnostics.
pub struct ShutdownClientProcess;

#[async_trait]
impl ShutdownStrategy for ShutdownClientProcess {
    async fn request_shutdown(
        &self,
        server: &mut Server,
        settings: &ManagerSettings,
    ) -> GracefulOutcome {
        let spec = launch::build_shutdown_command(server, settings);
        debug!("running shutdown client: {}", spec.command_line());

        let mut cmd = Command::new(&spec.program_and_args[0]);
        cmd.args(&spec.program_and_args[1..])
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return GracefulOutcome::failed(
                    ManagerError::Spawn {
                        name: server.name.clone(),
                        source: e,
                    },
                    None,
                );
            }
        };

        let buffer = Arc::new(Mutex::new(String::new()));
        let stdout_task = child.stdout.take().map(|s| spawn_capture(s, buffer.clone()));
        let stderr_task = child.stderr.take().map(|s| spawn_capture(s, buffer.clone()));

        let status = timeout(CLIENT_WAIT, child.wait()).await;
        if status.is_err() {
            // Client overstayed its bound; its pipes close with it.
            let _ = child.kill().await;
        }
        sleep(CLIENT_SETTLE).await;

        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let _ = task.await;
        }
        let output = buffer.lock().clone();
        let output = (!output.is_empty()).then_some(output);

        match status {
            Ok(Ok(status)) if status.success() => GracefulOutcome::accepted(output),
            Ok(Ok(status)) => GracefulOutcome::failed(
                ManagerError::ShutdownClient {
                    name: server.name.clone(),
                    detail: format!("exited with {}", status),
                },
                output,
            ),
            Ok(Err(e)) => GracefulOutcome::failed(
                ManagerError::ShutdownClient {
                    name: server.name.clone(),
                    detail: format!("could not be waited on: {}", e),
                },
                output,
            ),
            Err(_) => GracefulOutcome::failed(
                ManagerError::ShutdownClient {
                    name: server.name.clone(),
                    detail: format!(
                        "did not exit within {} seconds",
                        CLIENT_WAIT.as_secs()
                    ),
                },
                output,
            ),
        }
    }
}
