//! The start/stop protocol for one managed server instance.
//!
//! One control flow drives start/stop sequencing per descriptor; the spawned
//! process gets two background relay tasks for the lifetime of that process
//! generation. The process handle is recorded before readiness polling
//! begins and cleared only after both relays have drained, so a reader never
//! observes a live handle without output capture.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{ManagerError, Result, ShutdownReason};
use crate::launch;
use crate::logs::{self, LogSink, LogStream};
use crate::readiness::{self, interruptible_sleep};
use crate::relay::spawn_relay;
use crate::server::Server;
use crate::settings::ManagerSettings;
use crate::shutdown::{GracefulOutcome, ManagementShutdown, ShutdownClientProcess, ShutdownStrategy};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on waiting for a relay task to drain once its pipe has closed.
const RELAY_DRAIN: Duration = Duration::from_secs(5);

/// Start a server instance and wait for it to become ready.
///
/// Fails with `AlreadyRunning` when the descriptor is running, and with
/// `PortInUse` when something already answers on the readiness endpoint
/// (a leaked prior instance, usually). Any failure after the spawn tears the
/// descriptor back down to Stopped, with the logs left in place for a
/// postmortem.
pub async fn start_server(
    server: &mut Server,
    settings: &ManagerSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    if server.is_running() {
        return Err(ManagerError::AlreadyRunning(server.name.clone()));
    }
    if readiness::endpoint_ready(server).await {
        return Err(ManagerError::PortInUse {
            endpoint: server.readiness_endpoint(),
        });
    }

    // A channel cached from a prior generation must never be reused.
    server.invalidate_management();

    let spec = launch::build_start_command(server, settings);
    info!(
        "starting server {} (startup timeout {}s): {}",
        server.name,
        settings.startup_timeout,
        spec.command_line()
    );

    let mut cmd = Command::new(&spec.program_and_args[0]);
    cmd.args(&spec.program_and_args[1..])
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so force-destroy can take descendants down too.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| ManagerError::Spawn {
        name: server.name.clone(),
        source: e,
    })?;
    debug!("server {} spawned with PID {:?}", server.name, child.id());

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_sink = LogSink::create(server.output_log(settings));
    let err_sink = LogSink::create(server.error_log(settings));
    let (out_sink, err_sink) = match (out_sink, err_sink) {
        (Ok(out), Ok(err)) => (out, err),
        (Err(e), _) | (_, Err(e)) => {
            // No capture means no postmortem; take the child down before
            // surfacing the error.
            force_destroy(&mut child, &server.name).await;
            return Err(e);
        }
    };

    server.stdout_task = stdout.map(|stream| spawn_relay(stream, LogStream::Stdout, out_sink));
    server.stderr_task = stderr.map(|stream| spawn_relay(stream, LogStream::Stderr, err_sink));
    server.process = Some(child);
    server.started_at = Some(chrono::Utc::now());

    if let Err(e) = readiness::wait_until_ready(server, settings.startup_timeout, cancel).await {
        let timed_out = matches!(e, ManagerError::ReadinessTimeout(_));
        if timed_out {
            error!(
                "server {} failed to start before the timeout; destroying the process",
                server.name
            );
        }
        teardown_failed_start(server, timed_out).await;
        return Err(e);
    }

    info!("server {} started", server.name);
    Ok(())
}

/// Failure teardown: destroy the process when the deadline elapsed, drain
/// the relays (which closes the log sinks), and clear the handle so the
/// descriptor reads as Stopped.
async fn teardown_failed_start(server: &mut Server, timed_out: bool) {
    if timed_out {
        if let Some(child) = server.process.as_mut() {
            force_destroy(child, &server.name).await;
        }
    }
    drain_relays(server).await;
    if let Some(mut child) = server.process.take() {
        let _ = child.wait().await;
    }
    server.started_at = None;
}

/// Stop a server instance, gracefully when possible, forcibly otherwise.
///
/// Stopping an already-stopped server is not an error, but is noted. When
/// the graceful path fails or does not converge within the shutdown timeout,
/// diagnostics are captured, the process is destroyed, and the failure is
/// still surfaced so the caller can tell a clean stop from a forced one.
pub async fn stop_server(
    server: &mut Server,
    settings: &ManagerSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    if !server.is_running() {
        warn!(
            "server {} is not running; it cannot be stopped",
            server.name
        );
        if server.process.is_some() {
            // Crashed instance: reap it and release its output capture.
            drain_relays(server).await;
            if let Some(mut child) = server.process.take() {
                let _ = child.wait().await;
            }
            server.invalidate_management();
            server.started_at = None;
        }
        return Ok(());
    }

    info!("shutting down server {}", server.name);

    let strategy = graceful_strategy(server, settings);
    let outcome = strategy.request_shutdown(server, settings).await;
    if let Some(failure) = &outcome.failure {
        warn!(
            "graceful shutdown request for server {} failed: {}",
            server.name, failure
        );
    }

    let clean = outcome.is_accepted()
        && wait_on_shutdown(server, settings.shutdown_timeout, cancel).await;

    if !clean {
        capture_diagnostics(server, settings, &outcome).await;
        error!(
            "failed to shut down server {}; destroying the process",
            server.name
        );
        if let Some(child) = server.process.as_mut() {
            force_destroy(child, &server.name).await;
        }
        // A just-destroyed process must not race a concurrent readiness
        // probe into reporting itself alive.
        interruptible_sleep(Duration::from_secs(settings.destroy_grace), cancel).await;
    }

    drain_relays(server).await;
    if let Some(mut child) = server.process.take() {
        let _ = child.wait().await;
    }
    server.invalidate_management();
    server.started_at = None;

    if clean {
        info!("server {} stopped", server.name);
        Ok(())
    } else {
        let reason = if outcome.failure.is_some() {
            ShutdownReason::RequestFailed
        } else {
            ShutdownReason::Timeout
        };
        Err(ManagerError::Shutdown {
            name: server.name.clone(),
            reason,
            cause: outcome.failure.map(Box::new),
        })
    }
}

fn graceful_strategy(server: &Server, settings: &ManagerSettings) -> Arc<dyn ShutdownStrategy> {
    if let Some(strategy) = &server.shutdown_strategy {
        return strategy.clone();
    }
    if settings.use_shutdown_client {
        Arc::new(ShutdownClientProcess)
    } else {
        Arc::new(ManagementShutdown)
    }
}

/// Poll `is_running` once per second for up to `timeout_secs`. True when the
/// process stopped within the window.
async fn wait_on_shutdown(
    server: &mut Server,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> bool {
    debug!(
        "waiting up to {}s for server {} to stop",
        timeout_secs, server.name
    );
    for _ in 0..timeout_secs {
        if !server.is_running() {
            return true;
        }
        interruptible_sleep(POLL_INTERVAL, cancel).await;
    }
    !server.is_running()
}

/// Best-effort diagnostics for an unclean shutdown: the shutdown client's
/// captured output when that strategy ran, otherwise a thread dump persisted
/// to the descriptor's dump file. A failed dump attempt substitutes its own
/// error text, so the file always exists and is never silently missing.
async fn capture_diagnostics(
    server: &mut Server,
    settings: &ManagerSettings,
    outcome: &GracefulOutcome,
) {
    if let Some(output) = &outcome.client_output {
        error!(
            "shutdown client output for server {}:\n{}",
            server.name, output
        );
        return;
    }

    let dump = match server.thread_dump().await {
        Ok(dump) => dump,
        Err(e) => format!("Unable to get server thread dump: {}", e),
    };
    let path = server.dump_file(settings);
    info!("writing server {} thread dump to {:?}", server.name, path);
    if let Err(e) = logs::write_dump(&path, &dump) {
        error!("cannot write thread dump to {:?}: {}", path, e);
    }
}

/// Unconditionally destroy the process. The whole process group goes first,
/// so descendants do not linger; the direct kill is the fallback and also
/// reaps the exit status.
async fn force_destroy(child: &mut Child, name: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg for server {} (pid {}) failed: {}", name, pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("kill for server {} failed: {}", name, e);
    }
}

/// Wait for both relay tasks to finish. Their pipes close when the process
/// exits, so this normally returns quickly; a relay that will not drain is
/// aborted rather than allowed to hang the control flow.
async fn drain_relays(server: &mut Server) {
    for task in [server.stdout_task.take(), server.stderr_task.take()] {
        if let Some(mut task) = task {
            if timeout(RELAY_DRAIN, &mut task).await.is_err() {
                warn!(
                    "output relay for server {} did not drain in time; aborting it",
                    server.name
                );
                task.abort();
            }
        }
    }
}
