//! Readiness polling against a managed instance's primary endpoint.
//!
//! Fixed-interval bounded retry, one attempt per second, so the timeout
//! arithmetic stays exact: `timeout_seconds == max_attempts`. The sleep is
//! cancellable; cancellation skips the remaining sleep and counts as a
//! no-op retry, never as a failure, so an external signal can shorten a run
//! without waiting out the full timeout.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{ManagerError, Result};
use crate::server::Server;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on a single HTTP or TCP probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// One probe of the instance's readiness endpoint.
///
/// With a web front end, any HTTP response with a status below 400 counts as
/// ready; redirects are not followed, so 3xx is observed as-is. Connection
/// failures and malformed responses count as "not yet ready". Without a web
/// front end, a successful raw TCP connect to the management port suffices;
/// the connection is closed without sending data.
pub async fn endpoint_ready(server: &Server) -> bool {
    if server.has_web_server {
        http_ready(&server.http_url()).await
    } else {
        tcp_ready(&server.host, server.management_port).await
    }
}

async fn http_ready(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            debug!("cannot build readiness probe client: {}", e);
            return false;
        }
    };
    match client.get(url).send().await {
        Ok(response) => response.status().as_u16() < 400,
        Err(e) => {
            debug!("readiness probe of {} failed: {}", url, e);
            false
        }
    }
}

async fn tcp_ready(host: &str, port: u16) -> bool {
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("readiness connect to {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("readiness connect to {}:{} timed out", host, port);
            false
        }
    }
}

/// Poll until the instance is ready, its process exits, or `attempts`
/// one-second attempts are exhausted. Process liveness is checked before
/// every attempt; polling a dead process is pointless.
pub async fn wait_until_ready(
    server: &mut Server,
    attempts: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut tries = 0;
    while tries < attempts {
        tries += 1;
        if !server.is_running() {
            let code = server.exit_code();
            return Err(ManagerError::ProcessExitedEarly {
                name: server.name.clone(),
                code,
            });
        }
        interruptible_sleep(POLL_INTERVAL, cancel).await;
        if endpoint_ready(server).await {
            debug!("server {} ready after {} attempt(s)", server.name, tries);
            return Ok(());
        }
    }
    Err(ManagerError::ReadinessTimeout(server.name.clone()))
}

/// Sleep that a cancellation signal cuts short. Returns immediately when the
/// token is already tripped.
pub(crate) async fn interruptible_sleep(duration: Duration, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    tokio::select! {
        _ = sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
