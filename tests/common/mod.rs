//! Shared fixtures for the integration tests: settings pointed at the
//! stub-server binary, descriptor builders, and injectable shutdown
//! strategies and management mocks.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use servman::management::{
    ManagementClient, ManagementConnector, ManagementEndpoint, ManagementError, RemoteTarget,
};
use servman::shutdown::{GracefulOutcome, ShutdownStrategy};
use servman::{ManagerError, ManagerSettings, Server};

/// Route supervisor logs through tracing when RUST_LOG is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Grab a port the OS considers free right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Settings that launch the stub-server binary instead of a real instance.
/// The destroy grace is zeroed so unclean-stop tests do not wait out the
/// production settle delay.
pub fn stub_settings(dir: &TempDir, startup_timeout: u64, shutdown_timeout: u64) -> ManagerSettings {
    ManagerSettings {
        binary_dir: dir.path().to_path_buf(),
        launcher: PathBuf::from(env!("CARGO_BIN_EXE_stub-server")),
        start_classpath: "stub.jar".to_string(),
        stop_classpath: "stub.jar".to_string(),
        main_class: "Main".to_string(),
        shutdown_class: "Shutdown".to_string(),
        instance_root: dir.path().join("instances"),
        udp_group: None,
        startup_timeout,
        shutdown_timeout,
        destroy_grace: 0,
        use_shutdown_client: false,
    }
}

/// Descriptor for a stub instance reachable over its management port.
pub fn stub_server(name: &str, port: u16) -> Server {
    let mut server = Server::new(name);
    server.host = "127.0.0.1".to_string();
    server.has_web_server = false;
    server.management_port = port;
    server.add_property("stub.port", port.to_string());
    server
}

/// Graceful shutdown by sending the stub its `shutdown` control line.
pub struct TcpLineShutdown;

#[async_trait]
impl ShutdownStrategy for TcpLineShutdown {
    async fn request_shutdown(
        &self,
        server: &mut Server,
        _settings: &ManagerSettings,
    ) -> GracefulOutcome {
        match TcpStream::connect((server.host.as_str(), server.management_port)).await {
            Ok(mut stream) => match stream.write_all(b"shutdown\n").await {
                Ok(()) => GracefulOutcome::accepted(None),
                Err(e) => GracefulOutcome::failed(
                    ManagerError::Config(format!("cannot send shutdown line: {e}")),
                    None,
                ),
            },
            Err(e) => GracefulOutcome::failed(
                ManagerError::Config(format!("cannot connect to instance: {e}")),
                None,
            ),
        }
    }
}

/// A graceful request that is accepted but ignored by the instance.
pub struct NoopShutdown;

#[async_trait]
impl ShutdownStrategy for NoopShutdown {
    async fn request_shutdown(
        &self,
        _server: &mut Server,
        _settings: &ManagerSettings,
    ) -> GracefulOutcome {
        GracefulOutcome::accepted(None)
    }
}

/// A graceful request that fails outright.
pub struct FailingShutdown;

#[async_trait]
impl ShutdownStrategy for FailingShutdown {
    async fn request_shutdown(
        &self,
        _server: &mut Server,
        _settings: &ManagerSettings,
    ) -> GracefulOutcome {
        GracefulOutcome::failed(
            ManagerError::Config("graceful shutdown refused".to_string()),
            None,
        )
    }
}

struct DumpClient {
    dump: String,
}

#[async_trait]
impl ManagementClient for DumpClient {
    async fn invoke(
        &self,
        _target: &RemoteTarget,
        operation: &str,
        _args: Vec<Value>,
    ) -> Result<Value, ManagementError> {
        if operation == "listThreadDump" {
            Ok(Value::String(self.dump.clone()))
        } else {
            Ok(Value::Null)
        }
    }
}

/// Connector whose client answers thread-dump requests with a fixed dump.
pub struct DumpConnector {
    pub dump: String,
}

#[async_trait]
impl ManagementConnector for DumpConnector {
    async fn connect(
        &self,
        _endpoint: &ManagementEndpoint,
    ) -> Result<Arc<dyn ManagementClient>, ManagementError> {
        Ok(Arc::new(DumpClient {
            dump: self.dump.clone(),
        }))
    }
}

/// Connector that never manages to establish a channel.
pub struct RefusingConnector;

#[async_trait]
impl ManagementConnector for RefusingConnector {
    async fn connect(
        &self,
        endpoint: &ManagementEndpoint,
    ) -> Result<Arc<dyn ManagementClient>, ManagementError> {
        Err(ManagementError::Connection {
            endpoint: endpoint.url.clone(),
            detail: "connection refused".to_string(),
        })
    }
}
