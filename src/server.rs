//! The descriptor of one managed server instance.
//!
//! A `Server` carries identity, network location, launch parameters, and the
//! mutable runtime state of one instance: the process handle, the relay
//! tasks feeding its log files, and the cached management channel. It is
//! created once, registered into a [`crate::registry::Registry`], and reused
//! across repeated start/stop cycles. Only the supervisor mutates the
//! runtime state, and callers serialize start/stop per descriptor.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{ManagerError, Result};
use crate::logs::{DUMP_LOG, ERROR_LOG, OUTPUT_LOG};
use crate::management::{
    DEPLOY_OP, DEPLOYER_KIND, ManagementClient, ManagementConnector, ManagementEndpoint,
    ManagementError, REDEPLOY_OP, RemoteTarget, SERVER_KIND, SHUTDOWN_OP, THREAD_DUMP_OP,
    UNDEPLOY_OP,
};
use crate::settings::ManagerSettings;
use crate::shutdown::ShutdownStrategy;

/// One launch property, rendered as a `-D<key>=<value>` token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

pub struct Server {
    /// Unique handle within a registry.
    pub name: String,
    /// Instance configuration to launch; accessor defaults to the name.
    config: Option<String>,
    /// Name or IP address to bind to.
    pub host: String,
    /// Port probed to decide whether the instance has started serving HTTP.
    pub http_port: u16,
    /// Port of the management channel, probed when no web front end exists.
    pub management_port: u16,
    /// Whether an HTTP-reachable front end is expected.
    pub has_web_server: bool,
    /// Partition/group name passed on the command line.
    pub partition: String,
    /// Management credentials, passed to the shutdown client and connector.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Domain of the well-known management objects.
    pub management_domain: String,

    args: Vec<String>,
    runtime_args: Vec<String>,
    properties: Vec<Property>,
    log_threshold: Option<String>,

    pub(crate) process: Option<Child>,
    pub(crate) stdout_task: Option<JoinHandle<()>>,
    pub(crate) stderr_task: Option<JoinHandle<()>>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) shutdown_strategy: Option<Arc<dyn ShutdownStrategy>>,
    connector: Option<Arc<dyn ManagementConnector>>,
    management: Option<Arc<dyn ManagementClient>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("http_port", &self.http_port)
            .field("management_port", &self.management_port)
            .field("has_web_server", &self.has_web_server)
            .field("running_pid", &self.process.as_ref().and_then(|p| p.id()))
            .finish()
    }
}

impl Server {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            host: "localhost".to_string(),
            http_port: 8080,
            management_port: 1099,
            has_web_server: true,
            partition: "DefaultPartition".to_string(),
            username: None,
            password: None,
            management_domain: "system".to_string(),
            args: Vec::new(),
            runtime_args: Vec::new(),
            properties: Vec::new(),
            log_threshold: None,
            process: None,
            stdout_task: None,
            stderr_task: None,
            started_at: None,
            shutdown_strategy: None,
            connector: None,
            management: None,
        }
    }

    /// Instance configuration to launch. Defaults to the server name.
    pub fn config(&self) -> &str {
        self.config.as_deref().unwrap_or(&self.name)
    }

    pub fn set_config(&mut self, config: impl Into<String>) {
        self.config = Some(config.into());
    }

    pub fn add_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn add_runtime_arg(&mut self, arg: impl Into<String>) {
        self.runtime_args.push(arg.into());
    }

    pub fn runtime_args(&self) -> &[String] {
        &self.runtime_args
    }

    /// Append a launch property. Insertion order is the command-line order.
    /// Duplicate keys are the caller's mistake; the rendered value of a
    /// duplicate is unspecified.
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.push(Property {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Log threshold passed to the instance. Defaults to the most verbose
    /// level.
    pub fn log_threshold(&self) -> &str {
        self.log_threshold.as_deref().unwrap_or("DEBUG")
    }

    pub fn set_log_threshold(&mut self, threshold: impl Into<String>) {
        self.log_threshold = Some(threshold.into());
    }

    pub fn set_connector(&mut self, connector: Arc<dyn ManagementConnector>) {
        self.connector = Some(connector);
    }

    /// Override the graceful-shutdown strategy for this instance. When not
    /// set, the supervisor picks the configuration-selected default.
    pub fn set_shutdown_strategy(&mut self, strategy: Arc<dyn ShutdownStrategy>) {
        self.shutdown_strategy = Some(strategy);
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// True iff a process handle exists and the process has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            None => false,
            Some(child) => matches!(child.try_wait(), Ok(None)),
        }
    }

    /// True iff no process handle exists at all. A handle whose process has
    /// exited is neither running nor stopped: that is the observable crash
    /// state.
    pub fn is_stopped(&self) -> bool {
        self.process.is_none()
    }

    /// Exit code of the process, when it has exited.
    pub fn exit_code(&mut self) -> Option<i32> {
        self.process
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
            .and_then(|status| status.code())
    }

    /// Host rendered for embedding in a URL; IPv6 literals get brackets per
    /// RFC 2732.
    fn host_for_url(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Where the HTTP front end is expected to listen.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host_for_url(), self.http_port)
    }

    /// Where the management channel is expected to listen.
    pub fn management_url(&self) -> String {
        format!("remote://{}:{}", self.host_for_url(), self.management_port)
    }

    pub fn management_endpoint(&self) -> ManagementEndpoint {
        ManagementEndpoint {
            url: self.management_url(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Endpoint description used by readiness probes and their errors.
    pub fn readiness_endpoint(&self) -> String {
        if self.has_web_server {
            self.http_url()
        } else {
            format!("{}:{}", self.host, self.management_port)
        }
    }

    pub fn log_dir(&self, settings: &ManagerSettings) -> PathBuf {
        settings.instance_dir(self.config()).join("log")
    }

    pub fn output_log(&self, settings: &ManagerSettings) -> PathBuf {
        self.log_dir(settings).join(OUTPUT_LOG)
    }

    pub fn error_log(&self, settings: &ManagerSettings) -> PathBuf {
        self.log_dir(settings).join(ERROR_LOG)
    }

    pub fn dump_file(&self, settings: &ManagerSettings) -> PathBuf {
        self.log_dir(settings).join(DUMP_LOG)
    }

    /// Drop the cached management channel so the next call re-establishes it
    /// against the current process generation.
    pub(crate) fn invalidate_management(&mut self) {
        self.management = None;
    }

    async fn management(&mut self) -> Result<Arc<dyn ManagementClient>> {
        if let Some(client) = &self.management {
            return Ok(client.clone());
        }
        let connector = self.connector.clone().ok_or_else(|| {
            ManagerError::Config(format!(
                "no management connector configured for server {}",
                self.name
            ))
        })?;
        let endpoint = self.management_endpoint();
        let client = connector.connect(&endpoint).await?;
        self.management = Some(client.clone());
        Ok(client)
    }

    pub fn server_target(&self) -> RemoteTarget {
        RemoteTarget::new(self.management_domain.clone(), SERVER_KIND)
    }

    pub fn deployer_target(&self) -> RemoteTarget {
        RemoteTarget::new(self.management_domain.clone(), DEPLOYER_KIND)
    }

    /// Generic passthrough for arbitrary remote operations.
    pub async fn invoke_operation(
        &mut self,
        target: &RemoteTarget,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let client = self.management().await?;
        debug!("invoking {} on {}", operation, target);
        Ok(client.invoke(target, operation, args).await?)
    }

    /// Request graceful termination of the instance.
    pub async fn shutdown_instance(&mut self) -> Result<()> {
        let target = self.server_target();
        self.invoke_operation(&target, SHUTDOWN_OP, Vec::new())
            .await?;
        Ok(())
    }

    /// Retrieve a diagnostic dump of the instance's execution state.
    pub async fn thread_dump(&mut self) -> Result<String> {
        let target = self.server_target();
        let value = self
            .invoke_operation(&target, THREAD_DUMP_OP, Vec::new())
            .await?;
        match value {
            Value::String(dump) => Ok(dump),
            other => Err(ManagementError::UnexpectedResult {
                operation: THREAD_DUMP_OP.to_string(),
                detail: format!("expected a string, got {}", other),
            }
            .into()),
        }
    }

    pub async fn deploy(&mut self, artifact: &Path) -> Result<()> {
        self.deployer_op(DEPLOY_OP, artifact).await
    }

    pub async fn undeploy(&mut self, artifact: &Path) -> Result<()> {
        self.deployer_op(UNDEPLOY_OP, artifact).await
    }

    pub async fn redeploy(&mut self, artifact: &Path) -> Result<()> {
        self.deployer_op(REDEPLOY_OP, artifact).await
    }

    async fn deployer_op(&mut self, operation: &str, artifact: &Path) -> Result<()> {
        let target = self.deployer_target();
        let location = artifact.display().to_string();
        debug!("{} {} on server {}", operation, location, self.name);
        self.invoke_operation(&target, operation, vec![Value::String(location)])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> ManagerSettings {
        serde_json::from_value(serde_json::json!({
            "binary_dir": "/srv/bin",
            "launcher": "/opt/runtime/bin/launch",
            "start_classpath": "run.jar",
            "stop_classpath": "stop.jar",
            "main_class": "Main",
            "shutdown_class": "Shutdown",
            "instance_root": "/srv/instances",
        }))
        .unwrap()
    }

    #[test]
    fn config_defaults_to_the_server_name() {
        let mut server = Server::new("node0");
        assert_eq!(server.config(), "node0");
        server.set_config("all");
        assert_eq!(server.config(), "all");
    }

    #[test]
    fn fresh_server_is_stopped_and_not_running() {
        let mut server = Server::new("node0");
        assert!(server.is_stopped());
        assert!(!server.is_running());
        assert_eq!(server.exit_code(), None);
        assert!(server.started_at().is_none());
    }

    #[test]
    fn ipv6_hosts_are_bracketed_in_urls() {
        let mut server = Server::new("node0");
        server.host = "::1".to_string();
        assert_eq!(server.http_url(), "http://[::1]:8080");
        assert_eq!(server.management_url(), "remote://[::1]:1099");

        server.host = "10.0.0.5".to_string();
        server.http_port = 8180;
        assert_eq!(server.http_url(), "http://10.0.0.5:8180");
    }

    #[test]
    fn log_paths_hang_off_the_instance_dir() {
        let server = Server::new("node0");
        let settings = settings();
        assert_eq!(
            server.output_log(&settings),
            PathBuf::from("/srv/instances/node0/log/output.log")
        );
        assert_eq!(
            server.error_log(&settings),
            PathBuf::from("/srv/instances/node0/log/error.log")
        );
        assert_eq!(
            server.dump_file(&settings),
            PathBuf::from("/srv/instances/node0/log/threadDump.log")
        );
    }

    #[test]
    fn property_lookup_finds_first_match() {
        let mut server = Server::new("node0");
        server.add_property("alpha", "1");
        server.add_property("beta", "2");
        assert_eq!(server.get_property("beta"), Some("2"));
        assert_eq!(server.get_property("gamma"), None);
        assert_eq!(server.log_threshold(), "DEBUG");
    }

    struct RecordingClient {
        calls: Mutex<Vec<(String, String, Vec<Value>)>>,
        reply: Value,
    }

    #[async_trait]
    impl ManagementClient for RecordingClient {
        async fn invoke(
            &self,
            target: &RemoteTarget,
            operation: &str,
            args: Vec<Value>,
        ) -> std::result::Result<Value, ManagementError> {
            self.calls
                .lock()
                .push((target.to_string(), operation.to_string(), args));
            Ok(self.reply.clone())
        }
    }

    struct CountingConnector {
        client: Arc<RecordingClient>,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl ManagementConnector for CountingConnector {
        async fn connect(
            &self,
            _endpoint: &ManagementEndpoint,
        ) -> std::result::Result<Arc<dyn ManagementClient>, ManagementError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.client.clone())
        }
    }

    #[tokio::test]
    async fn management_ops_route_through_the_well_known_targets() {
        let client = Arc::new(RecordingClient {
            calls: Mutex::new(Vec::new()),
            reply: Value::Null,
        });
        let connector = Arc::new(CountingConnector {
            client: client.clone(),
            connects: AtomicUsize::new(0),
        });

        let mut server = Server::new("node0");
        server.set_connector(connector.clone());

        server.shutdown_instance().await.unwrap();
        server.deploy(Path::new("/artifacts/app.ear")).await.unwrap();
        server.undeploy(Path::new("/artifacts/app.ear")).await.unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls[0].0, "system:type=Server");
        assert_eq!(calls[0].1, "shutdown");
        assert_eq!(calls[1].0, "system:type=MainDeployer");
        assert_eq!(calls[1].1, "deploy");
        assert_eq!(calls[1].2, vec![Value::String("/artifacts/app.ear".into())]);
        assert_eq!(calls[2].1, "undeploy");

        // The channel is established once and reused across calls.
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_forces_a_new_channel() {
        let client = Arc::new(RecordingClient {
            calls: Mutex::new(Vec::new()),
            reply: Value::String("stacks".into()),
        });
        let connector = Arc::new(CountingConnector {
            client,
            connects: AtomicUsize::new(0),
        });

        let mut server = Server::new("node0");
        server.set_connector(connector.clone());

        assert_eq!(server.thread_dump().await.unwrap(), "stacks");
        server.invalidate_management();
        assert_eq!(server.thread_dump().await.unwrap(), "stacks");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_connector_is_a_configuration_error() {
        let mut server = Server::new("node0");
        let err = server.shutdown_instance().await.unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }
}
