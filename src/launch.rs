//! Launch invocation assembly.
//!
//! The exact token order of both invocations is part of the contract with
//! the managed runtime and is pinned by golden tests: launcher, classpath,
//! runtime arguments, one `-D<key>=<value>` token per property in insertion
//! order, the log-threshold pair, the entry point, and the positional flags
//! for configuration name, bind host, and partition.

use std::path::PathBuf;

use crate::server::Server;
use crate::settings::ManagerSettings;

/// Property carrying the instance's log threshold.
pub const SERVER_LOG_THRESHOLD_PROP: &str = "server.log.threshold";
/// Property carrying the boot-phase log threshold.
pub const BOOT_LOG_THRESHOLD_PROP: &str = "server.boot.log.threshold";

/// A fully assembled process invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program followed by its arguments.
    pub program_and_args: Vec<String>,
    pub working_dir: PathBuf,
}

impl CommandSpec {
    /// Single-space-joined rendering, for logging and golden tests.
    pub fn command_line(&self) -> String {
        self.program_and_args.join(" ")
    }
}

/// Assemble the invocation that launches a server instance.
pub fn build_start_command(server: &Server, settings: &ManagerSettings) -> CommandSpec {
    let mut tokens = vec![
        settings.launcher.display().to_string(),
        "-cp".to_string(),
        settings.start_classpath.clone(),
    ];
    tokens.extend(server.runtime_args().iter().cloned());
    for property in server.properties() {
        tokens.push(format!("-D{}={}", property.key, property.value));
    }
    let level = server.log_threshold();
    tokens.push(format!("-D{}={}", SERVER_LOG_THRESHOLD_PROP, level));
    tokens.push(format!("-D{}={}", BOOT_LOG_THRESHOLD_PROP, level));
    tokens.push(settings.main_class.clone());
    tokens.push("-c".to_string());
    tokens.push(server.config().to_string());
    tokens.push("-b".to_string());
    tokens.push(server.host.clone());
    tokens.push("-g".to_string());
    tokens.push(server.partition.clone());
    if let Some(group) = settings.udp_group.as_deref() {
        if !group.is_empty() {
            tokens.push("-u".to_string());
            tokens.push(group.to_string());
        }
    }
    tokens.extend(server.args().iter().cloned());

    CommandSpec {
        program_and_args: tokens,
        working_dir: settings.binary_dir.clone(),
    }
}

/// Assemble the invocation of the short-lived shutdown client.
pub fn build_shutdown_command(server: &Server, settings: &ManagerSettings) -> CommandSpec {
    let mut tokens = vec![
        settings.launcher.display().to_string(),
        "-cp".to_string(),
        settings.stop_classpath.clone(),
        settings.shutdown_class.clone(),
    ];
    if let (Some(username), Some(password)) = (&server.username, &server.password) {
        tokens.push("-u".to_string());
        tokens.push(username.clone());
        tokens.push("-p".to_string());
        tokens.push(password.clone());
    }
    tokens.push("--shutdown".to_string());

    CommandSpec {
        program_and_args: tokens,
        working_dir: settings.binary_dir.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ManagerSettings {
        serde_json::from_value(serde_json::json!({
            "binary_dir": "/srv/bin",
            "launcher": "/opt/runtime/bin/launch",
            "start_classpath": "run.jar:tools.jar",
            "stop_classpath": "stop.jar:client.jar",
            "main_class": "Main",
            "shutdown_class": "Shutdown",
            "instance_root": "/srv/instances",
        }))
        .unwrap()
    }

    #[test]
    fn start_command_token_order_is_stable() {
        let mut server = Server::new("node0");
        server.add_runtime_arg("-Xmx512m");
        server.add_property("alpha", "1");
        server.add_property("beta", "2");
        server.add_arg("--verbose");

        let spec = build_start_command(&server, &settings());
        assert_eq!(
            spec.command_line(),
            "/opt/runtime/bin/launch -cp run.jar:tools.jar -Xmx512m \
             -Dalpha=1 -Dbeta=2 \
             -Dserver.log.threshold=DEBUG -Dserver.boot.log.threshold=DEBUG \
             Main -c node0 -b localhost -g DefaultPartition --verbose"
        );
        assert_eq!(spec.working_dir, PathBuf::from("/srv/bin"));
    }

    #[test]
    fn udp_group_token_is_appended_before_server_args() {
        let mut server = Server::new("node0");
        server.add_arg("--trailing");
        let mut settings = settings();
        settings.udp_group = Some("239.255.0.1".to_string());

        let spec = build_start_command(&server, &settings);
        let line = spec.command_line();
        assert!(line.contains("-g DefaultPartition -u 239.255.0.1 --trailing"));
    }

    #[test]
    fn empty_udp_group_is_skipped() {
        let server = Server::new("node0");
        let mut settings = settings();
        settings.udp_group = Some(String::new());

        let spec = build_start_command(&server, &settings);
        assert!(!spec.command_line().contains(" -u "));
    }

    #[test]
    fn log_threshold_property_pair_follows_the_descriptor() {
        let mut server = Server::new("node0");
        server.set_log_threshold("WARN");
        let spec = build_start_command(&server, &settings());
        let line = spec.command_line();
        assert!(line.contains("-Dserver.log.threshold=WARN"));
        assert!(line.contains("-Dserver.boot.log.threshold=WARN"));
    }

    #[test]
    fn shutdown_command_without_credentials() {
        let server = Server::new("node0");
        let spec = build_shutdown_command(&server, &settings());
        assert_eq!(
            spec.command_line(),
            "/opt/runtime/bin/launch -cp stop.jar:client.jar Shutdown --shutdown"
        );
    }

    #[test]
    fn shutdown_command_carries_credentials_only_when_both_are_set() {
        let mut server = Server::new("node0");
        server.username = Some("admin".to_string());
        let spec = build_shutdown_command(&server, &settings());
        assert!(!spec.command_line().contains("-u admin"));

        server.password = Some("secret".to_string());
        let spec = build_shutdown_command(&server, &settings());
        assert_eq!(
            spec.command_line(),
            "/opt/runtime/bin/launch -cp stop.jar:client.jar Shutdown -u admin -p secret --shutdown"
        );
    }
}
