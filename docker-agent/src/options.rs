//! Translation of a creation request into runtime creation parameters.

use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_derive::Deserialize;

use crate::runtime::{ContainerOptions, DeviceMapping, HostOptions, LogConfig, PortBinding};

pub const CPU_PERIOD: i64 = 100_000;
pub const NETWORK_MODE: &str = "host";
pub const LOG_DRIVER: &str = "json-file";
pub const TEMPLATE_SCRIPT_NAME: &str = "template.sh";
pub const DEFAULT_LOG_NAME: &str = "undefine.log";

const BUILTIN_TEMPLATE: &str = include_str!("../scripts/template.sh");

/// The body of a request made to create a container.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct CreateContainerRequest {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub resource: ResourceRequest,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub env: Option<Environment>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Memory limit in bytes, ignored unless positive.
    #[serde(default)]
    pub memory: i64,
    /// Number of cores, ignored unless positive.
    #[serde(default)]
    pub cpus: f64,
    /// Indices of the NVIDIA devices to map into the container.
    #[serde(default)]
    pub gpus: Vec<u32>,
}

/// Container environment, either `{"KEY": "value"}` or `["KEY=value"]`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Environment {
    Map(BTreeMap<String, serde_json::Value>),
    List(Vec<String>),
}

impl Environment {
    pub fn to_vars(&self) -> Vec<String> {
        match self {
            Environment::List(vars) => vars.clone(),
            Environment::Map(vars) => vars
                .iter()
                .map(|(key, value)| match value {
                    serde_json::Value::String(value) => format!("{}={}", key, value),
                    // Numbers and booleans are written out as their JSON text.
                    other => format!("{}={}", key, other),
                })
                .collect(),
        }
    }
}

/// A user command wrapped by the template script, which appends its output to `log_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedCommand {
    pub script: PathBuf,
    pub log_path: String,
    pub command: String,
}

impl WrappedCommand {
    /// Install the wrapper script into `workspace` and wrap `command` with it.
    ///
    /// `template` is copied when given, otherwise the built-in script is written.
    pub async fn install(
        workspace: &str,
        log_path: Option<&str>,
        command: &str,
        template: Option<&Path>,
    ) -> std::io::Result<Self> {
        let workspace = Path::new(workspace.trim());
        let script = workspace.join(TEMPLATE_SCRIPT_NAME);

        match template {
            Some(template) => {
                tokio::fs::copy(template, &script).await?;
            }
            None => {
                tokio::fs::write(&script, BUILTIN_TEMPLATE).await?;
                tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                    .await?;
            }
        }

        let log_path = match log_path {
            Some(log_path) if !log_path.is_empty() => log_path.to_owned(),
            _ => workspace.join(DEFAULT_LOG_NAME).display().to_string(),
        };

        Ok(Self {
            script,
            log_path,
            command: command.to_owned(),
        })
    }

    pub fn argv(&self) -> Vec<String> {
        vec![
            self.script.display().to_string(),
            self.log_path.clone(),
            self.command.clone(),
        ]
    }
}

impl fmt::Display for WrappedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} \"{}\"",
            self.script.display(),
            self.log_path,
            self.command
        )
    }
}

pub fn host_options(request: &CreateContainerRequest) -> HostOptions {
    let resource = &request.resource;

    let (cpu_quota, cpu_period) = if resource.cpus > 0.0 {
        let quota = (CPU_PERIOD as f64 * resource.cpus).round() as i64;
        (Some(quota), Some(CPU_PERIOD))
    } else {
        (None, None)
    };

    let devices = resource
        .gpus
        .iter()
        .map(|index| {
            let path = format!("/dev/nvidia{}", index);
            DeviceMapping {
                path_on_host: path.clone(),
                path_in_container: path,
                cgroup_permissions: "mrw".to_owned(),
            }
        })
        .collect();

    let port_bindings = request
        .ports
        .iter()
        .map(|port| {
            (
                format!("{}/tcp", port),
                vec![PortBinding {
                    host_ip: "0.0.0.0".to_owned(),
                    host_port: port.to_string(),
                }],
            )
        })
        .collect();

    let workspace = request.workspace.trim();
    let binds = if workspace.is_empty() {
        Vec::new()
    } else {
        vec![format!("{}:{}", workspace, workspace)]
    };

    HostOptions {
        mem_limit: (resource.memory > 0).then_some(resource.memory),
        cpu_quota,
        cpu_period,
        devices,
        port_bindings,
        binds,
        network_mode: NETWORK_MODE.to_owned(),
        log_config: LogConfig {
            driver: LOG_DRIVER.to_owned(),
        },
    }
}

pub fn container_options(
    request: &CreateContainerRequest,
    command: Option<&WrappedCommand>,
) -> ContainerOptions {
    ContainerOptions {
        exposed_ports: request
            .ports
            .iter()
            .map(|port| format!("{}/tcp", port))
            .collect(),
        env: request
            .env
            .as_ref()
            .map(Environment::to_vars)
            .unwrap_or_default(),
        cmd: command.map(WrappedCommand::argv),
        tty: true,
        open_stdin: true,
        host_config: host_options(request),
    }
}
