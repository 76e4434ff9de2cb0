//! The boundary to the container daemon.
//!
//! Everything the agent needs from the daemon goes through [`ContainerRuntime`]. The
//! production implementation talks to Docker over its unix socket; tests use the
//! in-memory [`fake::FakeRuntime`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The daemon reported that the container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("container runtime request failed: {0}")]
    Failure(String),
    #[error("docker request failed: {0}")]
    Docker(#[source] bollard::errors::Error),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(error: bollard::errors::Error) -> Self {
        match error {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            other => RuntimeError::Docker(other),
        }
    }
}

/// Creation parameters handed to the daemon, already translated from a creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerOptions {
    pub exposed_ports: Vec<String>,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub tty: bool,
    pub open_stdin: bool,
    pub host_config: HostOptions,
}

/// Host-level constraints derived once per creation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostOptions {
    #[serde(rename = "Memory", skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<i64>,
    #[serde(rename = "CpuQuota", skip_serializing_if = "Option::is_none")]
    pub cpu_quota: Option<i64>,
    #[serde(rename = "CpuPeriod", skip_serializing_if = "Option::is_none")]
    pub cpu_period: Option<i64>,
    pub devices: Vec<DeviceMapping>,
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    pub binds: Vec<String>,
    pub network_mode: String,
    pub log_config: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    #[serde(rename = "Type")]
    pub driver: String,
}

/// The state flags reported by the daemon when inspecting a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub error: bool,
    pub paused: bool,
    pub running: bool,
    pub creating: bool,
    pub stopped: bool,
    pub dead: bool,
    pub restarting: bool,
    pub status: Option<String>,
}

/// Operations delegated to the container daemon.
///
/// Every call is a blocking request to the local daemon bounded by the implementation's
/// timeout. A daemon "not found" answer is always reported as [`RuntimeError::NotFound`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_container(
        &self,
        image: &str,
        options: &ContainerOptions,
    ) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// `Ok(None)` means the daemon knows the container but reported no state.
    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError>;

    async fn load_image(&self, image: Vec<u8>) -> Result<(), RuntimeError>;
}
