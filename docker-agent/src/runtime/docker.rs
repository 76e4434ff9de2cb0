use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use bollard::container::{
    Config, InspectContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::ImportImageOptions;
use bollard::models::{self, BuildInfo, HostConfig, HostConfigLogConfig};
use bollard::Docker;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tracing::debug;

use super::{ContainerOptions, ContainerRuntime, ContainerState, RuntimeError};

/// [`ContainerRuntime`] backed by a Docker daemon listening on a unix socket.
///
/// A client handle is opened for each call and dropped when the call returns, on success
/// and error paths alike; no connection state is shared between calls.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    socket: String,
    timeout_secs: u64,
}

impl DockerRuntime {
    pub fn new(socket: &str, timeout_secs: u64) -> Self {
        Self {
            socket: socket.to_owned(),
            timeout_secs,
        }
    }

    fn connect(&self) -> Result<Docker, RuntimeError> {
        Ok(Docker::connect_with_unix(
            &self.socket,
            self.timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )?)
    }
}

fn record_call(call: &'static str, start: Instant) {
    metrics::histogram!("docker_agent_runtime_call_duration_seconds", "call" => call)
        .record(start.elapsed().as_secs_f64());
}

fn to_docker_config(image: &str, options: &ContainerOptions) -> Config<String> {
    let host = &options.host_config;

    let devices = host
        .devices
        .iter()
        .map(|device| models::DeviceMapping {
            path_on_host: Some(device.path_on_host.clone()),
            path_in_container: Some(device.path_in_container.clone()),
            cgroup_permissions: Some(device.cgroup_permissions.clone()),
        })
        .collect::<Vec<_>>();

    let port_bindings = host
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|binding| models::PortBinding {
                    host_ip: Some(binding.host_ip.clone()),
                    host_port: Some(binding.host_port.clone()),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect::<HashMap<_, _>>();

    let host_config = HostConfig {
        memory: host.mem_limit,
        cpu_quota: host.cpu_quota,
        cpu_period: host.cpu_period,
        devices: (!devices.is_empty()).then_some(devices),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: (!host.binds.is_empty()).then(|| host.binds.clone()),
        network_mode: Some(host.network_mode.clone()),
        log_config: Some(HostConfigLogConfig {
            typ: Some(host.log_config.driver.clone()),
            config: None,
        }),
        ..Default::default()
    };

    let exposed_ports = options
        .exposed_ports
        .iter()
        .map(|port| (port.clone(), HashMap::new()))
        .collect::<HashMap<_, _>>();

    Config {
        image: Some(image.to_owned()),
        cmd: options.cmd.clone(),
        env: (!options.env.is_empty()).then(|| options.env.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        tty: Some(options.tty),
        open_stdin: Some(options.open_stdin),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn from_docker_state(state: models::ContainerState) -> ContainerState {
    ContainerState {
        // `State.Error` is a message, not a flag. A container that failed to start keeps it
        // while its status says `exited`, and the status is what gets reported.
        error: false,
        paused: state.paused.unwrap_or(false),
        running: state.running.unwrap_or(false),
        // The Docker API carries no creating or stopped flag; those states only show up in
        // the status string.
        creating: false,
        stopped: false,
        dead: state.dead.unwrap_or(false),
        restarting: state.restarting.unwrap_or(false),
        status: state
            .status
            .map(|status| status.to_string())
            .filter(|status| !status.is_empty()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(
        &self,
        image: &str,
        options: &ContainerOptions,
    ) -> Result<String, RuntimeError> {
        let docker = self.connect()?;
        let start = Instant::now();

        let response = docker
            .create_container::<String, String>(None, to_docker_config(image, options))
            .await;
        record_call("create", start);

        let response = response?;
        for warning in &response.warnings {
            debug!(container_id = %response.id, "docker warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let docker = self.connect()?;
        let start = Instant::now();

        let result = docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await;
        record_call("start", start);

        Ok(result?)
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let docker = self.connect()?;
        let start = Instant::now();

        let result = docker.stop_container(id, None).await;
        record_call("stop", start);

        Ok(result?)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let docker = self.connect()?;
        let start = Instant::now();

        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        let result = docker.remove_container(id, Some(options)).await;
        record_call("remove", start);

        Ok(result?)
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        let docker = self.connect()?;
        let start = Instant::now();

        let result = docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await;
        record_call("inspect", start);

        Ok(result?.state.map(from_docker_state))
    }

    async fn load_image(&self, image: Vec<u8>) -> Result<(), RuntimeError> {
        let docker = self.connect()?;
        let start = Instant::now();

        let options = ImportImageOptions {
            quiet: true,
            ..Default::default()
        };
        let result = drain_import_progress(docker.import_image(
            options,
            Bytes::from(image),
            None,
        ))
        .await;
        record_call("load_image", start);

        result
    }
}

/// Consume an image import progress stream. The daemon reports a broken archive inside the
/// stream rather than as a response status, so an `error` entry fails the whole load.
async fn drain_import_progress<S>(progress: S) -> Result<(), RuntimeError>
where
    S: Stream<Item = Result<BuildInfo, bollard::errors::Error>>,
{
    let result = progress
        .try_for_each(|info| async move {
            match info.error {
                Some(message) => Err(bollard::errors::Error::DockerStreamError { error: message }),
                None => Ok(()),
            }
        })
        .await;

    match result {
        Err(bollard::errors::Error::DockerStreamError { error }) => {
            Err(RuntimeError::Failure(error))
        }
        other => Ok(other?),
    }
}
