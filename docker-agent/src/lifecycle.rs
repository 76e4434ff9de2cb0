use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::heartbeat::HeartbeatRegistry;
use crate::options::{container_options, CreateContainerRequest, WrappedCommand};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::status;

#[derive(Clone, Debug)]
pub struct LifecycleSettings {
    /// Silence after which a tracked container is deleted.
    pub heartbeat_timeout: Duration,
    /// How often a monitor checks its container's heartbeat.
    pub poll_interval: Duration,
    /// Wrapper script copied into workspaces; the built-in script when `None`.
    pub command_template: Option<PathBuf>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            command_template: None,
        }
    }
}

/// Creates, inspects, stops and deletes containers, and reaps the ones nobody asks about.
///
/// Every created container gets a monitor task on the shared [`TaskTracker`]. Status
/// queries double as heartbeats: a container whose status is not queried for longer than
/// the heartbeat timeout is deleted by its monitor, which then stops. Monitors cannot be
/// cancelled from outside; an explicit delete leaves the monitor running until the
/// heartbeat goes stale, and its own delete attempt then finds nothing to remove.
#[derive(Clone)]
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    heartbeats: HeartbeatRegistry,
    tasks: TaskTracker,
    settings: Arc<LifecycleSettings>,
}

impl LifecycleManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        heartbeats: HeartbeatRegistry,
        tasks: TaskTracker,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            runtime,
            heartbeats,
            tasks,
            settings: Arc::new(settings),
        }
    }

    pub fn heartbeats(&self) -> &HeartbeatRegistry {
        &self.heartbeats
    }

    fn check_creation_args(request: &CreateContainerRequest) -> Result<(), AgentError> {
        if request.image.is_empty() {
            return Err(AgentError::invalid_parameter(format!(
                "parameter image: '{}' does not exist",
                request.image
            )));
        }

        if request.workspace.is_empty() || !Path::new(&request.workspace).exists() {
            return Err(AgentError::invalid_parameter(format!(
                "parameter workspace: '{}' does not exist",
                request.workspace
            )));
        }

        Ok(())
    }

    /// Create and start a container, then start watching its heartbeat.
    pub async fn create(&self, request: &CreateContainerRequest) -> Result<String, AgentError> {
        Self::check_creation_args(request)?;

        let command = match request.command.as_deref() {
            Some(command) if !command.is_empty() => Some(
                WrappedCommand::install(
                    &request.workspace,
                    request.log_path.as_deref(),
                    command,
                    self.settings.command_template.as_deref(),
                )
                .await
                .map_err(AgentError::CommandTemplate)?,
            ),
            _ => None,
        };
        if let Some(command) = &command {
            debug!(image = %request.image, "wrapped command: {}", command);
        }

        let options = container_options(request, command.as_ref());
        let id = self
            .runtime
            .create_container(&request.image, &options)
            .await?;
        self.runtime.start(&id).await?;

        self.heartbeats.register(&id);
        self.tasks.spawn(self.clone().watch(id.clone()));

        metrics::counter!("docker_agent_containers_created_total").increment(1);
        info!(container_id = %id, image = %request.image, "container created");

        Ok(id)
    }

    /// Force-remove a container. Removing a container that is already gone succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), AgentError> {
        match self.runtime.remove_container(id, true).await {
            Ok(()) => {
                info!(container_id = %id, "container deleted");
                Ok(())
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!(container_id = %id, "container already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Report the container's status, refreshing its heartbeat if it is tracked.
    pub async fn get_status(&self, id: &str) -> Result<String, AgentError> {
        self.heartbeats.touch(id);

        match self.runtime.inspect(id).await {
            Ok(state) => Ok(status::container_status(state.as_ref())),
            Err(RuntimeError::NotFound(_)) => Ok(status::ERROR.to_owned()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop a container. It stays tracked until deleted by its monitor.
    pub async fn stop(&self, id: &str) -> Result<(), AgentError> {
        self.runtime.stop(id).await?;
        info!(container_id = %id, "container stopped");
        Ok(())
    }

    /// Poll the heartbeat of `id` until it goes stale, then delete the container and stop
    /// tracking it.
    async fn watch(self, id: String) {
        let poll_interval = self.settings.poll_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self
                .heartbeats
                .is_expired(&id, self.settings.heartbeat_timeout)
            {
                Some(false) => continue,
                Some(true) => break,
                None => {
                    warn!(container_id = %id, "heartbeat entry vanished, monitor exiting");
                    return;
                }
            }
        }

        info!(container_id = %id, "heartbeat timed out, deleting container");
        let outcome = self.expire(&id).await;
        metrics::counter!("docker_agent_containers_expired_total", "outcome" => outcome)
            .increment(1);
    }

    /// Delete an expired container and drop it from the registry whether or not the delete
    /// went through. Returns the outcome label for the expiry counter.
    async fn expire(&self, id: &str) -> &'static str {
        let outcome = match self.delete(id).await {
            Ok(()) => "deleted",
            Err(e) => {
                error!(container_id = %id, "failed to delete expired container: {}", e);
                "failed"
            }
        };
        self.heartbeats.remove(id);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{Call, FakeRuntime};
    use crate::runtime::ContainerState;

    struct Harness {
        manager: LifecycleManager,
        runtime: FakeRuntime,
        tasks: TaskTracker,
        workspace: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let runtime = FakeRuntime::default();
        let tasks = TaskTracker::new();
        let manager = LifecycleManager::new(
            Arc::new(runtime.clone()),
            HeartbeatRegistry::new(),
            tasks.clone(),
            LifecycleSettings::default(),
        );

        Harness {
            manager,
            runtime,
            tasks,
            workspace: tempfile::tempdir().unwrap(),
        }
    }

    impl Harness {
        fn request(&self) -> CreateContainerRequest {
            CreateContainerRequest {
                image: "busybox".to_owned(),
                workspace: self.workspace.path().display().to_string(),
                ..Default::default()
            }
        }
    }

    /// Let time run for `duration`, giving woken monitors a chance to finish their work.
    async fn run_for(duration: Duration) {
        tokio::time::sleep(duration).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_translates_resources_and_registers_a_monitor() {
        let h = harness();
        let mut request = h.request();
        request.resource.memory = 134217728;
        request.resource.cpus = 1.0;
        request.ports = vec![8080];

        let id = h.manager.create(&request).await.unwrap();

        assert!(h.manager.heartbeats().contains(&id));
        assert_eq!(h.tasks.len(), 1);

        let calls = h.runtime.calls();
        let Call::Create { image, options } = &calls[0] else {
            panic!("expected a create call, got {:?}", calls[0]);
        };
        assert_eq!(image, "busybox");
        assert_eq!(options.host_config.cpu_quota, Some(100000));
        assert_eq!(options.host_config.cpu_period, Some(100000));
        assert_eq!(options.host_config.mem_limit, Some(134217728));
        let binding = &options.host_config.port_bindings["8080/tcp"][0];
        assert_eq!(binding.host_port, "8080");
        assert_eq!(binding.host_ip, "0.0.0.0");
        assert_eq!(calls[1], Call::Start(id));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_parameters_fail_before_any_runtime_call() {
        let h = harness();

        let mut request = h.request();
        request.image = String::new();
        let err = h.manager.create(&request).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameter { .. }));

        let mut request = h.request();
        request.workspace = "/no/such/workspace".to_owned();
        let err = h.manager.create(&request).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameter { .. }));

        assert!(h.runtime.calls().is_empty());
        assert!(h.manager.heartbeats().is_empty());
        assert!(h.tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_failures_propagate_without_tracking() {
        let h = harness();
        h.runtime.fail_create("image not found locally");

        let err = h.manager.create(&h.request()).await.unwrap_err();

        assert!(matches!(
            err,
            AgentError::Runtime(RuntimeError::Failure(ref message))
                if message == "image not found locally"
        ));
        assert!(h.manager.heartbeats().is_empty());
        assert!(h.tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn create_with_command_installs_the_wrapper() {
        let h = harness();
        let mut request = h.request();
        request.command = Some("echo hello".to_owned());

        h.manager.create(&request).await.unwrap();

        let calls = h.runtime.calls();
        let Call::Create { options, .. } = &calls[0] else {
            panic!("expected a create call");
        };
        let script = h.workspace.path().join("template.sh");
        assert!(script.is_file());
        assert_eq!(
            options.cmd,
            Some(vec![
                script.display().to_string(),
                h.workspace.path().join("undefine.log").display().to_string(),
                "echo hello".to_owned(),
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delete_is_idempotent() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();

        h.manager.delete(&id).await.unwrap();
        h.manager.delete(&id).await.unwrap();

        assert!(!h.runtime.contains(&id));
        assert_eq!(h.runtime.removals(&id), 2);
        assert!(h
            .runtime
            .calls()
            .contains(&Call::Remove { id, force: true }));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_propagates_other_runtime_failures() {
        let h = harness();
        h.runtime.fail_remove("daemon is busy");

        let err = h.manager.delete("abc").await.unwrap_err();

        assert!(matches!(err, AgentError::Runtime(RuntimeError::Failure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn get_status_maps_state_and_refreshes_the_heartbeat() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();
        let registered_at = h.manager.heartbeats().last_seen(&id).unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(h.manager.get_status(&id).await.unwrap(), "running");
        assert!(h.manager.heartbeats().last_seen(&id).unwrap() > registered_at);

        h.runtime.set_state(
            &id,
            ContainerState {
                paused: true,
                running: true,
                ..Default::default()
            },
        );
        assert_eq!(h.manager.get_status(&id).await.unwrap(), "pause");
    }

    #[tokio::test(start_paused = true)]
    async fn get_status_of_a_missing_container_is_error() {
        let h = harness();

        assert_eq!(h.manager.get_status("missing").await.unwrap(), "error");
        assert!(!h.manager.heartbeats().contains("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_the_container_tracked() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();

        h.manager.stop(&id).await.unwrap();

        assert!(h.manager.heartbeats().contains(&id));
        assert_eq!(h.manager.get_status(&id).await.unwrap(), "exited");
    }

    #[tokio::test(start_paused = true)]
    async fn queried_containers_are_never_reaped() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();

        for _ in 0..6 {
            run_for(Duration::from_secs(50)).await;
            h.manager.get_status(&id).await.unwrap();
        }

        assert!(h.manager.heartbeats().contains(&id));
        assert!(h.runtime.contains(&id));
        assert_eq!(h.runtime.removals(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_containers_are_reaped_within_one_poll_interval() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();

        run_for(Duration::from_secs(60)).await;
        assert!(h.manager.heartbeats().contains(&id));
        assert!(h.runtime.contains(&id));

        run_for(Duration::from_secs(5)).await;
        assert!(!h.manager.heartbeats().contains(&id));
        assert!(!h.runtime.contains(&id));
        assert_eq!(h.runtime.removals(&id), 1);

        h.tasks.close();
        h.tasks.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_after_an_explicit_delete_is_a_no_op() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();

        h.manager.delete(&id).await.unwrap();
        assert!(h.manager.heartbeats().contains(&id));

        run_for(Duration::from_secs(70)).await;

        // The monitor's own removal hits "not found" and still clears the entry.
        assert_eq!(h.runtime.removals(&id), 2);
        assert!(!h.manager.heartbeats().contains(&id));
        assert!(h.tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_expiry_delete_still_stops_tracking() {
        let h = harness();
        let id = h.manager.create(&h.request()).await.unwrap();
        h.runtime.fail_remove("daemon is busy");

        run_for(Duration::from_secs(70)).await;

        assert_eq!(h.runtime.removals(&id), 1);
        assert!(h.runtime.contains(&id));
        assert!(!h.manager.heartbeats().contains(&id));
        assert!(h.tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_outcome_tells_failed_deletes_apart() {
        let h = harness();
        let gone = h.manager.create(&h.request()).await.unwrap();
        let stuck = h.manager.create(&h.request()).await.unwrap();

        assert_eq!(h.manager.expire(&gone).await, "deleted");
        assert!(!h.runtime.contains(&gone));

        h.runtime.fail_remove("daemon is busy");
        assert_eq!(h.manager.expire(&stuck).await, "failed");
        assert!(h.runtime.contains(&stuck));
        assert!(!h.manager.heartbeats().contains(&stuck));
    }
}
