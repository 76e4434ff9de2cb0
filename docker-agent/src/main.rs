//! Serve container lifecycle requests against the local Docker daemon.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use agent_common::graceful_shutdown;
use agent_common::metrics::{add_metrics_route, serve, setup_metrics_recorder};
use docker_agent::config::Config;
use docker_agent::handlers::{add_routes, AgentState};
use docker_agent::heartbeat::HeartbeatRegistry;
use docker_agent::images::ImageLoadTracker;
use docker_agent::lifecycle::LifecycleManager;
use docker_agent::runtime::{ContainerRuntime, DockerRuntime};

fn init_tracing(json: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_layer = if json {
        fmt::layer().json().with_filter(filter()).boxed()
    } else {
        fmt::layer().with_target(true).with_filter(filter()).boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().wrap_err("invalid configuration")?;
    init_tracing(config.log_json);

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(
        &config.docker_socket,
        config.docker_timeout_secs,
    ));
    let tasks = TaskTracker::new();

    let state = AgentState {
        lifecycle: LifecycleManager::new(
            runtime.clone(),
            HeartbeatRegistry::new(),
            tasks.clone(),
            config.lifecycle_settings(),
        ),
        images: ImageLoadTracker::new(runtime, tasks.clone(), config.image_load_settings()),
    };

    let app = add_routes(
        Router::new(),
        state,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = if config.export_prometheus {
        let recorder_handle =
            setup_metrics_recorder().wrap_err("failed to install metrics recorder")?;
        add_metrics_route(app, recorder_handle)
    } else {
        app
    };

    info!(socket = %config.docker_socket, "starting docker agent");
    serve(app, &config.bind(), graceful_shutdown())
        .await
        .wrap_err("failed to serve docker agent")?;

    // Monitors only end on heartbeat expiry, so draining is bounded rather than awaited in full.
    tasks.close();
    if tokio::time::timeout(config.shutdown_drain(), tasks.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = tasks.len(),
            "background tasks still running at shutdown"
        );
    }

    info!("docker agent stopped");
    Ok(())
}
