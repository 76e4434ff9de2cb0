use std::path::PathBuf;
use std::time::Duration;

use envconfig::Envconfig;

use crate::images::ImageLoadSettings;
use crate::lifecycle::LifecycleSettings;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "9527")]
    pub port: u16,

    #[envconfig(default = "/var/run/docker.sock")]
    pub docker_socket: String,

    // Bounds every call to the daemon, so a hung daemon cannot block a request forever.
    #[envconfig(default = "300")]
    pub docker_timeout_secs: u64,

    #[envconfig(default = "60")]
    pub heartbeat_timeout_secs: u64,

    #[envconfig(default = "5")]
    pub heartbeat_poll_interval_secs: u64,

    #[envconfig(default = "60")]
    pub image_grace_period_secs: u64,

    // Wrapper script copied into the workspace of containers created with a command. The
    // built-in script is used when unset.
    pub command_template: Option<String>,

    #[envconfig(default = "5000000")]
    pub max_body_size: usize,

    #[envconfig(default = "100")]
    pub concurrency_limit: usize,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "false")]
    pub log_json: bool,

    #[envconfig(default = "30")]
    pub shutdown_drain_secs: u64,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            poll_interval: Duration::from_secs(self.heartbeat_poll_interval_secs),
            command_template: self.command_template.as_ref().map(PathBuf::from),
        }
    }

    pub fn image_load_settings(&self) -> ImageLoadSettings {
        ImageLoadSettings {
            grace_period: Duration::from_secs(self.image_grace_period_secs),
        }
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}
