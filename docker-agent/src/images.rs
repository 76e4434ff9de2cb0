use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::AgentError;
use crate::runtime::ContainerRuntime;

#[derive(Clone, Debug)]
pub struct ImageLoadSettings {
    /// How long a finished job stays queryable.
    pub grace_period: Duration,
}

impl Default for ImageLoadSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(60),
        }
    }
}

/// Status of an image-load job as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageLoadStatus {
    Loading,
    /// The image was loaded successfully.
    Deploy,
    Error,
    /// Never submitted, or finished more than a grace period ago.
    Unknown,
}

impl ImageLoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageLoadStatus::Loading => "loading",
            ImageLoadStatus::Deploy => "deploy",
            ImageLoadStatus::Error => "error",
            ImageLoadStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ImageLoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks image archives being loaded into the runtime in the background.
///
/// A job moves from `loading` to `deploy` or `error` exactly once, stays queryable for the
/// grace period after that, and is then forgotten.
#[derive(Clone)]
pub struct ImageLoadTracker {
    runtime: Arc<dyn ContainerRuntime>,
    jobs: Arc<Mutex<HashMap<String, ImageLoadStatus>>>,
    tasks: TaskTracker,
    settings: ImageLoadSettings,
}

impl ImageLoadTracker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tasks: TaskTracker,
        settings: ImageLoadSettings,
    ) -> Self {
        Self {
            runtime,
            jobs: Default::default(),
            tasks,
            settings,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, ImageLoadStatus>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept the archive at `path` for loading and return the id of the new job.
    pub fn submit(&self, path: &str) -> Result<String, AgentError> {
        if path.is_empty() || !Path::new(path).is_file() {
            return Err(AgentError::invalid_parameter(format!(
                "parameter image_path: '{}' does not exist",
                path
            )));
        }

        let job_id = Uuid::now_v7().to_string();
        self.jobs()
            .insert(job_id.clone(), ImageLoadStatus::Loading);

        debug!(job_id = %job_id, path = %path, "starting image load");
        self.tasks
            .spawn(self.clone().load(job_id.clone(), PathBuf::from(path)));

        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> ImageLoadStatus {
        match self.jobs().get(job_id) {
            Some(status) => *status,
            None => {
                debug!(job_id = %job_id, "unknown image load job");
                ImageLoadStatus::Unknown
            }
        }
    }

    async fn load(self, job_id: String, path: PathBuf) {
        let result = match tokio::fs::read(&path).await {
            Ok(archive) => self
                .runtime
                .load_image(archive)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(format!("failed to read image archive: {}", e)),
        };

        let status = match result {
            Ok(()) => {
                info!(job_id = %job_id, path = %path.display(), "image loaded");
                ImageLoadStatus::Deploy
            }
            Err(e) => {
                error!(job_id = %job_id, path = %path.display(), "load image failed: {}", e);
                ImageLoadStatus::Error
            }
        };
        metrics::counter!("docker_agent_image_loads_total", "outcome" => status.as_str())
            .increment(1);
        self.jobs().insert(job_id.clone(), status);

        // Leave the outcome around long enough for the caller to poll it.
        tokio::time::sleep(self.settings.grace_period).await;
        self.jobs().remove(&job_id);
    }
}
