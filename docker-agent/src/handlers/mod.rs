mod app;
mod dockers;

pub use app::add_routes;
pub use dockers::{Envelope, FreePorts, IdData, StatusData};

use crate::images::ImageLoadTracker;
use crate::lifecycle::LifecycleManager;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AgentState {
    pub lifecycle: LifecycleManager,
    pub images: ImageLoadTracker,
}
