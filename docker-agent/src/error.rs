use thiserror::Error;

use crate::runtime::RuntimeError;

/// Errors surfaced to callers of the lifecycle, image and port operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Caller input failed a precondition. Raised before any side effect.
    #[error("the parameter is invalid, reason: {reason}")]
    InvalidParameter { reason: String },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("failed to install the command wrapper into the workspace: {0}")]
    CommandTemplate(#[source] std::io::Error),
    #[error("failed to allocate free ports: {0}")]
    PortAllocation(#[source] std::io::Error),
}

impl AgentError {
    /// Build an `InvalidParameter` error, logging the reason as it is raised.
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::error!("{}", reason);
        AgentError::InvalidParameter { reason }
    }
}
