//! Plumbing shared by the agent services: Prometheus metrics and process shutdown.

pub mod metrics;
pub mod shutdown;

pub use shutdown::graceful_shutdown;
