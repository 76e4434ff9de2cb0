//! Single-node agent driving container lifecycle requests against a local Docker daemon.
//!
//! Containers created through the agent are kept alive only while somebody keeps asking
//! for their status; image archives are loaded in the background and their outcome is
//! kept around for a grace period.

pub mod config;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod images;
pub mod lifecycle;
pub mod options;
pub mod ports;
pub mod runtime;
pub mod status;
