use crate::runtime::ContainerState;

pub const ERROR: &str = "error";
pub const UNKNOWN: &str = "unknown";

/// Collapse the daemon's state flags into a single status string.
///
/// The first matching flag wins, in order: error, pause, running, creating, stopped, dead,
/// restarting. Without any flag the raw status string is used, and `unknown` when there is
/// neither a flag nor a status.
pub fn container_status(state: Option<&ContainerState>) -> String {
    let Some(state) = state else {
        return UNKNOWN.to_owned();
    };

    let flags = [
        (state.error, ERROR),
        (state.paused, "pause"),
        (state.running, "running"),
        (state.creating, "creating"),
        (state.stopped, "stopped"),
        (state.dead, "dead"),
        (state.restarting, "restarting"),
    ];

    if let Some((_, status)) = flags.iter().find(|(set, _)| *set) {
        return (*status).to_owned();
    }

    match state.status.as_deref() {
        Some(status) if !status.is_empty() => status.to_owned(),
        _ => UNKNOWN.to_owned(),
    }
}
