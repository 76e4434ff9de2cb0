use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, TcpListener, UdpSocket};

use crate::error::AgentError;

// Upper bound on OS round trips per requested port before giving up.
const ATTEMPTS_PER_PORT: usize = 16;

/// Ask the OS for a port that is currently free for both TCP and UDP.
///
/// Returns `Ok(None)` when the TCP port handed out is taken for UDP.
fn pick_unused_port() -> io::Result<Option<u16>> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    let port = listener.local_addr()?.port();

    match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(_) => Ok(Some(port)),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(None),
        Err(e) => Err(e),
    }
}

/// Collect `num` distinct ports that are unused right now.
///
/// Nothing is reserved: another process may take any of them as soon as this returns.
/// A non-positive `num` yields an empty list.
pub fn allocate(num: i64) -> Result<Vec<u16>, AgentError> {
    let Ok(num) = usize::try_from(num) else {
        return Ok(Vec::new());
    };
    if num > usize::from(u16::MAX) {
        return Err(AgentError::PortAllocation(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot allocate {} ports", num),
        )));
    }

    let mut seen = HashSet::with_capacity(num);
    let mut ports = Vec::with_capacity(num);
    let mut attempts = 0;

    while ports.len() < num {
        if attempts == num.saturating_mul(ATTEMPTS_PER_PORT) {
            return Err(AgentError::PortAllocation(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("found {} of {} free ports", ports.len(), num),
            )));
        }
        attempts += 1;

        if let Some(port) = pick_unused_port().map_err(AgentError::PortAllocation)? {
            if seen.insert(port) {
                ports.push(port);
            }
        }
    }

    Ok(ports)
}
