use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use lhylink_transport::Transport;
use tracing::{debug, info};

use crate::error::{ControllerError, Result};
use crate::sim::{SimulatedBoard, SimulatedBoardConfig};

/// One candidate in a transport preference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// A board bridge listening on a Unix socket.
    #[cfg(unix)]
    Socket(PathBuf),
    /// The in-process simulator.
    Simulated(SimulatedBoardConfig),
}

impl TransportSpec {
    /// Construct the transport. Fails when the target is not available.
    pub fn build(&self) -> Result<Box<dyn Transport>> {
        match self {
            #[cfg(unix)]
            TransportSpec::Socket(path) => {
                Ok(Box::new(lhylink_transport::SocketTransport::probe(path)?))
            }
            TransportSpec::Simulated(config) => Ok(Box::new(SimulatedBoard::new(config.clone()))),
        }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            TransportSpec::Socket(path) => write!(f, "socket:{}", path.display()),
            TransportSpec::Simulated(_) => f.write_str("sim"),
        }
    }
}

impl FromStr for TransportSpec {
    type Err = String;

    /// Parse `sim` or `socket:<path>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "sim" {
            return Ok(TransportSpec::Simulated(SimulatedBoardConfig::default()));
        }
        #[cfg(unix)]
        if let Some(path) = s.strip_prefix("socket:") {
            if path.is_empty() {
                return Err("socket transport needs a path".to_string());
            }
            return Ok(TransportSpec::Socket(PathBuf::from(path)));
        }
        Err(format!(
            "unknown transport '{s}' (expected 'sim' or 'socket:<path>')"
        ))
    }
}

/// Pick the first transport in `specs` that can be constructed.
pub fn select_transport(specs: &[TransportSpec]) -> Result<Box<dyn Transport>> {
    let mut failures = Vec::new();
    for spec in specs {
        match spec.build() {
            Ok(transport) => {
                info!(%spec, name = transport.transport_name(), "selected transport");
                return Ok(transport);
            }
            Err(err) => {
                debug!(%spec, error = %err, "transport unavailable");
                failures.push(format!("{spec}: {err}"));
            }
        }
    }
    Err(ControllerError::NoTransport(failures))
}
