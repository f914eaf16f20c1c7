//! Local TCP port forwarding to sibling containers.
//!
//! Each [`PortForward`] runs as its own background task that accepts on a
//! local port and pipes bytes both ways to `target_host:target_port`.
//! [`ForwardSet::launch`] starts all of them, waits a settle delay and fails
//! if any relay already died (typically the local port was taken): code in
//! this process addresses siblings as `localhost:<port>` and must not start
//! serving with a hole in that map.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::obs;
use crate::readiness::Clock;

/// Default settle delay before forwards are checked.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// `local_port` → `target_host:target_port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortForward {
    pub local_port: u16,
    pub target_host: String,
    pub target_port: u16,
}

impl PortForward {
    pub fn new(local_port: u16, target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            local_port,
            target_host: target_host.into(),
            target_port,
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

impl fmt::Display for PortForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.local_port, self.target_host, self.target_port)
    }
}

impl FromStr for PortForward {
    type Err = OrchestrationError;

    /// Parse `LOCAL:HOST:PORT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OrchestrationError::Config(format!("invalid forward {s:?}, expected LOCAL:HOST:PORT"));
        let mut parts = s.splitn(3, ':');
        let local = parts.next().ok_or_else(invalid)?;
        let host = parts.next().ok_or_else(invalid)?;
        let port = parts.next().ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(PortForward {
            local_port: local.parse().map_err(|_| invalid())?,
            target_host: host.to_string(),
            target_port: port.parse().map_err(|_| invalid())?,
        })
    }
}

/// A running relay.
#[derive(Debug)]
pub struct ForwardHandle {
    spec: PortForward,
    task: JoinHandle<std::io::Result<()>>,
}

impl ForwardHandle {
    pub fn spec(&self) -> &PortForward {
        &self.spec
    }

    /// Whether the relay task is still running.
    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Why a finished relay stopped.
    async fn failure_reason(self) -> String {
        match self.task.await {
            Ok(Ok(())) => "relay exited".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("relay task failed: {e}"),
        }
    }
}

/// Start a background relay for `spec`, listening on `bind:local_port`.
pub fn forward(spec: PortForward, bind: IpAddr) -> ForwardHandle {
    let task = tokio::spawn(relay(spec.clone(), bind));
    ForwardHandle { spec, task }
}

async fn relay(spec: PortForward, bind: IpAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind((bind, spec.local_port)).await?;
    obs::emit_forward_started(spec.local_port, &spec.target());
    loop {
        match listener.accept().await {
            Ok((inbound, peer)) => {
                debug!(local_port = spec.local_port, peer = %peer, "forward accepted connection");
                tokio::spawn(pipe(inbound, spec.target_host.clone(), spec.target_port));
            }
            Err(e) => {
                warn!(local_port = spec.local_port, error = %e, "forward accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn pipe(mut inbound: TcpStream, host: String, port: u16) {
    let mut outbound = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(target_host = %host, target_port = port, error = %e, "forward target unreachable");
            return;
        }
    };
    match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
        Ok((up, down)) => debug!(target_host = %host, target_port = port, up, down, "forward connection closed"),
        Err(e) => debug!(target_host = %host, target_port = port, error = %e, "forward connection reset"),
    }
}

/// All relays of one process, verified once at startup.
#[derive(Debug, Default)]
pub struct ForwardSet {
    handles: Vec<ForwardHandle>,
}

impl ForwardSet {
    /// Launch every forward, wait `settle`, then require all to be alive.
    ///
    /// On failure every relay of this set is aborted and the first dead one
    /// is reported as [`OrchestrationError::ForwardStartup`].
    pub async fn launch(
        forwards: &[PortForward],
        bind: IpAddr,
        settle: Duration,
        clock: &dyn Clock,
    ) -> OrchestrationResult<Self> {
        let mut seen = BTreeSet::new();
        for fwd in forwards {
            if !seen.insert(fwd.local_port) {
                return Err(OrchestrationError::Config(format!(
                    "local port {} forwarded more than once",
                    fwd.local_port
                )));
            }
        }

        if forwards.is_empty() {
            return Ok(Self::default());
        }

        let mut handles: Vec<ForwardHandle> =
            forwards.iter().map(|f| forward(f.clone(), bind)).collect();
        clock.sleep(settle).await;

        let Some(idx) = handles.iter().position(|h| !h.is_alive()) else {
            return Ok(Self { handles });
        };
        let dead = handles.swap_remove(idx);
        for handle in &handles {
            handle.abort();
        }
        let spec = dead.spec().clone();
        let reason = dead.failure_reason().await;
        Err(OrchestrationError::ForwardStartup {
            local_port: spec.local_port,
            target: spec.target(),
            reason,
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn all_alive(&self) -> bool {
        self.handles.iter().all(ForwardHandle::is_alive)
    }

    pub fn specs(&self) -> impl Iterator<Item = &PortForward> {
        self.handles.iter().map(ForwardHandle::spec)
    }

    /// Stop every relay.
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
