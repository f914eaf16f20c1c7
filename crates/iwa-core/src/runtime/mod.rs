//! Container runtime abstraction.
//!
//! [`ContainerRuntime`] is the only seam through which orchestration code
//! touches the container engine. [`docker::DockerCli`] drives a real engine
//! through its CLI; [`crate::fakes::FakeRuntime`] keeps everything in memory
//! for tests.

pub mod docker;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors reported by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The object being created is already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The object being inspected or removed is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine rejected the command.
    #[error("`{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected runtime output: {0}")]
    Parse(String),
}

impl RuntimeError {
    /// Whether this error only says the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RuntimeError::AlreadyExists(_))
    }

    /// Whether this error only says the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// A single published host port → container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Desired configuration of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Unique container name on the host.
    pub name: String,
    /// Image reference to start from.
    pub image: String,
    /// Network to attach to at creation.
    pub network: Option<String>,
    /// At most one published port.
    pub port: Option<PortMapping>,
    /// Environment variables injected into the container.
    pub env: BTreeMap<String, String>,
    /// Bind mounts in `source:target[:mode]` form.
    pub volumes: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            network: None,
            port: None,
            env: BTreeMap::new(),
            volumes: Vec::new(),
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }
}

/// An image build request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuild {
    /// Tag to apply to the built image.
    pub tag: String,
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile path; `None` uses `<context>/Dockerfile`.
    pub dockerfile: Option<PathBuf>,
}

impl ImageBuild {
    pub fn new(tag: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            context: context.into(),
            dockerfile: None,
        }
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(dockerfile.into());
        self
    }
}

/// A declarative multi-service definition handed to the engine's compose tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeProject {
    pub file: PathBuf,
    pub project: String,
}

/// Lifecycle state reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    #[serde(other)]
    Unknown,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health-check status reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    /// The container defines no health check.
    None,
}

impl HealthStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "starting" => HealthStatus::Starting,
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::None,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::None => "none",
        };
        f.write_str(s)
    }
}

/// Observed state of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub id: String,
    pub image: String,
    pub state: ContainerState,
    pub health: HealthStatus,
    pub started_at: Option<DateTime<Utc>>,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Handle to a container started by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub name: String,
    pub id: String,
    pub image: String,
}

/// Container engine operations used by the orchestration layer.
///
/// Implementations must map "object already exists" to
/// [`RuntimeError::AlreadyExists`] and "object absent" to
/// [`RuntimeError::NotFound`]; callers rely on that to stay idempotent.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether a network with exactly this name exists.
    async fn network_exists(&self, name: &str) -> RuntimeResult<bool>;

    /// Create a network.
    async fn create_network(&self, name: &str) -> RuntimeResult<()>;

    /// Remove a network.
    async fn remove_network(&self, name: &str) -> RuntimeResult<()>;

    /// Attach an existing container to a network.
    async fn connect_network(&self, network: &str, container: &str) -> RuntimeResult<()>;

    /// Build an image.
    async fn build_image(&self, build: &ImageBuild) -> RuntimeResult<()>;

    /// Inspect a container by name, running or stopped. `None` if absent.
    async fn inspect_container(&self, name: &str) -> RuntimeResult<Option<ContainerStatus>>;

    /// Force-remove a container by name.
    async fn remove_container(&self, name: &str) -> RuntimeResult<()>;

    /// Create and start a container, returning its id.
    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Last `tail` lines of a container's combined output.
    async fn logs(&self, name: &str, tail: usize) -> RuntimeResult<String>;

    /// Bring up every service of a compose project in the background.
    async fn compose_up(&self, project: &ComposeProject) -> RuntimeResult<()>;

    /// Health-check status of a container.
    async fn container_health(&self, name: &str) -> RuntimeResult<HealthStatus> {
        match self.inspect_container(name).await? {
            Some(status) => Ok(status.health),
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }
}
