//! Docker CLI backend.
//!
//! Shells out to the engine CLI (`docker` unless `IWA_CONTAINER_RUNTIME`
//! names another compatible binary) and classifies its stderr into
//! [`RuntimeError`] kinds. When running inside a container with the host
//! socket mounted this drives sibling containers (DOOD).

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{
    ComposeProject, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus,
    HealthStatus, ImageBuild, RuntimeError, RuntimeResult,
};

/// Environment variable naming the container CLI binary.
pub const RUNTIME_ENV_VAR: &str = "IWA_CONTAINER_RUNTIME";

/// Container runtime backed by the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Use `IWA_CONTAINER_RUNTIME` when set and non-empty, else `docker`.
    pub fn from_env() -> Self {
        match std::env::var(RUNTIME_ENV_VAR) {
            Ok(val) if !val.trim().is_empty() => Self::new(val.trim()),
            _ => Self::default(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn exec(&self, args: &[String]) -> RuntimeResult<CommandOutput> {
        debug!(binary = %self.binary, args = ?args, "running container command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn exec_checked(&self, args: &[String]) -> RuntimeResult<CommandOutput> {
        let output = self.exec(args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(classify_failure(
                &command_line(&self.binary, args),
                output.code,
                &output.stderr,
            ))
        }
    }
}

struct CommandOutput {
    code: Option<i32>,
    success: bool,
    stdout: String,
    stderr: String,
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        let args = to_args(&["network", "ls", "--filter", &format!("name=^{name}$"), "--format", "{{.Name}}"]);
        let output = self.exec_checked(&args).await?;
        // The filter is a regex match, so compare names exactly.
        Ok(output.stdout.lines().any(|line| line.trim() == name))
    }

    async fn create_network(&self, name: &str) -> RuntimeResult<()> {
        self.exec_checked(&to_args(&["network", "create", name]))
            .await
            .map(|_| ())
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.exec_checked(&to_args(&["network", "rm", name]))
            .await
            .map(|_| ())
    }

    async fn connect_network(&self, network: &str, container: &str) -> RuntimeResult<()> {
        self.exec_checked(&to_args(&["network", "connect", network, container]))
            .await
            .map(|_| ())
    }

    async fn build_image(&self, build: &ImageBuild) -> RuntimeResult<()> {
        self.exec_checked(&build_args(build)).await.map(|_| ())
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<Option<ContainerStatus>> {
        match self
            .exec_checked(&to_args(&["container", "inspect", name]))
            .await
        {
            Ok(output) => parse_inspect(name, &output.stdout).map(Some),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        self.exec_checked(&to_args(&["rm", "-f", name]))
            .await
            .map(|_| ())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let output = self.exec_checked(&run_args(spec)).await?;
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Parse(format!(
                "no container id printed for {}",
                spec.name
            )));
        }
        Ok(id)
    }

    async fn logs(&self, name: &str, tail: usize) -> RuntimeResult<String> {
        let output = self
            .exec_checked(&to_args(&["logs", "--tail", &tail.to_string(), name]))
            .await?;
        // Container stderr arrives on our stderr; keep both streams.
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn compose_up(&self, project: &ComposeProject) -> RuntimeResult<()> {
        self.exec_checked(&compose_up_args(project)).await.map(|_| ())
    }
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn command_line(binary: &str, args: &[String]) -> String {
    let mut line = binary.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Arguments for `docker run -d` from a [`ContainerSpec`].
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = to_args(&["run", "-d", "--name", &spec.name]);
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    if let Some(port) = spec.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    args.push(spec.image.clone());
    args
}

/// Arguments for `docker build` from an [`ImageBuild`].
pub fn build_args(build: &ImageBuild) -> Vec<String> {
    let mut args = to_args(&["build", "-t", &build.tag]);
    if let Some(dockerfile) = &build.dockerfile {
        args.push("-f".to_string());
        args.push(dockerfile.to_string_lossy().to_string());
    }
    args.push(build.context.to_string_lossy().to_string());
    args
}

/// Arguments for `docker compose ... up -d`.
pub fn compose_up_args(project: &ComposeProject) -> Vec<String> {
    vec![
        "compose".to_string(),
        "-f".to_string(),
        project.file.to_string_lossy().to_string(),
        "-p".to_string(),
        project.project.clone(),
        "up".to_string(),
        "-d".to_string(),
    ]
}

/// Map a failed CLI invocation to a [`RuntimeError`] kind.
pub fn classify_failure(command: &str, code: Option<i32>, stderr: &str) -> RuntimeError {
    let lower = stderr.to_ascii_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("already exists") || lower.contains("is already in use") {
        RuntimeError::AlreadyExists(message)
    } else if lower.contains("no such") || lower.contains("not found") {
        RuntimeError::NotFound(message)
    } else {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            code,
            stderr: message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    config: InspectConfig,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

/// Parse `docker container inspect` output for a single container.
pub fn parse_inspect(name: &str, stdout: &str) -> RuntimeResult<ContainerStatus> {
    let entries: Vec<InspectEntry> = serde_json::from_str(stdout)
        .map_err(|e| RuntimeError::Parse(format!("inspect {name}: {e}")))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;

    let started_at = entry
        .state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(ContainerStatus {
        name: name.to_string(),
        id: entry.id,
        image: entry.config.image,
        state: ContainerState::parse(&entry.state.status),
        health: entry
            .state
            .health
            .map(|h| HealthStatus::parse(&h.status))
            .unwrap_or(HealthStatus::None),
        started_at,
    })
}
