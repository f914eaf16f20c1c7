//! Sibling services launcher.
//!
//! Brings up the demo web apps next to (not inside) the environment
//! container through the host engine, then attaches the environment
//! container to their network so it can reach them by name. A running
//! marker container means a previous run already launched them.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::runtime::{ComposeProject, ContainerRuntime};

/// Attach `container` to `network` once siblings are up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub network: String,
    pub container: String,
}

/// Declarative sibling launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiblingsSpec {
    pub compose: ComposeProject,
    /// Container whose presence (running) marks the siblings as up.
    pub marker_container: String,
    pub attach: Option<NetworkAttachment>,
}

impl SiblingsSpec {
    pub fn new(compose: ComposeProject, marker_container: impl Into<String>) -> Self {
        Self {
            compose,
            marker_container: marker_container.into(),
            attach: None,
        }
    }

    pub fn with_attachment(mut self, network: impl Into<String>, container: impl Into<String>) -> Self {
        self.attach = Some(NetworkAttachment {
            network: network.into(),
            container: container.into(),
        });
        self
    }
}

/// What `start_siblings` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingsOutcome {
    /// Marker container was running; nothing launched.
    AlreadyRunning,
    /// Compose project brought up.
    Started,
}

/// Launch sibling services unless the marker container is already running.
///
/// The network attachment is (re)applied in both cases because a restarted
/// parent container may have lost it; "already attached" is not an error.
pub async fn start_siblings(
    runtime: &dyn ContainerRuntime,
    spec: &SiblingsSpec,
) -> OrchestrationResult<SiblingsOutcome> {
    let marker = runtime
        .inspect_container(&spec.marker_container)
        .await
        .map_err(|e| OrchestrationError::provisioning("inspect container", &spec.marker_container, e))?;

    let outcome = match marker {
        Some(status) if status.is_running() => {
            info!(
                marker = %spec.marker_container,
                "sibling services already running; skipping launch"
            );
            SiblingsOutcome::AlreadyRunning
        }
        _ => {
            info!(
                project = %spec.compose.project,
                file = %spec.compose.file.display(),
                "launching sibling services"
            );
            runtime
                .compose_up(&spec.compose)
                .await
                .map_err(|e| OrchestrationError::Compose(e.to_string()))?;
            SiblingsOutcome::Started
        }
    };

    if let Some(attach) = &spec.attach {
        match runtime.connect_network(&attach.network, &attach.container).await {
            Ok(()) => info!(
                network = %attach.network,
                container = %attach.container,
                "attached to sibling network"
            ),
            Err(e) if e.is_already_exists() => {}
            Err(e) => {
                return Err(OrchestrationError::provisioning(
                    "connect network",
                    format!("{} -> {}", attach.container, attach.network),
                    e,
                ))
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRuntime;
    use crate::runtime::ContainerState;

    fn spec() -> SiblingsSpec {
        SiblingsSpec::new(
            ComposeProject {
                file: "demo/docker-compose.yml".into(),
                project: "demo".into(),
            },
            "demo-web",
        )
    }

    #[tokio::test]
    async fn test_starts_when_marker_absent() {
        let rt = FakeRuntime::new();
        rt.define_compose_services("demo", &["demo-web", "demo-db"]);
        let outcome = start_siblings(&rt, &spec()).await.unwrap();
        assert_eq!(outcome, SiblingsOutcome::Started);
        assert!(rt.container("demo-db").is_some());
    }

    #[tokio::test]
    async fn test_skips_when_marker_running() {
        let rt = FakeRuntime::new().with_container("demo-web", "img", ContainerState::Running);
        let outcome = start_siblings(&rt, &spec()).await.unwrap();
        assert_eq!(outcome, SiblingsOutcome::AlreadyRunning);
        assert!(rt.compose_ups().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_marker_triggers_launch() {
        let rt = FakeRuntime::new().with_container("demo-web", "img", ContainerState::Exited);
        assert_eq!(
            start_siblings(&rt, &spec()).await.unwrap(),
            SiblingsOutcome::Started
        );
    }

    #[tokio::test]
    async fn test_attachment_is_idempotent() {
        let rt = FakeRuntime::new();
        rt.define_compose_services("demo", &["demo-web"]);
        let spec = spec().with_attachment("demo_default", "env-host");
        assert_eq!(
            start_siblings(&rt, &spec).await.unwrap(),
            SiblingsOutcome::Started
        );
        assert_eq!(
            start_siblings(&rt, &spec).await.unwrap(),
            SiblingsOutcome::AlreadyRunning
        );
        assert_eq!(rt.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_compose_failure_is_fatal() {
        let rt = FakeRuntime::new();
        rt.fail_compose("yaml: line 3: mapping values are not allowed");
        let err = start_siblings(&rt, &spec()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Compose(_)));
    }
}
