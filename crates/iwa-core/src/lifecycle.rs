//! Container lifecycle manager.
//!
//! Replacement is expressed as a pure plan: [`reconcile`] turns a desired
//! service and the observed container (if any) into an ordered list of
//! [`LifecycleAction`]s, and [`apply`] executes them. The plan always builds
//! before it removes, so a failed rebuild leaves the running container alone.
//!
//! Known limitation: remove-then-run is not atomic. Two invocations racing on
//! the same host can both remove and then one `run` fails with a name
//! conflict. Container names are the only mutual exclusion.

use tracing::{info, warn};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::obs;
use crate::registry::{Registry, ServiceSpec};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, ImageBuild};

/// One step of a replacement plan.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    /// Build the image. Failure aborts the plan.
    Build(ImageBuild),
    /// Force-remove the container with this name.
    Remove { name: String },
    /// Create and start the container.
    Run(ContainerSpec),
}

/// Plan the actions that take `observed` to `desired`.
///
/// A container with the desired name is always replaced, running or not.
pub fn reconcile(desired: &ServiceSpec, observed: Option<&ContainerStatus>) -> Vec<LifecycleAction> {
    let mut actions = Vec::with_capacity(3);
    if let Some(build) = &desired.build {
        actions.push(LifecycleAction::Build(build.clone()));
    }
    if observed.is_some() {
        actions.push(LifecycleAction::Remove {
            name: desired.container.name.clone(),
        });
    }
    actions.push(LifecycleAction::Run(desired.container.clone()));
    actions
}

/// Execute a plan. Returns the handle of the container started by the
/// trailing `Run`, if the plan had one.
pub async fn apply(
    runtime: &dyn ContainerRuntime,
    actions: &[LifecycleAction],
) -> OrchestrationResult<Option<ContainerHandle>> {
    let mut started = None;
    let mut removed_previous = false;

    for action in actions {
        match action {
            LifecycleAction::Build(build) => {
                info!(image = %build.tag, context = %build.context.display(), "building image");
                runtime
                    .build_image(build)
                    .await
                    .map_err(|e| OrchestrationError::provisioning("build image", &build.tag, e))?;
            }
            LifecycleAction::Remove { name } => match runtime.remove_container(name).await {
                Ok(()) => removed_previous = true,
                Err(e) if e.is_not_found() => {
                    warn!(container = %name, "container vanished before removal");
                }
                Err(e) => {
                    return Err(OrchestrationError::provisioning("remove container", name, e))
                }
            },
            LifecycleAction::Run(spec) => {
                let id = runtime
                    .run_container(spec)
                    .await
                    .map_err(|e| OrchestrationError::provisioning("run container", &spec.name, e))?;
                obs::emit_container_replaced(&spec.name, &spec.image, removed_previous);
                started = Some(ContainerHandle {
                    name: spec.name.clone(),
                    id,
                    image: spec.image.clone(),
                });
            }
        }
    }

    Ok(started)
}

/// Replace a single container without building (`run_container(image, name,
/// network, port?, env?)`).
pub async fn run_container(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
) -> OrchestrationResult<ContainerHandle> {
    let service = ServiceSpec::new(spec.name.clone(), spec.clone());
    replace(runtime, &service).await
}

/// Build (if configured) and replace the container of a registered service,
/// recording the new handle in the registry.
pub async fn run_service(
    runtime: &dyn ContainerRuntime,
    registry: &mut Registry,
    service: &str,
) -> OrchestrationResult<ContainerHandle> {
    let spec = registry.resolve(service)?.clone();
    let handle = replace(runtime, &spec).await?;
    registry.record_handle(&spec.name, handle.clone());
    Ok(handle)
}

/// Build the image of a registered service without touching its container.
pub async fn build_service(
    runtime: &dyn ContainerRuntime,
    registry: &Registry,
    service: &str,
) -> OrchestrationResult<()> {
    let spec = registry.resolve(service)?;
    match &spec.build {
        Some(build) => apply(runtime, &[LifecycleAction::Build(build.clone())])
            .await
            .map(|_| ()),
        None => {
            info!(service = %spec.name, "no build configured; skipping");
            Ok(())
        }
    }
}

/// Force-remove every registered container, last registered first.
/// Returns the names that were actually removed.
pub async fn stop_services(
    runtime: &dyn ContainerRuntime,
    registry: &mut Registry,
) -> OrchestrationResult<Vec<String>> {
    let services: Vec<ServiceSpec> = registry.services().cloned().collect();
    let mut removed = Vec::new();
    for spec in services.iter().rev() {
        let name = spec.container_name();
        match runtime.remove_container(name).await {
            Ok(()) => {
                info!(container = %name, "container removed");
                removed.push(name.to_string());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(OrchestrationError::provisioning("remove container", name, e)),
        }
        registry.forget_handle(&spec.name);
    }
    Ok(removed)
}

async fn replace(
    runtime: &dyn ContainerRuntime,
    spec: &ServiceSpec,
) -> OrchestrationResult<ContainerHandle> {
    let observed = runtime
        .inspect_container(spec.container_name())
        .await
        .map_err(|e| OrchestrationError::provisioning("inspect container", spec.container_name(), e))?;
    let plan = reconcile(spec, observed.as_ref());
    apply(runtime, &plan).await?.ok_or_else(|| {
        OrchestrationError::Config(format!("plan for {} started no container", spec.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerState, HealthStatus};

    fn service(build: bool) -> ServiceSpec {
        let spec = ServiceSpec::new("env", ContainerSpec::new("env-c", "env:latest"));
        if build {
            spec.with_build(ImageBuild::new("env:latest", "."))
        } else {
            spec
        }
    }

    fn observed() -> ContainerStatus {
        ContainerStatus {
            name: "env-c".into(),
            id: "old".into(),
            image: "env:latest".into(),
            state: ContainerState::Exited,
            health: HealthStatus::None,
            started_at: None,
        }
    }

    #[test]
    fn test_reconcile_fresh_container_just_runs() {
        let plan = reconcile(&service(false), None);
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0], LifecycleAction::Run(_)));
    }

    #[test]
    fn test_reconcile_replaces_stopped_container() {
        let plan = reconcile(&service(false), Some(&observed()));
        assert_eq!(
            plan[0],
            LifecycleAction::Remove {
                name: "env-c".into()
            }
        );
        assert!(matches!(plan[1], LifecycleAction::Run(_)));
    }

    #[test]
    fn test_reconcile_builds_before_remove() {
        let plan = reconcile(&service(true), Some(&observed()));
        assert!(matches!(plan[0], LifecycleAction::Build(_)));
        assert!(matches!(plan[1], LifecycleAction::Remove { .. }));
        assert!(matches!(plan[2], LifecycleAction::Run(_)));
    }
}
