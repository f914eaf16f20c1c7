//! Explicit service registry.
//!
//! Maps logical service names (`env`, `model`, …) to their container
//! definitions and, once started, to live handles. Provisioning calls take
//! the registry as an argument instead of reading ambient naming state.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::readiness::ReadinessTarget;
use crate::runtime::{ContainerHandle, ContainerSpec, ImageBuild};

/// Everything needed to build, start and wait for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Logical name used by the CLI (`env`, `model`).
    pub name: String,
    pub container: ContainerSpec,
    /// Image build to run before (re)creating the container.
    pub build: Option<ImageBuild>,
    /// Readiness signal checked after start.
    pub readiness: Option<ReadinessTarget>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, container: ContainerSpec) -> Self {
        Self {
            name: name.into(),
            container,
            build: None,
            readiness: None,
        }
    }

    pub fn with_build(mut self, build: ImageBuild) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_readiness(mut self, target: ReadinessTarget) -> Self {
        self.readiness = Some(target);
        self
    }

    pub fn container_name(&self) -> &str {
        &self.container.name
    }
}

/// Ordered set of services sharing one network.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    network: String,
    services: Vec<ServiceSpec>,
    handles: Vec<(String, ContainerHandle)>,
}

impl Registry {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            services: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Add a service. Its container joins the registry network unless it
    /// names another one. Logical and container names must both be unique.
    pub fn register(&mut self, mut spec: ServiceSpec) -> OrchestrationResult<()> {
        if self.get(&spec.name).is_some() {
            return Err(OrchestrationError::Config(format!(
                "service {} registered twice",
                spec.name
            )));
        }
        if self
            .services
            .iter()
            .any(|s| s.container.name == spec.container.name)
        {
            return Err(OrchestrationError::Config(format!(
                "container name {} already used by another service",
                spec.container.name
            )));
        }
        if spec.container.network.is_none() {
            spec.container.network = Some(self.network.clone());
        }
        self.services.push(spec);
        Ok(())
    }

    /// Builder form of [`Registry::register`].
    pub fn with_service(mut self, spec: ServiceSpec) -> OrchestrationResult<Self> {
        self.register(spec)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Look up by logical name, falling back to container name.
    pub fn resolve(&self, name: &str) -> OrchestrationResult<&ServiceSpec> {
        self.get(name)
            .or_else(|| self.services.iter().find(|s| s.container.name == name))
            .ok_or_else(|| OrchestrationError::Config(format!("unknown service {name}")))
    }

    /// Services in registration order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.container.name.clone()).collect()
    }

    pub fn record_handle(&mut self, service: &str, handle: ContainerHandle) {
        self.handles.retain(|(name, _)| name != service);
        self.handles.push((service.to_string(), handle));
    }

    pub fn handle(&self, service: &str) -> Option<&ContainerHandle> {
        self.handles
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, handle)| handle)
    }

    pub fn forget_handle(&mut self, service: &str) {
        self.handles.retain(|(name, _)| name != service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, container: &str) -> ServiceSpec {
        ServiceSpec::new(name, ContainerSpec::new(container, format!("{container}:latest")))
    }

    #[test]
    fn test_register_assigns_network() {
        let reg = Registry::new("iwa-net")
            .with_service(spec("env", "autoppia-affine-env"))
            .unwrap();
        let env = reg.get("env").unwrap();
        assert_eq!(env.container.network.as_deref(), Some("iwa-net"));
    }

    #[test]
    fn test_register_rejects_duplicate_container_name() {
        let mut reg = Registry::new("iwa-net");
        reg.register(spec("env", "shared")).unwrap();
        let err = reg.register(spec("model", "shared")).unwrap_err();
        assert!(err.to_string().contains("shared"));
    }

    #[test]
    fn test_resolve_by_container_name() {
        let reg = Registry::new("iwa-net")
            .with_service(spec("model", "autoppia-affine-model"))
            .unwrap();
        assert_eq!(reg.resolve("autoppia-affine-model").unwrap().name, "model");
        assert!(reg.resolve("nope").is_err());
    }

    #[test]
    fn test_record_handle_replaces_previous() {
        let mut reg = Registry::new("n");
        let h = |id: &str| ContainerHandle {
            name: "c".into(),
            id: id.into(),
            image: "i".into(),
        };
        reg.record_handle("env", h("1"));
        reg.record_handle("env", h("2"));
        assert_eq!(reg.handle("env").unwrap().id, "2");
    }
}
