//! In-memory fakes for the runtime and clock traits (testing only)
//!
//! `FakeRuntime` models networks, images and named containers in a
//! `Mutex`-guarded map and records every mutating call, so tests can assert
//! both end state and call ordering. `ManualClock` records requested sleeps
//! and returns immediately.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::readiness::Clock;
use crate::runtime::*;

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeContainer {
    status: ContainerStatus,
    spec: Option<ContainerSpec>,
    logs: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    networks: BTreeSet<String>,
    images: BTreeSet<String>,
    containers: BTreeMap<String, FakeContainer>,
    connections: Vec<(String, String)>,
    compose_ups: Vec<ComposeProject>,
    compose_services: HashMap<String, Vec<String>>,
    health_scripts: HashMap<String, VecDeque<HealthStatus>>,
    failing_builds: BTreeSet<String>,
    racing_removals: BTreeSet<String>,
    network_race: bool,
    compose_failure: Option<String>,
    calls: Vec<String>,
    next_id: u64,
}

impl FakeState {
    fn insert_container(&mut self, name: &str, image: &str, spec: Option<ContainerSpec>) -> String {
        self.next_id += 1;
        let id = format!("fake-{:04}", self.next_id);
        self.containers.insert(
            name.to_string(),
            FakeContainer {
                status: ContainerStatus {
                    name: name.to_string(),
                    id: id.clone(),
                    image: image.to_string(),
                    state: ContainerState::Running,
                    health: HealthStatus::Starting,
                    started_at: Some(chrono::Utc::now()),
                },
                spec,
                logs: Vec::new(),
            },
        );
        id
    }
}

/// In-memory container runtime.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing network.
    pub fn with_network(self, name: &str) -> Self {
        self.state.lock().unwrap().networks.insert(name.to_string());
        self
    }

    /// Seed an existing container in the given state.
    pub fn with_container(self, name: &str, image: &str, state: ContainerState) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            s.insert_container(name, image, None);
            if let Some(c) = s.containers.get_mut(name) {
                c.status.state = state;
            }
        }
        self
    }

    /// Make every build of `tag` fail.
    pub fn fail_build(&self, tag: &str) {
        self.state.lock().unwrap().failing_builds.insert(tag.to_string());
    }

    /// Make `compose_up` fail with the given stderr.
    pub fn fail_compose(&self, stderr: &str) {
        self.state.lock().unwrap().compose_failure = Some(stderr.to_string());
    }

    /// Simulate another process removing `name` between inspect and remove.
    pub fn race_removal(&self, name: &str) {
        self.state.lock().unwrap().racing_removals.insert(name.to_string());
    }

    /// Simulate another process creating the network between check and create.
    pub fn race_network_creation(&self) {
        self.state.lock().unwrap().network_race = true;
    }

    /// Containers `compose_up` creates for a project.
    pub fn define_compose_services(&self, project: &str, services: &[&str]) {
        self.state.lock().unwrap().compose_services.insert(
            project.to_string(),
            services.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Queue health statuses returned by successive `container_health` calls.
    /// The last queued status repeats once the queue drains.
    pub fn script_health(&self, name: &str, statuses: &[HealthStatus]) {
        self.state
            .lock()
            .unwrap()
            .health_scripts
            .insert(name.to_string(), statuses.iter().copied().collect());
    }

    /// Append log lines to a container.
    pub fn push_logs(&self, name: &str, lines: &[&str]) {
        let mut s = self.state.lock().unwrap();
        if let Some(c) = s.containers.get_mut(name) {
            c.logs.extend(lines.iter().map(|l| l.to_string()));
        }
    }

    /// Change the state of a seeded container.
    pub fn set_state(&self, name: &str, state: ContainerState) {
        let mut s = self.state.lock().unwrap();
        if let Some(c) = s.containers.get_mut(name) {
            c.status.state = state;
        }
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state.lock().unwrap().networks.contains(name)
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.state.lock().unwrap().images.contains(tag)
    }

    pub fn container(&self, name: &str) -> Option<ContainerStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.status.clone())
    }

    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    /// Number of containers currently registered under `name` (0 or 1).
    pub fn count_named(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .containers
            .keys()
            .filter(|k| k.as_str() == name)
            .count()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().connections.clone()
    }

    pub fn compose_ups(&self) -> Vec<ComposeProject> {
        self.state.lock().unwrap().compose_ups.clone()
    }

    /// Mutating calls in the order they happened, e.g. `"rm env"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.state.lock().unwrap().networks.contains(name))
    }

    async fn create_network(&self, name: &str) -> RuntimeResult<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("network create {name}"));
        if s.network_race {
            s.network_race = false;
            s.networks.insert(name.to_string());
            return Err(RuntimeError::AlreadyExists(format!("network {name}")));
        }
        if !s.networks.insert(name.to_string()) {
            return Err(RuntimeError::AlreadyExists(format!("network {name}")));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("network rm {name}"));
        if s.networks.remove(name) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(format!("network {name}")))
        }
    }

    async fn connect_network(&self, network: &str, container: &str) -> RuntimeResult<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("network connect {network} {container}"));
        if !s.networks.contains(network) {
            return Err(RuntimeError::NotFound(format!("network {network}")));
        }
        let pair = (network.to_string(), container.to_string());
        if s.connections.contains(&pair) {
            return Err(RuntimeError::AlreadyExists(format!(
                "endpoint {container} in network {network}"
            )));
        }
        s.connections.push(pair);
        Ok(())
    }

    async fn build_image(&self, build: &ImageBuild) -> RuntimeResult<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("build {}", build.tag));
        if s.failing_builds.contains(&build.tag) {
            return Err(RuntimeError::CommandFailed {
                command: format!("build {}", build.tag),
                code: Some(1),
                stderr: "failed to solve: process did not complete successfully".to_string(),
            });
        }
        s.images.insert(build.tag.clone());
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<Option<ContainerStatus>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.status.clone()))
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("rm {name}"));
        s.containers.remove(name);
        if s.racing_removals.remove(name) {
            return Err(RuntimeError::NotFound(format!("container {name}")));
        }
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("run {}", spec.name));
        if s.containers.contains_key(&spec.name) {
            return Err(RuntimeError::AlreadyExists(format!(
                "container name {} is already in use",
                spec.name
            )));
        }
        if let Some(network) = &spec.network {
            if !s.networks.contains(network) {
                return Err(RuntimeError::NotFound(format!("network {network}")));
            }
        }
        Ok(s.insert_container(&spec.name, &spec.image, Some(spec.clone())))
    }

    async fn logs(&self, name: &str, tail: usize) -> RuntimeResult<String> {
        let s = self.state.lock().unwrap();
        let container = s
            .containers
            .get(name)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {name}")))?;
        let start = container.logs.len().saturating_sub(tail);
        Ok(container.logs[start..].join("\n"))
    }

    async fn compose_up(&self, project: &ComposeProject) -> RuntimeResult<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("compose up {}", project.project));
        if let Some(stderr) = s.compose_failure.clone() {
            return Err(RuntimeError::CommandFailed {
                command: format!("compose up {}", project.project),
                code: Some(1),
                stderr,
            });
        }
        s.compose_ups.push(project.clone());
        let network = format!("{}_default", project.project);
        s.networks.insert(network);
        let services = s
            .compose_services
            .get(&project.project)
            .cloned()
            .unwrap_or_default();
        for service in services {
            if !s.containers.contains_key(&service) {
                s.insert_container(&service, &format!("{}-{}", project.project, service), None);
            }
        }
        Ok(())
    }

    async fn container_health(&self, name: &str) -> RuntimeResult<HealthStatus> {
        let mut s = self.state.lock().unwrap();
        if !s.containers.contains_key(name) {
            return Err(RuntimeError::NotFound(format!("container {name}")));
        }
        let scripted = s.health_scripts.get_mut(name).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().copied()
            }
        });
        let health = match scripted {
            Some(h) => h,
            None => s.containers[name].status.health,
        };
        if let Some(c) = s.containers.get_mut(name) {
            c.status.health = health;
        }
        Ok(health)
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that records sleeps instead of waiting.
#[derive(Debug, Default)]
pub struct ManualClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
