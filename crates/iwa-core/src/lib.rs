//! IWA Core Library
//!
//! Orchestration primitives for running a web-agent evaluation environment
//! as a set of cooperating containers:
//!
//! - [`network`]: idempotent virtual network provisioning
//! - [`lifecycle`]: build-then-swap container replacement via `reconcile`
//! - [`siblings`]: sibling (DOOD) service launch behind a marker container
//! - [`readiness`]: bounded health polling with log-tail diagnostics
//! - [`forward`]: local TCP relays to sibling containers
//!
//! All engine access goes through the [`runtime::ContainerRuntime`] trait so
//! the logic above runs unchanged against Docker or the in-memory fakes.

pub mod error;
pub mod fakes;
pub mod forward;
pub mod lifecycle;
pub mod network;
pub mod obs;
pub mod readiness;
pub mod registry;
pub mod runtime;
pub mod siblings;
pub mod telemetry;

pub use error::{OrchestrationError, OrchestrationResult};
pub use forward::{forward, ForwardHandle, ForwardSet, PortForward};
pub use lifecycle::{
    apply, build_service, reconcile, run_container, run_service, stop_services, LifecycleAction,
};
pub use network::{ensure_network, remove_network};
pub use obs::TaskSpan;
pub use readiness::{
    wait_healthy, Clock, HealthSignal, Ready, ReadinessPoller, ReadinessTarget, RetryPolicy,
    TokioClock,
};
pub use registry::{Registry, ServiceSpec};
pub use runtime::docker::DockerCli;
pub use runtime::{
    ComposeProject, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus,
    HealthStatus, ImageBuild, PortMapping, RuntimeError, RuntimeResult,
};
pub use siblings::{start_siblings, NetworkAttachment, SiblingsOutcome, SiblingsSpec};
pub use telemetry::init_tracing;

/// IWA harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
