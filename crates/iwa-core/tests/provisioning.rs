//! End-to-end provisioning flows against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;

use iwa_core::fakes::{FakeRuntime, ManualClock};
use iwa_core::{
    build_service, ensure_network, remove_network, run_container, run_service, stop_services,
    ContainerSpec, ContainerState, HealthStatus, ImageBuild, OrchestrationError, PortMapping,
    ReadinessPoller, ReadinessTarget, Registry, RetryPolicy, ServiceSpec,
};

const NETWORK: &str = "autoppia-affine-net";

fn registry() -> Registry {
    Registry::new(NETWORK)
        .with_service(
            ServiceSpec::new(
                "env",
                ContainerSpec::new("autoppia-affine-env", "autoppia-affine-env:latest")
                    .with_port(PortMapping::new(9000, 8000)),
            )
            .with_build(ImageBuild::new("autoppia-affine-env:latest", "env")),
        )
        .unwrap()
        .with_service(
            ServiceSpec::new(
                "model",
                ContainerSpec::new("autoppia-affine-model", "autoppia-affine-model:latest")
                    .with_port(PortMapping::new(9001, 9000)),
            )
            .with_build(ImageBuild::new("autoppia-affine-model:latest", "model")),
        )
        .unwrap()
}

#[tokio::test]
async fn run_twice_leaves_exactly_one_container() {
    let rt = FakeRuntime::new();
    let mut reg = registry();
    ensure_network(&rt, NETWORK).await.unwrap();

    let first = run_service(&rt, &mut reg, "env").await.unwrap();
    let second = run_service(&rt, &mut reg, "env").await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(rt.count_named("autoppia-affine-env"), 1);
    assert_eq!(rt.container("autoppia-affine-env").unwrap().id, second.id);
    assert_eq!(reg.handle("env").unwrap().id, second.id);
}

#[tokio::test]
async fn replacement_builds_then_removes_then_runs() {
    let rt = FakeRuntime::new()
        .with_network(NETWORK)
        .with_container("autoppia-affine-env", "old", ContainerState::Exited);
    let mut reg = registry();

    run_service(&rt, &mut reg, "env").await.unwrap();

    assert_eq!(
        rt.calls(),
        vec![
            "build autoppia-affine-env:latest".to_string(),
            "rm autoppia-affine-env".to_string(),
            "run autoppia-affine-env".to_string(),
        ]
    );
    let spec = rt.container_spec("autoppia-affine-env").unwrap();
    assert_eq!(spec.network.as_deref(), Some(NETWORK));
}

#[tokio::test]
async fn failed_build_keeps_existing_container() {
    let rt = FakeRuntime::new()
        .with_network(NETWORK)
        .with_container("autoppia-affine-env", "autoppia-affine-env:latest", ContainerState::Running);
    rt.fail_build("autoppia-affine-env:latest");
    let before = rt.container("autoppia-affine-env").unwrap();
    let mut reg = registry();

    let err = run_service(&rt, &mut reg, "env").await.unwrap_err();

    assert!(matches!(
        err,
        OrchestrationError::Provisioning {
            operation: "build image",
            ..
        }
    ));
    let after = rt.container("autoppia-affine-env").unwrap();
    assert_eq!(before.id, after.id);
    assert!(after.is_running());
}

#[tokio::test]
async fn removal_race_is_tolerated() {
    let rt = FakeRuntime::new()
        .with_network(NETWORK)
        .with_container("autoppia-affine-model", "img", ContainerState::Running);
    rt.race_removal("autoppia-affine-model");
    let mut reg = registry();

    let handle = run_service(&rt, &mut reg, "model").await.unwrap();
    assert_eq!(rt.container("autoppia-affine-model").unwrap().id, handle.id);
}

#[tokio::test]
async fn run_without_network_is_a_provisioning_error() {
    let rt = FakeRuntime::new();
    let err = run_container(
        &rt,
        &ContainerSpec::new("loose", "img").with_network("missing-net"),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("run container"));
}

#[tokio::test]
async fn build_only_does_not_touch_containers() {
    let rt = FakeRuntime::new().with_container("autoppia-affine-env", "img", ContainerState::Running);
    let reg = registry();
    build_service(&rt, &reg, "env").await.unwrap();
    assert!(rt.has_image("autoppia-affine-env:latest"));
    assert_eq!(rt.calls(), vec!["build autoppia-affine-env:latest".to_string()]);
}

#[tokio::test]
async fn stop_removes_services_and_network() {
    let rt = FakeRuntime::new();
    let mut reg = registry();
    ensure_network(&rt, NETWORK).await.unwrap();
    run_service(&rt, &mut reg, "env").await.unwrap();
    run_service(&rt, &mut reg, "model").await.unwrap();

    let removed = stop_services(&rt, &mut reg).await.unwrap();
    assert_eq!(removed, vec!["autoppia-affine-model", "autoppia-affine-env"]);
    assert!(remove_network(&rt, NETWORK).await.unwrap());

    assert!(rt.container_names().is_empty());
    assert!(!rt.has_network(NETWORK));
    assert!(reg.handle("env").is_none());

    // Stopping again is a no-op.
    assert!(stop_services(&rt, &mut reg).await.unwrap().is_empty());
    assert!(!remove_network(&rt, NETWORK).await.unwrap());
}

#[tokio::test]
async fn started_service_waits_for_container_health() {
    let rt = Arc::new(FakeRuntime::new());
    let mut reg = registry();
    ensure_network(rt.as_ref(), NETWORK).await.unwrap();
    run_service(rt.as_ref(), &mut reg, "env").await.unwrap();
    rt.script_health(
        "autoppia-affine-env",
        &[HealthStatus::Starting, HealthStatus::Healthy],
    );

    let clock = Arc::new(ManualClock::new());
    let poller = ReadinessPoller::new(rt.clone(), RetryPolicy::fixed(5, Duration::from_secs(3)))
        .with_clock(clock.clone());
    let ready = poller
        .wait(&ReadinessTarget::container("autoppia-affine-env"))
        .await
        .unwrap();

    assert_eq!(ready.attempts, 2);
    assert_eq!(clock.total_slept(), Duration::from_secs(3));
}
