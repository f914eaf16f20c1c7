//! In-container startup: siblings, readiness, forwards.
//!
//! Runs before the HTTP server binds. Any failure here is fatal for the
//! process; siblings that were started stay up for the next attempt.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use iwa_core::forward::DEFAULT_SETTLE;
use iwa_core::{
    start_siblings, Clock, ContainerRuntime, ForwardSet, OrchestrationResult, PortForward,
    ReadinessPoller, ReadinessTarget, RetryPolicy, SiblingsOutcome, SiblingsSpec, TokioClock,
};
use tracing::info;

/// Everything `iwad serve` sets up before serving.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub siblings: Option<SiblingsSpec>,
    pub wait_for: Vec<ReadinessTarget>,
    pub policy: RetryPolicy,
    pub forwards: Vec<PortForward>,
    pub forward_bind: IpAddr,
    pub settle: Duration,
}

impl Default for BootstrapPlan {
    fn default() -> Self {
        Self {
            siblings: None,
            wait_for: Vec::new(),
            policy: RetryPolicy::container_health(),
            forwards: Vec::new(),
            forward_bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            settle: DEFAULT_SETTLE,
        }
    }
}

impl BootstrapPlan {
    pub fn is_empty(&self) -> bool {
        self.siblings.is_none() && self.wait_for.is_empty() && self.forwards.is_empty()
    }
}

/// What bootstrap left running.
#[derive(Debug, Default)]
pub struct Bootstrapped {
    pub siblings: Option<SiblingsOutcome>,
    pub forwards: ForwardSet,
}

/// Execute the plan in order: launch siblings, wait for every readiness
/// target, then start and verify port forwards.
pub async fn bootstrap(
    plan: &BootstrapPlan,
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
) -> OrchestrationResult<Bootstrapped> {
    let siblings = match &plan.siblings {
        Some(spec) => Some(start_siblings(runtime.as_ref(), spec).await?),
        None => None,
    };

    if !plan.wait_for.is_empty() {
        let poller = ReadinessPoller::new(runtime, plan.policy.clone()).with_clock(clock.clone());
        poller.wait_all(&plan.wait_for).await?;
    }

    let forwards = ForwardSet::launch(&plan.forwards, plan.forward_bind, plan.settle, clock.as_ref()).await?;
    if !forwards.is_empty() {
        info!(count = forwards.len(), "port forwards running");
    }

    Ok(Bootstrapped { siblings, forwards })
}

/// [`bootstrap`] on the wall clock.
pub async fn bootstrap_with_tokio(
    plan: &BootstrapPlan,
    runtime: Arc<dyn ContainerRuntime>,
) -> OrchestrationResult<Bootstrapped> {
    bootstrap(plan, runtime, Arc::new(TokioClock)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use iwa_core::fakes::{FakeRuntime, ManualClock};
    use iwa_core::{ComposeProject, HealthStatus, OrchestrationError};

    fn siblings() -> SiblingsSpec {
        SiblingsSpec::new(
            ComposeProject {
                file: "demo/docker-compose.yml".into(),
                project: "autoppia-demo-webs".into(),
            },
            "autoppia-demo-web",
        )
        .with_attachment("autoppia-demo-webs_default", "autoppia-affine-env")
    }

    #[tokio::test]
    async fn test_launches_then_waits() {
        let rt = Arc::new(FakeRuntime::new());
        rt.define_compose_services("autoppia-demo-webs", &["autoppia-demo-web"]);
        rt.script_health(
            "autoppia-demo-web",
            &[HealthStatus::Starting, HealthStatus::Healthy],
        );
        let clock = Arc::new(ManualClock::new());
        let plan = BootstrapPlan {
            siblings: Some(siblings()),
            wait_for: vec![ReadinessTarget::container("autoppia-demo-web")],
            policy: RetryPolicy::fixed(5, Duration::from_secs(5)),
            settle: Duration::ZERO,
            ..BootstrapPlan::default()
        };

        let done = bootstrap(&plan, rt.clone(), clock.clone()).await.unwrap();

        assert_eq!(done.siblings, Some(SiblingsOutcome::Started));
        assert!(done.forwards.is_empty());
        assert_eq!(rt.connections().len(), 1);
        assert_eq!(clock.sleeps()[0], Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unhealthy_sibling_aborts_with_logs() {
        let rt = Arc::new(FakeRuntime::new());
        rt.define_compose_services("autoppia-demo-webs", &["autoppia-demo-web"]);
        let plan = BootstrapPlan {
            siblings: Some(siblings()),
            wait_for: vec![ReadinessTarget::container("autoppia-demo-web")],
            policy: RetryPolicy::fixed(3, Duration::from_secs(5)),
            ..BootstrapPlan::default()
        };
        rt.script_health("autoppia-demo-web", &[HealthStatus::Unhealthy]);

        let err = bootstrap(&plan, rt, Arc::new(ManualClock::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ReadinessTimeout { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_default_plan_is_empty() {
        assert!(BootstrapPlan::default().is_empty());
    }
}
