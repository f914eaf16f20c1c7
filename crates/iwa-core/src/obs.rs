//! Structured observability hooks for orchestration and evaluation events.
//!
//! This module provides:
//! - Task-scoped tracing spans via `TaskSpan`
//! - Emission functions for provisioning, readiness, forwarding and
//!   evaluation lifecycle events
//!
//! Every event carries an `event = "<domain>.<verb>"` field so JSON log
//! pipelines can filter on it.

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

/// Task-scoped tracing span for one evaluation run.
///
/// Evaluation awaits on the network, so the span is attached to the run's
/// future with [`TaskSpan::attach`] rather than held entered.
///
/// # Example
///
/// ```ignore
/// let span = TaskSpan::new("autobooks-demo-task-1");
/// span.attach(run_task(task)).await;
/// // all tracing calls inside run_task carry task_id and run_id
/// ```
#[derive(Debug, Clone)]
pub struct TaskSpan {
    run_id: String,
    span: tracing::Span,
}

impl TaskSpan {
    /// Create a span tagged with the task id and a new run id.
    pub fn new(task_id: &str) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("iwa.task", task_id = %task_id, run_id = %run_id);
        Self { run_id, span }
    }

    /// The run id recorded on this span.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run `fut` inside this span.
    pub fn attach<F: Future>(&self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span.clone())
    }
}

/// Emit event: network exists (created now or already present).
pub fn emit_network_ensured(network: &str, created: bool) {
    info!(event = "network.ensured", network = %network, created = created);
}

/// Emit event: a container was (re)created under a fixed name.
pub fn emit_container_replaced(name: &str, image: &str, removed_previous: bool) {
    info!(
        event = "container.replaced",
        container = %name,
        image = %image,
        removed_previous = removed_previous,
    );
}

/// Emit event: a readiness target reported healthy.
pub fn emit_service_ready(target: &str, attempts: u32) {
    info!(event = "service.ready", target = %target, attempts = attempts);
}

/// Emit event: readiness polling exhausted its budget.
pub fn emit_readiness_timeout(target: &str, attempts: u32) {
    warn!(event = "service.timeout", target = %target, attempts = attempts);
}

/// Emit event: a port forward relay is listening.
pub fn emit_forward_started(local_port: u16, target: &str) {
    info!(event = "forward.started", local_port = local_port, target = %target);
}

/// Emit event: evaluation of a task started.
pub fn emit_task_started(task_id: &str, model: &str, max_steps: u32) {
    info!(
        event = "task.started",
        task_id = %task_id,
        model = %model,
        max_steps = max_steps,
    );
}

/// Emit event: one evaluation step executed.
pub fn emit_step(task_id: &str, step_index: u32, action: &str, raw_score: f64) {
    info!(
        event = "task.step",
        task_id = %task_id,
        step_index = step_index,
        action = %action,
        raw_score = raw_score,
    );
}

/// Emit event: evaluation of a task finished.
pub fn emit_task_finished(task_id: &str, steps: u32, raw_score: f64, success: bool) {
    info!(
        event = "task.finished",
        task_id = %task_id,
        steps = steps,
        raw_score = raw_score,
        success = success,
    );
}
