//! Evaluation orchestrator.
//!
//! Each selected task runs through `Loaded → Reset → Stepping → (Success |
//! Exhausted)`. Every loop iteration asks the model for actions, executes the
//! first one (or a no-op when there is none) and consumes exactly one step of
//! the budget. A reply with `done: true` ends the run after its step. Model
//! and evaluator failures are recorded on the task's detail and never fail
//! the request.

use std::path::PathBuf;
use std::sync::Arc;

use iwa_core::{obs, TaskSpan};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::action::Action;
use crate::config::{EnvSettings, ENVIRONMENT_NAME};
use crate::error::{EnvError, EnvResult};
use crate::evaluator::{Evaluator, ScoreDetails, SharedEvaluatorFactory, StepOutcome, WebSnapshot};
use crate::model_client::{ActRequest, HistoryEntry, ModelClient};
use crate::task::{Task, TaskStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub max_steps: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvaluationDetail {
    pub task_id: String,
    pub project_id: String,
    pub score: f64,
    pub raw_score: f64,
    pub success: bool,
    pub tests_passed: u32,
    pub total_tests: u32,
    pub steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub environment: String,
    pub total_score: f64,
    pub success_rate: f64,
    pub evaluated: usize,
    pub details: Vec<TaskEvaluationDetail>,
}

impl EvaluateResponse {
    pub fn from_details(details: Vec<TaskEvaluationDetail>) -> Self {
        let evaluated = details.len();
        let total_score = details.iter().map(|d| d.score).sum();
        let successes = details.iter().filter(|d| d.success).count();
        let success_rate = if evaluated == 0 {
            0.0
        } else {
            successes as f64 / evaluated as f64
        };
        Self {
            environment: ENVIRONMENT_NAME.to_string(),
            total_score,
            success_rate,
            evaluated,
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Loaded,
    Reset,
    Stepping,
    Success,
    Exhausted,
}

/// Mutable state of one task run.
#[derive(Debug)]
pub struct EvaluationRun<'t> {
    task: &'t Task,
    max_steps: u32,
    phase: RunPhase,
    step_index: u32,
    score: ScoreDetails,
    snapshot: WebSnapshot,
    history: Vec<HistoryEntry>,
}

impl<'t> EvaluationRun<'t> {
    pub fn new(task: &'t Task, max_steps: u32) -> Self {
        Self {
            task,
            max_steps,
            phase: RunPhase::Loaded,
            step_index: 0,
            score: ScoreDetails {
                total_tests: task.total_tests(),
                ..ScoreDetails::default()
            },
            snapshot: WebSnapshot::default(),
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, RunPhase::Success | RunPhase::Exhausted)
    }

    /// Record the evaluator's initial state and start stepping.
    pub fn reset(&mut self, first: StepOutcome) {
        self.phase = RunPhase::Reset;
        self.score = first.score;
        self.snapshot = first.snapshot;
        self.phase = if self.max_steps == 0 {
            RunPhase::Exhausted
        } else {
            RunPhase::Stepping
        };
    }

    /// Page URL the model sees; the task URL until the evaluator reports one.
    pub fn current_url(&self) -> &str {
        if self.snapshot.url.is_empty() {
            &self.task.url
        } else {
            &self.snapshot.url
        }
    }

    pub fn act_request(&self) -> ActRequest {
        let url = self.current_url().to_string();
        ActRequest {
            task_id: self.task.id.clone(),
            prompt: self.task.prompt.clone(),
            current_url: url.clone(),
            url,
            snapshot_html: self.snapshot.html.clone(),
            step_index: self.step_index,
            web_project_id: self.task.web_project_id.clone(),
            relevant_data: self.task.relevant_data.clone(),
            history: self.history.clone(),
        }
    }

    /// Consume one step. A failed evaluator step keeps the last observation.
    /// `model_done` ends the run once this step is scored.
    pub fn advance(
        &mut self,
        action: Option<Action>,
        outcome: EnvResult<StepOutcome>,
        model_done: bool,
    ) {
        match outcome {
            Ok(outcome) => {
                self.score = outcome.score;
                self.snapshot = outcome.snapshot;
            }
            Err(e) => warn!(step_index = self.step_index, error = %e, "evaluator step failed"),
        }
        obs::emit_step(
            &self.task.id,
            self.step_index,
            action.as_ref().map_or("noop", Action::name),
            self.score.raw_score,
        );
        self.history.push(HistoryEntry {
            step_index: self.step_index,
            action,
            url: self.current_url().to_string(),
        });
        self.step_index += 1;

        if self.score.success {
            self.phase = RunPhase::Success;
        } else if model_done || self.step_index >= self.max_steps {
            self.phase = RunPhase::Exhausted;
        }
    }

    pub fn into_detail(self, error: Option<String>) -> TaskEvaluationDetail {
        TaskEvaluationDetail {
            task_id: self.task.id.clone(),
            project_id: self.task.web_project_id.clone(),
            score: self.score.raw_score,
            raw_score: self.score.raw_score,
            success: self.score.success,
            tests_passed: self.score.tests_passed,
            total_tests: self.score.total_tests,
            steps: self.step_index,
            error,
        }
    }
}

/// Drive one task to a terminal state.
pub async fn run_task(
    task: &Task,
    model: &ModelClient,
    evaluator: &mut dyn Evaluator,
    max_steps: u32,
) -> TaskEvaluationDetail {
    let mut run = EvaluationRun::new(task, max_steps);

    match evaluator.reset().await {
        Ok(first) => run.reset(first),
        Err(e) => {
            warn!(error = %e, "evaluator reset failed");
            evaluator.close().await;
            return run.into_detail(Some(e.to_string()));
        }
    }

    while !run.is_terminal() {
        let request = run.act_request();
        let (action, done) = match model.act(&request).await {
            Ok(reply) => (reply.actions.into_iter().next(), reply.done),
            Err(e) => {
                warn!(step_index = run.step_index(), error = %e, "model /act failed");
                (None, false)
            }
        };
        if action.is_none() {
            info!(step_index = run.step_index(), "model returned no action; stepping with no-op");
        }
        let outcome = evaluator.step(action.as_ref()).await;
        run.advance(action, outcome, done);
        if done && run.phase() == RunPhase::Exhausted {
            info!(step_index = run.step_index(), "model reported done");
        }
    }

    evaluator.close().await;
    run.into_detail(None)
}

/// Serves `/evaluate` requests.
pub struct Orchestrator {
    settings: EnvSettings,
    evaluators: SharedEvaluatorFactory,
    tasks: OnceCell<Arc<TaskStore>>,
}

impl Orchestrator {
    pub fn new(settings: EnvSettings, evaluators: SharedEvaluatorFactory) -> Self {
        Self {
            settings,
            evaluators,
            tasks: OnceCell::new(),
        }
    }

    /// Use an already loaded store instead of reading `tasks_file`.
    pub fn with_tasks(self, store: TaskStore) -> Self {
        Self {
            tasks: OnceCell::new_with(Some(Arc::new(store))),
            ..self
        }
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    pub fn tasks_file(&self) -> &PathBuf {
        &self.settings.tasks_file
    }

    /// The task store, loaded on first use. A failed load is retried on the
    /// next call.
    pub async fn tasks(&self) -> EnvResult<Arc<TaskStore>> {
        self.tasks
            .get_or_try_init(|| async {
                let store = TaskStore::load(&self.settings.tasks_file)
                    .await?
                    .rebased(self.settings.demo_webs_endpoint.as_deref())?;
                Ok::<_, EnvError>(Arc::new(store))
            })
            .await
            .cloned()
    }

    fn max_steps(&self, requested: Option<i64>) -> EnvResult<u32> {
        match requested {
            None => Ok(self.settings.default_max_steps),
            Some(n) if n <= 0 => Err(EnvError::InvalidRequest(
                "max_steps must be positive".to_string(),
            )),
            Some(n) => u32::try_from(n)
                .map_err(|_| EnvError::InvalidRequest(format!("max_steps {n} is too large"))),
        }
    }

    /// Evaluate the model at `request.base_url` on the selected tasks,
    /// one task after another.
    pub async fn evaluate(&self, request: &EvaluateRequest) -> EnvResult<EvaluateResponse> {
        let max_steps = self.max_steps(request.max_steps)?;
        let model = ModelClient::with_timeout(
            &request.base_url,
            self.settings.model_api_key.clone(),
            self.settings.model_timeout,
        )?;
        let store = self.tasks().await?;
        let selected = store.select(request.task_id.as_deref())?;

        let web_agent_id = if request.model.is_empty() {
            "1"
        } else {
            request.model.as_str()
        };

        let mut details = Vec::with_capacity(selected.len());
        for task in selected {
            let span = TaskSpan::new(&task.id);
            obs::emit_task_started(&task.id, &request.model, max_steps);
            let mut evaluator = self.evaluators.create(task, web_agent_id);
            let detail = span
                .attach(run_task(task, &model, evaluator.as_mut(), max_steps))
                .await;
            obs::emit_task_finished(&task.id, detail.steps, detail.raw_score, detail.success);
            details.push(detail);
        }

        Ok(EvaluateResponse::from_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskTest;

    fn task() -> Task {
        Task {
            id: "t".into(),
            web_project_id: "autobooks".into(),
            url: "http://web/".into(),
            prompt: "p".into(),
            is_web_real: false,
            tests: vec![TaskTest::new("CheckUrlTest").with_param("url", "/done")],
            relevant_data: serde_json::Value::Null,
        }
    }

    fn outcome(url: &str, success: bool) -> StepOutcome {
        StepOutcome {
            score: ScoreDetails::from_counts(u32::from(success), 1),
            snapshot: WebSnapshot {
                url: url.into(),
                html: String::new(),
            },
        }
    }

    #[test]
    fn test_noop_step_consumes_budget() {
        let t = task();
        let mut run = EvaluationRun::new(&t, 3);
        run.reset(outcome("http://web/", false));
        assert_eq!(run.phase(), RunPhase::Stepping);
        run.advance(None, Ok(outcome("http://web/", false)), false);
        assert_eq!(run.step_index(), 1);
        assert_eq!(run.phase(), RunPhase::Stepping);
    }

    #[test]
    fn test_success_stops_stepping() {
        let t = task();
        let mut run = EvaluationRun::new(&t, 30);
        run.reset(outcome("http://web/", false));
        run.advance(
            Some(Action::Navigate {
                url: "http://web/done".into(),
            }),
            Ok(outcome("http://web/done", true)),
            true,
        );
        assert_eq!(run.phase(), RunPhase::Success);
        let detail = run.into_detail(None);
        assert_eq!(detail.steps, 1);
        assert_eq!(detail.score, 1.0);
    }

    #[test]
    fn test_failed_step_keeps_last_score() {
        let t = task();
        let mut run = EvaluationRun::new(&t, 1);
        run.reset(outcome("http://web/start", false));
        run.advance(None, Err(EnvError::Evaluator("boom".into())), false);
        assert_eq!(run.phase(), RunPhase::Exhausted);
        assert_eq!(run.current_url(), "http://web/start");
        assert_eq!(run.into_detail(None).steps, 1);
    }

    #[test]
    fn test_model_done_exhausts_run() {
        let t = task();
        let mut run = EvaluationRun::new(&t, 30);
        run.reset(outcome("http://web/", false));
        run.advance(Some(Action::Idle), Ok(outcome("http://web/", false)), false);
        assert_eq!(run.phase(), RunPhase::Stepping);
        run.advance(None, Ok(outcome("http://web/", false)), true);
        assert_eq!(run.phase(), RunPhase::Exhausted);
        let detail = run.into_detail(None);
        assert_eq!(detail.steps, 2);
        assert!(!detail.success);
    }

    #[test]
    fn test_history_is_sent_to_model() {
        let t = task();
        let mut run = EvaluationRun::new(&t, 5);
        run.reset(outcome("", false));
        assert_eq!(run.act_request().url, "http://web/");
        run.advance(Some(Action::Idle), Ok(outcome("http://web/a", false)), false);
        let req = run.act_request();
        assert_eq!(req.step_index, 1);
        assert_eq!(req.history.len(), 1);
        assert_eq!(req.history[0].action, Some(Action::Idle));
        assert_eq!(req.url, "http://web/a");
    }

    #[test]
    fn test_summary_rates() {
        let d = |score: f64, success: bool| TaskEvaluationDetail {
            task_id: "t".into(),
            project_id: "p".into(),
            score,
            raw_score: score,
            success,
            tests_passed: 0,
            total_tests: 1,
            steps: 1,
            error: None,
        };
        let resp = EvaluateResponse::from_details(vec![d(1.0, true), d(0.5, false)]);
        assert_eq!(resp.environment, "autoppia_affine_env");
        assert_eq!(resp.total_score, 1.5);
        assert_eq!(resp.success_rate, 0.5);
        assert_eq!(resp.evaluated, 2);
        assert_eq!(EvaluateResponse::from_details(vec![]).success_rate, 0.0);
    }
}
