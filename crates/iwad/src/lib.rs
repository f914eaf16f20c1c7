//! IWA environment service.
//!
//! Serves `POST /evaluate`: loads tasks from a static file, drives a remote
//! model's `/act` endpoint step by step against an [`evaluator::Evaluator`]
//! and reports per-task scores. Before serving, [`bootstrap`] can launch
//! sibling web apps, wait for them and forward their ports to localhost.

pub mod action;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod model_client;
pub mod orchestrator;
pub mod task;

pub use action::{parse_actions, Action};
pub use bootstrap::{bootstrap, bootstrap_with_tokio, BootstrapPlan, Bootstrapped};
pub use config::{
    resolve_max_steps, EnvSettings, ServeArgs, DEFAULT_DEMO_WEBS_STARTING_PORT, DEFAULT_MAX_STEPS,
    ENVIRONMENT_NAME,
};
pub use error::{EnvError, EnvResult};
pub use evaluator::{
    Evaluator, EvaluatorFactory, HttpEvaluator, HttpEvaluatorFactory, ScoreDetails, StepOutcome,
    WebSnapshot,
};
pub use model_client::{act_endpoint, ActRequest, HistoryEntry, ModelClient, ModelReply};
pub use orchestrator::{
    run_task, EvaluateRequest, EvaluateResponse, EvaluationRun, Orchestrator, RunPhase,
    TaskEvaluationDetail,
};
pub use task::{Task, TaskStore, TaskTest};
