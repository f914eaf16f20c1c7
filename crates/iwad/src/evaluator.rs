//! Evaluator seam and the built-in HTTP evaluator.
//!
//! An [`Evaluator`] owns the page state of one task run: `reset` opens the
//! starting page, `step` executes one action (or a no-op) and re-scores the
//! task's tests. [`HttpEvaluator`] does this with plain HTTP fetches, which
//! is enough for navigation-driven tasks; a browser-backed implementation can
//! be plugged in through [`EvaluatorFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::action::Action;
use crate::error::{EnvError, EnvResult};
use crate::task::{Task, TaskTest};

/// Scoring of a task's tests against the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetails {
    pub raw_score: f64,
    pub tests_passed: u32,
    pub total_tests: u32,
    pub success: bool,
}

impl ScoreDetails {
    pub fn from_counts(tests_passed: u32, total_tests: u32) -> Self {
        let raw_score = if total_tests == 0 {
            0.0
        } else {
            f64::from(tests_passed) / f64::from(total_tests)
        };
        Self {
            raw_score,
            tests_passed,
            total_tests,
            success: total_tests > 0 && tests_passed == total_tests,
        }
    }
}

/// Current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSnapshot {
    pub url: String,
    pub html: String,
}

/// Result of a reset or a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub score: ScoreDetails,
    pub snapshot: WebSnapshot,
}

#[async_trait]
pub trait Evaluator: Send {
    /// Open the task's starting page.
    async fn reset(&mut self) -> EnvResult<StepOutcome>;

    /// Execute `action`, or nothing when `None`, and re-score.
    async fn step(&mut self, action: Option<&Action>) -> EnvResult<StepOutcome>;

    /// Release resources. Called exactly once per run.
    async fn close(&mut self);
}

/// Creates one evaluator per task run.
pub trait EvaluatorFactory: Send + Sync {
    fn create(&self, task: &Task, web_agent_id: &str) -> Box<dyn Evaluator>;
}

/// Check one test against a page. Unknown kinds never pass.
pub fn test_passes(test: &TaskTest, snapshot: &WebSnapshot) -> bool {
    match test.kind.as_str() {
        "CheckUrlTest" => test
            .param("url")
            .is_some_and(|expected| snapshot.url.contains(expected)),
        "FindInHtmlTest" => test
            .param("content")
            .is_some_and(|expected| snapshot.html.contains(expected)),
        other => {
            debug!(kind = %other, "unsupported test kind");
            false
        }
    }
}

/// Score all tests of `task` against `snapshot`.
pub fn score_task(task: &Task, snapshot: &WebSnapshot) -> ScoreDetails {
    let passed = task
        .tests
        .iter()
        .filter(|test| test_passes(test, snapshot))
        .count() as u32;
    ScoreDetails::from_counts(passed, task.total_tests())
}

/// Evaluator that follows `NavigateAction`s with HTTP GETs.
pub struct HttpEvaluator {
    http: reqwest::Client,
    task: Task,
    web_agent_id: String,
    snapshot: WebSnapshot,
}

impl HttpEvaluator {
    pub fn new(http: reqwest::Client, task: Task, web_agent_id: impl Into<String>) -> Self {
        Self {
            http,
            task,
            web_agent_id: web_agent_id.into(),
            snapshot: WebSnapshot::default(),
        }
    }

    async fn fetch(&self, url: &str) -> EnvResult<WebSnapshot> {
        let target = self.resolve(url)?;
        let response = self
            .http
            .get(target.clone())
            .send()
            .await
            .map_err(|e| EnvError::Evaluator(format!("GET {target}: {e}")))?;
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| EnvError::Evaluator(format!("reading {target}: {e}")))?;
        Ok(WebSnapshot {
            url: final_url,
            html,
        })
    }

    /// Resolve relative navigation against the current page.
    fn resolve(&self, url: &str) -> EnvResult<Url> {
        let parsed = match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(_) => Url::parse(&self.snapshot.url).and_then(|base| base.join(url)),
        };
        parsed.map_err(|e| EnvError::Evaluator(format!("cannot navigate to {url:?}: {e}")))
    }

    fn outcome(&self) -> StepOutcome {
        StepOutcome {
            score: score_task(&self.task, &self.snapshot),
            snapshot: self.snapshot.clone(),
        }
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    async fn reset(&mut self) -> EnvResult<StepOutcome> {
        info!(
            task_id = %self.task.id,
            web_agent_id = %self.web_agent_id,
            url = %self.task.url,
            "resetting evaluator"
        );
        let start = self.task.url.clone();
        self.snapshot = self.fetch(&start).await?;
        Ok(self.outcome())
    }

    async fn step(&mut self, action: Option<&Action>) -> EnvResult<StepOutcome> {
        match action {
            Some(Action::Navigate { url }) => {
                self.snapshot = self.fetch(url).await?;
            }
            Some(other) => {
                debug!(action = other.name(), "action does not change page state");
            }
            None => debug!("no-op step"),
        }
        Ok(self.outcome())
    }

    async fn close(&mut self) {
        debug!(task_id = %self.task.id, "evaluator closed");
    }
}

/// Factory for [`HttpEvaluator`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpEvaluatorFactory {
    http: reqwest::Client,
    headless: bool,
}

impl HttpEvaluatorFactory {
    pub fn new(http: reqwest::Client, headless: bool) -> Self {
        Self { http, headless }
    }

    pub fn headless(&self) -> bool {
        self.headless
    }
}

impl EvaluatorFactory for HttpEvaluatorFactory {
    fn create(&self, task: &Task, web_agent_id: &str) -> Box<dyn Evaluator> {
        Box::new(HttpEvaluator::new(
            self.http.clone(),
            task.clone(),
            web_agent_id,
        ))
    }
}

/// Shared factory handle.
pub type SharedEvaluatorFactory = Arc<dyn EvaluatorFactory>;

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(url: &str, html: &str) -> WebSnapshot {
        WebSnapshot {
            url: url.into(),
            html: html.into(),
        }
    }

    fn task(tests: Vec<TaskTest>) -> Task {
        Task {
            id: "t".into(),
            web_project_id: "autobooks".into(),
            url: "http://web/".into(),
            prompt: "p".into(),
            is_web_real: false,
            tests,
            relevant_data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_score_counts_passing_tests() {
        let t = task(vec![
            TaskTest::new("CheckUrlTest").with_param("url", "/books/2"),
            TaskTest::new("FindInHtmlTest").with_param("content", "Dune"),
            TaskTest::new("JudgeBaseOnHTML"),
        ]);
        let score = score_task(&t, &snapshot("http://web/books/2", "<h1>Dune</h1>"));
        assert_eq!(score.tests_passed, 2);
        assert_eq!(score.total_tests, 3);
        assert!(!score.success);
        assert!((score.raw_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_passing_is_success() {
        let t = task(vec![TaskTest::new("CheckUrlTest").with_param("url", "/books/2")]);
        let score = score_task(&t, &snapshot("http://web/books/2?seed=1", ""));
        assert!(score.success);
        assert_eq!(score.raw_score, 1.0);
    }

    #[test]
    fn test_no_tests_never_succeeds() {
        let score = score_task(&task(vec![]), &snapshot("http://web/", ""));
        assert!(!score.success);
        assert_eq!(score.raw_score, 0.0);
    }
}
