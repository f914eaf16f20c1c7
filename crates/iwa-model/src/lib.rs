//! Reference model for the IWA `/act` contract.
//!
//! Ignores the observation: on step 0 it navigates to a fixed target URL,
//! on every later step it answers with no actions and `done: true`. Useful
//! as a known-good counterpart when smoke testing an environment.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Default navigation target: the Autobooks demo book page.
pub const DEFAULT_TARGET_URL: &str = "http://localhost:8001/books/book-original-002?seed=36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPolicy {
    pub target_url: String,
}

impl Default for FixedPolicy {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
        }
    }
}

/// The fields this model reads; everything else in the request is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ActRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub step_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActResponse {
    pub actions: Vec<Value>,
    pub done: bool,
}

impl FixedPolicy {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }

    pub fn act(&self, request: &ActRequest) -> ActResponse {
        if request.step_index > 0 {
            return ActResponse {
                actions: Vec::new(),
                done: true,
            };
        }
        ActResponse {
            actions: vec![json!({ "type": "NavigateAction", "url": self.target_url })],
            done: false,
        }
    }
}

pub fn router(policy: FixedPolicy) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/act", post(act))
        .with_state(Arc::new(policy))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn act(
    State(policy): State<Arc<FixedPolicy>>,
    Json(request): Json<ActRequest>,
) -> Json<ActResponse> {
    let response = policy.act(&request);
    info!(
        task_id = %request.task_id,
        step_index = request.step_index,
        actions = response.actions.len(),
        "act"
    );
    Json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_navigates() {
        let policy = FixedPolicy::new("http://web/books/1");
        let resp = policy.act(&ActRequest {
            task_id: "t".into(),
            step_index: 0,
        });
        assert_eq!(resp.actions[0]["type"], "NavigateAction");
        assert_eq!(resp.actions[0]["url"], "http://web/books/1");
        assert!(!resp.done);
    }

    #[test]
    fn test_later_steps_are_done() {
        let resp = FixedPolicy::default().act(&ActRequest {
            task_id: "t".into(),
            step_index: 3,
        });
        assert!(resp.actions.is_empty());
        assert!(resp.done);
    }
}
