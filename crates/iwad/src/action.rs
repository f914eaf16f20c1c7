//! Browser actions exchanged with the model.
//!
//! Actions are tagged objects, `{"type": "NavigateAction", "url": "..."}`.
//! Model responses come in three shapes, checked in this order:
//! `{"actions": [..]}`, `{"action": {..}}` and the legacy
//! `{"navigate_url": "..."}`. Entries that do not deserialise are skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "NavigateAction")]
    Navigate { url: String },

    #[serde(rename = "ClickAction")]
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i64>,
    },

    #[serde(rename = "TypeAction")]
    Type {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<Value>,
    },

    #[serde(rename = "ScrollAction")]
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        up: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        down: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },

    #[serde(rename = "WaitAction")]
    Wait { time_seconds: f64 },

    #[serde(rename = "SendKeysIWAAction")]
    SendKeys { keys: String },

    #[serde(rename = "IdleAction")]
    Idle,
}

impl Action {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "NavigateAction",
            Action::Click { .. } => "ClickAction",
            Action::Type { .. } => "TypeAction",
            Action::Scroll { .. } => "ScrollAction",
            Action::Wait { .. } => "WaitAction",
            Action::SendKeys { .. } => "SendKeysIWAAction",
            Action::Idle => "IdleAction",
        }
    }
}

/// Extract well-formed actions from a model response body.
pub fn parse_actions(body: &Value) -> Vec<Action> {
    if let Some(list) = body.get("actions").and_then(Value::as_array) {
        let actions: Vec<Action> = list.iter().filter_map(parse_one).collect();
        if !actions.is_empty() {
            return actions;
        }
    }
    if let Some(action) = body.get("action").and_then(parse_one) {
        return vec![action];
    }
    match body.get("navigate_url").and_then(Value::as_str) {
        Some(url) if !url.is_empty() => vec![Action::Navigate {
            url: url.to_string(),
        }],
        _ => Vec::new(),
    }
}

fn parse_one(raw: &Value) -> Option<Action> {
    match serde_json::from_value(raw.clone()) {
        Ok(action) => Some(action),
        Err(e) => {
            debug!(error = %e, raw = %raw, "skipping malformed action");
            None
        }
    }
}
