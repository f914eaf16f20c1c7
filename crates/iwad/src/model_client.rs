//! HTTP client for the model's `/act` endpoint.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{parse_actions, Action};
use crate::error::{EnvError, EnvResult};

/// A step already executed in this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub url: String,
}

/// Body of `POST /act`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActRequest {
    pub task_id: String,
    pub prompt: String,
    pub url: String,
    /// Same value as `url`, for models written against the older field name.
    pub current_url: String,
    pub snapshot_html: String,
    pub step_index: u32,
    pub web_project_id: String,
    #[serde(default)]
    pub relevant_data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

/// What the model answered for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub actions: Vec<Action>,
    /// The model has nothing more to do for this task.
    pub done: bool,
}

impl ModelReply {
    pub fn from_body(body: &Value) -> Self {
        Self {
            actions: parse_actions(body),
            done: body.get("done").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Normalise a model base URL to its `/act` endpoint.
pub fn act_endpoint(base_url: &str) -> EnvResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| EnvError::InvalidRequest(format!("invalid base_url {base_url:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EnvError::InvalidRequest(format!(
            "base_url must be http(s), got {base_url:?}"
        )));
    }
    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("/act") {
        url.set_path(&format!("{path}/act"));
    }
    Ok(url)
}

/// Calls one model endpoint for the duration of an `/evaluate` request.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl ModelClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
    ) -> EnvResult<Self> {
        Ok(Self {
            http,
            endpoint: act_endpoint(base_url)?,
            api_key,
        })
    }

    /// Build a client with its own connection pool and request timeout.
    pub fn with_timeout(base_url: &str, api_key: Option<String>, timeout: Duration) -> EnvResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::Model(format!("cannot build http client: {e}")))?;
        Self::new(http, base_url, api_key)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ask the model for the next actions. An empty list is a valid answer.
    pub async fn act(&self, request: &ActRequest) -> EnvResult<ModelReply> {
        let mut call = self.http.post(self.endpoint.clone()).json(request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|e| EnvError::Model(format!("POST {}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvError::Model(format!(
                "POST {} returned {status}",
                self.endpoint
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| EnvError::Model(format!("unreadable /act response: {e}")))?;
        Ok(ModelReply::from_body(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_act_endpoint_appends_act() {
        assert_eq!(
            act_endpoint("http://autoppia-affine-model:9000").unwrap().as_str(),
            "http://autoppia-affine-model:9000/act"
        );
        assert_eq!(
            act_endpoint("http://model:9000/v1/").unwrap().as_str(),
            "http://model:9000/v1/act"
        );
    }

    #[test]
    fn test_act_endpoint_keeps_existing_act() {
        assert_eq!(
            act_endpoint("http://autoppia-affine-model:9000/act").unwrap().as_str(),
            "http://autoppia-affine-model:9000/act"
        );
    }

    #[test]
    fn test_act_endpoint_rejects_non_http() {
        assert!(act_endpoint("not a url").is_err());
        assert!(act_endpoint("ftp://model/act").is_err());
    }

    #[test]
    fn test_reply_reads_done_flag() {
        let reply = ModelReply::from_body(&serde_json::json!({"actions": [], "done": true}));
        assert!(reply.actions.is_empty());
        assert!(reply.done);

        let reply = ModelReply::from_body(&serde_json::json!({"actions": [{"type": "IdleAction"}]}));
        assert!(!reply.done);

        let reply = ModelReply::from_body(&serde_json::json!({"actions": [], "done": "yes"}));
        assert!(!reply.done);
    }

    #[test]
    fn test_history_omitted_when_empty() {
        let req = ActRequest {
            task_id: "t".into(),
            prompt: "p".into(),
            url: "http://web/".into(),
            current_url: "http://web/".into(),
            snapshot_html: String::new(),
            step_index: 0,
            web_project_id: "autobooks".into(),
            relevant_data: Value::Null,
            history: Vec::new(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("history").is_none());
        assert_eq!(json["current_url"], "http://web/");
    }
}
