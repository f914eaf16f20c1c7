//! `/evaluate` smoke test run by `iwa all`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use iwad::{EvaluateRequest, EvaluateResponse};

/// Smoke test settings.
#[derive(Debug, Clone)]
pub struct SmokeTest {
    pub env_url: String,
    pub model: String,
    /// Model base URL as the env container resolves it.
    pub model_base_url: String,
    pub max_steps: i64,
    pub timeout: Duration,
}

impl SmokeTest {
    /// POST `/evaluate` for one task and require a non-empty result.
    pub async fn run(&self, client: &reqwest::Client, task_id: &str) -> Result<EvaluateResponse> {
        let request = EvaluateRequest {
            model: self.model.clone(),
            base_url: self.model_base_url.clone(),
            task_id: Some(task_id.to_string()),
            max_steps: Some(self.max_steps),
        };
        let url = format!("{}/evaluate", self.env_url.trim_end_matches('/'));
        let response = client
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("POST {url} returned {status}: {body}");
        }
        let result: EvaluateResponse = response
            .json()
            .await
            .context("Unreadable /evaluate response")?;
        if result.details.is_empty() {
            bail!("/evaluate returned no details for {task_id}");
        }
        Ok(result)
    }
}
