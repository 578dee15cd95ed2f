//! Content-guard client. Every failure path yields a BLOCK verdict.

use relay_core::{ContentGuard, ModerationConfig, ModerationVerdict};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct GuardResponse {
    action: String,
    #[serde(default)]
    reasons: Vec<Value>,
    #[serde(default)]
    id: Option<String>,
}

/// Snapshot served by the moderation status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardStatus {
    pub enabled: bool,
    pub configured: bool,
    pub app_name: String,
    pub api_url: String,
    pub mode: &'static str,
    pub validates: &'static str,
}

#[derive(Debug, Clone)]
pub struct GuardClient {
    http: reqwest::Client,
    config: ModerationConfig,
}

impl GuardClient {
    pub fn new(config: ModerationConfig) -> Self {
        if config.enabled && !config.is_configured() {
            tracing::warn!(
                target: "relay::moderation",
                "Content guard key not set; every request will be blocked"
            );
        }
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            enabled: self.config.enabled,
            configured: self.config.is_configured(),
            app_name: self.config.app_name.clone(),
            api_url: self.config.api_url.clone(),
            mode: if self.config.enabled { "always_on" } else { "disabled" },
            validates: "input_and_output",
        }
    }

    async fn call(&self, key: &str, text: &str) -> Result<ModerationVerdict, String> {
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(key)
            .json(&json!({ "guard": text }))
            .timeout(self.config.timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "Timeout".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(format!("API error {}", status.as_u16()));
        }
        let body: GuardResponse = response.json().await.map_err(|e| e.to_string())?;
        tracing::debug!(
            target: "relay::moderation",
            action = %body.action,
            id = body.id.as_deref().unwrap_or("-"),
            "Content guard answered"
        );

        let reasons = body
            .reasons
            .iter()
            .map(|r| r.as_str().map(str::to_string).unwrap_or_else(|| r.to_string()))
            .collect();
        Ok(match body.action.to_ascii_lowercase().as_str() {
            "allow" => ModerationVerdict::allow(),
            "block" => ModerationVerdict::block(reasons),
            other => ModerationVerdict::unavailable(format!("unknown action {}", other)),
        })
    }
}

#[async_trait::async_trait]
impl ContentGuard for GuardClient {
    async fn check(&self, text: &str) -> ModerationVerdict {
        let Some(key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            return ModerationVerdict::unavailable("API key not configured");
        };
        match self.call(key, text).await {
            Ok(verdict) => verdict,
            Err(reason) => {
                tracing::warn!(target: "relay::moderation", reason = %reason, "Content guard unavailable");
                ModerationVerdict::unavailable(reason)
            }
        }
    }
}
