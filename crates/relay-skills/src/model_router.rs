//! Model Router: streams a prompt through the local inference server and relays its
//! NDJSON fragments over a bounded channel.

use futures_util::StreamExt;
use relay_core::{FragmentReceiver, ModelBackend, ModelConfig, ModelFragment, RelayError};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

const FRAGMENT_BUFFER: usize = 32;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_thread: u32,
    num_gpu: u32,
    num_ctx: u32,
}

/// Client for `/api/generate` (streaming) and `/api/tags` (model listing).
#[derive(Debug, Clone)]
pub struct ModelRouter {
    http: reqwest::Client,
    config: ModelConfig,
}

impl ModelRouter {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.config.name
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Installed models as reported by the inference server; `{"models": []}` when unreachable.
    pub async fn list_models(&self) -> Value {
        let fetched = async {
            self.http
                .get(self.endpoint("/api/tags"))
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await
        };
        match fetched.await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(target: "relay::stream", error = %e, "Model listing unavailable");
                serde_json::json!({ "models": [] })
            }
        }
    }
}

#[async_trait::async_trait]
impl ModelBackend for ModelRouter {
    async fn stream_generate(&self, prompt: &str) -> Result<FragmentReceiver, RelayError> {
        let request = GenerateRequest {
            model: &self.config.name,
            prompt,
            stream: true,
            options: GenerateOptions {
                num_thread: self.config.num_thread,
                num_gpu: self.config.num_gpu,
                num_ctx: self.config.num_ctx,
            },
        };
        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(
            target: "relay::stream",
            model = %self.config.name,
            prompt_len = prompt.len(),
            "Model stream opened"
        );

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(pump(response, tx));
        Ok(rx)
    }
}

/// Reads the response body line by line until EOF, a failure, or the receiver going away.
/// Returning drops the response and with it the upstream connection.
async fn pump(response: reqwest::Response, tx: mpsc::Sender<Result<ModelFragment, RelayError>>) {
    let mut body = Box::pin(response.bytes_stream());
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!(target: "relay::stream", "Fragment receiver dropped, closing upstream");
                return;
            }
            chunk = body.next() => chunk,
        };
        match chunk {
            None => break,
            Some(Err(e)) => {
                let _ = tx.send(Err(RelayError::Transport(e.to_string()))).await;
                return;
            }
            Some(Ok(bytes)) => {
                pending.extend_from_slice(&bytes);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    if !forward_line(&line, &tx).await {
                        return;
                    }
                }
            }
        }
    }
    forward_line(&pending, &tx).await;
}

/// Decodes and sends one NDJSON line. Returns false when the pump should stop.
async fn forward_line(line: &[u8], tx: &mpsc::Sender<Result<ModelFragment, RelayError>>) -> bool {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    let fragment = serde_json::from_str::<ModelFragment>(line).map_err(RelayError::from);
    let decoded = fragment.is_ok();
    tx.send(fragment).await.is_ok() && decoded
}
