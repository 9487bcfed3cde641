use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{CoreError, CoreResult, config::LlmSettings};
use serde::{Deserialize, Serialize};

const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER: f64 = 0.2;

/// Chat-completions client for an OpenAI-compatible endpoint. Used by the
/// reranker and by answer generation; both treat failures as degradation,
/// never as hard errors.
pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl LlmClient {
    pub fn from_settings(settings: &LlmSettings) -> CoreResult<Option<Self>> {
        let Some(endpoint) = settings.endpoint.clone() else {
            return Ok(None);
        };
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CoreError::Unavailable(format!("llm client construction: {err}")))?;
        Ok(Some(Self {
            client,
            endpoint,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            timeout,
        }))
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn complete(&self, prompt: &str) -> CoreResult<String> {
        let mut attempt = 0u32;
        loop {
            match self.request(prompt).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(CoreError::Transient(err));
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "llm request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| format!("llm request: {err}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("llm endpoint returned {status}"));
        }
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| format!("llm response decode: {err}"))?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| "llm response contained no choices".to_string())
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let unit = f64::from(nanos % 1_000_000) / 1_000_000.0;
    let jitter = (unit * 2.0 - 1.0) * BACKOFF_JITTER;
    Duration::from_millis(((base_ms as f64) * (1.0 + jitter)).max(1.0) as u64)
}
