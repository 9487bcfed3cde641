use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{CoreError, CoreResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{config::EmbeddingConfig, config::MAX_BATCH, normalize_in_place};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER: f64 = 0.2;

/// OpenAI-compatible embeddings client. Batches are capped at
/// [`MAX_BATCH`] inputs; network and 5xx failures retry with exponential
/// backoff; a wrong-dimension response is fatal for the call.
pub struct RemoteEmbedder {
    client: Mutex<reqwest::Client>,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

enum RequestFailure {
    Transient(String),
    Fatal(CoreError),
}

impl RemoteEmbedder {
    pub fn from_config(cfg: &EmbeddingConfig) -> CoreResult<Self> {
        let endpoint = cfg
            .endpoint
            .clone()
            .ok_or_else(|| CoreError::Unavailable("no remote embedding endpoint configured".into()))?;
        Ok(Self {
            client: Mutex::new(build_client(cfg.timeout)?),
            endpoint,
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            dim: cfg.remote_dim,
            timeout: cfg.timeout,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Drops the connection pool. Called before the single permitted retry
    /// after a dimension mismatch.
    pub fn reset(&self) -> CoreResult<()> {
        *self.client.lock() = build_client(self.timeout)?;
        Ok(())
    }

    pub async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            out.extend(self.embed_batch_with_retry(batch).await?);
        }
        Ok(out)
    }

    async fn embed_batch_with_retry(&self, batch: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.request(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(RequestFailure::Transient(message)) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(CoreError::Transient(message));
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(RequestFailure::Fatal(err)) => return Err(err),
            }
        }
    }

    async fn request(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RequestFailure> {
        let client = self.client.lock().clone();
        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let mut request = client.post(url).json(&EmbeddingsRequest {
            model: &self.model,
            input: batch,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RequestFailure::Transient(format!("embedding request: {err}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(RequestFailure::Transient(format!(
                "embedding endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(RequestFailure::Fatal(CoreError::Unavailable(format!(
                "embedding endpoint returned {status}"
            ))));
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| RequestFailure::Transient(format!("embedding response decode: {err}")))?;
        if body.data.len() != batch.len() {
            return Err(RequestFailure::Fatal(CoreError::Unavailable(format!(
                "embedding endpoint returned {} rows for {} inputs",
                body.data.len(),
                batch.len()
            ))));
        }

        let mut vectors = Vec::with_capacity(body.data.len());
        for row in body.data {
            if row.embedding.len() != self.dim {
                return Err(RequestFailure::Fatal(CoreError::DimensionMismatch {
                    expected: self.dim,
                    got: row.embedding.len(),
                }));
            }
            let mut vector = row.embedding;
            normalize_in_place(&mut vector);
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

fn build_client(timeout: Duration) -> CoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| CoreError::Unavailable(format!("embedding client construction: {err}")))
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let ms = (base_ms as f64 * (1.0 + jitter_fraction())).max(1.0);
    Duration::from_millis(ms as u64)
}

fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let unit = f64::from(nanos % 1_000_000) / 1_000_000.0;
    (unit * 2.0 - 1.0) * BACKOFF_JITTER
}

#[cfg(test)]
mod tests {
    use super::{RemoteEmbedder, backoff_delay};
    use crate::config::EmbeddingConfig;

    #[test]
    fn construction_requires_an_endpoint() {
        let err = RemoteEmbedder::from_config(&EmbeddingConfig::default()).expect_err("no endpoint");
        assert!(err.to_string().contains("no remote embedding endpoint"));
    }

    #[test]
    fn backoff_doubles_per_attempt_within_jitter() {
        let first = backoff_delay(1).as_millis() as f64;
        let second = backoff_delay(2).as_millis() as f64;
        let third = backoff_delay(3).as_millis() as f64;
        assert!((400.0..=600.0).contains(&first), "first={first}");
        assert!((800.0..=1200.0).contains(&second), "second={second}");
        assert!((1600.0..=2400.0).contains(&third), "third={third}");
    }
}
