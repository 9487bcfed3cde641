use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: String,
    pub default_top_k: usize,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub cache: CacheSettings,
    pub catchup_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    /// Vector dimension delivered by the remote endpoint.
    pub remote_dim: usize,
    /// Vector dimension of the shipped local model. Remote and local
    /// dimensions are not interchangeable; a project freezes one at creation.
    pub local_dim: usize,
    pub local_model_path: String,
    pub local_tokenizer_path: Option<String>,
    pub timeout_secs: u64,
    /// Deterministic scaffolding backend for tests; never a silent fallback.
    pub allow_pseudo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Per-candidate byte budget when building the rerank prompt.
    pub rerank_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub capacity: usize,
    pub semantic_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: ".quarry".to_string(),
            default_top_k: 8,
            embedding: EmbeddingSettings::default(),
            llm: LlmSettings::default(),
            cache: CacheSettings::default(),
            catchup_timeout_secs: 300,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            remote_dim: 1536,
            local_dim: 384,
            local_model_path: "models/all-minilm-l6-v2.onnx".to_string(),
            local_tokenizer_path: None,
            timeout_secs: 30,
            allow_pseudo: false,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
            rerank_chunk_bytes: 1600,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 10_000,
            semantic_threshold: 0.95,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading config file: {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("failed parsing config file: {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("QUARRY_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Ok(endpoint) = std::env::var("QUARRY_EMBED_ENDPOINT") {
            self.embedding.endpoint = non_empty(endpoint);
        }
        if let Ok(model) = std::env::var("QUARRY_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(key) = std::env::var("QUARRY_EMBED_API_KEY") {
            self.embedding.api_key = non_empty(key);
        }
        if let Ok(dim) = std::env::var("QUARRY_EMBED_DIM") {
            self.embedding.remote_dim = dim.parse().unwrap_or(self.embedding.remote_dim);
        }
        if let Ok(path) = std::env::var("QUARRY_LOCAL_MODEL_PATH") {
            self.embedding.local_model_path = path;
        }
        if let Ok(path) = std::env::var("QUARRY_LOCAL_TOKENIZER_PATH") {
            self.embedding.local_tokenizer_path = non_empty(path);
        }
        if let Ok(secs) = std::env::var("QUARRY_EMBED_TIMEOUT_SECS") {
            self.embedding.timeout_secs = secs.parse().unwrap_or(self.embedding.timeout_secs);
        }
        if let Ok(endpoint) = std::env::var("QUARRY_LLM_ENDPOINT") {
            self.llm.endpoint = non_empty(endpoint);
        }
        if let Ok(model) = std::env::var("QUARRY_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("QUARRY_LLM_API_KEY") {
            self.llm.api_key = non_empty(key);
        }
        if let Ok(secs) = std::env::var("QUARRY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = secs.parse().unwrap_or(self.llm.timeout_secs);
        }
        if let Ok(secs) = std::env::var("QUARRY_CATCHUP_TIMEOUT_SECS") {
            self.catchup_timeout_secs = secs.parse().unwrap_or(self.catchup_timeout_secs);
        }
        if let Ok(secs) = std::env::var("QUARRY_CACHE_TTL_SECS") {
            self.cache.ttl_secs = secs.parse().unwrap_or(self.cache.ttl_secs);
        }
        if let Ok(cap) = std::env::var("QUARRY_CACHE_CAPACITY") {
            self.cache.capacity = cap.parse().unwrap_or(self.cache.capacity);
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::AppConfig;

    #[test]
    fn loads_default_when_file_missing() {
        let cfg = AppConfig::load(std::path::Path::new("does-not-exist.toml")).expect("config");
        assert_eq!(cfg.default_top_k, 8);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert!((cfg.cache.semantic_threshold - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn loads_toml_file_with_partial_overrides() {
        let mut path = std::env::temp_dir();
        path.push(format!("quarry-config-test-{}.toml", std::process::id()));
        fs::write(
            &path,
            "data_dir='/tmp/quarry-data'\ndefault_top_k=5\n[cache]\nttl_secs=60\n",
        )
        .expect("write");

        let cfg = AppConfig::load(path.as_path()).expect("config");
        assert_eq!(cfg.data_dir, "/tmp/quarry-data");
        assert_eq!(cfg.default_top_k, 5);
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.cache.capacity, 10_000);
    }
}
