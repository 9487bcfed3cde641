use std::time::Duration;

use common::config::EmbeddingSettings;

pub const MAX_BATCH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub remote_dim: usize,
    pub local_dim: usize,
    pub local_model_path: String,
    pub local_tokenizer_path: Option<String>,
    pub timeout: Duration,
    pub max_sequence_length: usize,
    pub allow_pseudo: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default())
    }
}

impl EmbeddingConfig {
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            remote_dim: settings.remote_dim,
            local_dim: settings.local_dim,
            local_model_path: settings.local_model_path.clone(),
            local_tokenizer_path: settings.local_tokenizer_path.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            max_sequence_length: 256,
            allow_pseudo: settings.allow_pseudo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EmbeddingConfig;

    #[test]
    fn defaults_mirror_common_settings() {
        let cfg = EmbeddingConfig::default();
        assert_eq!(cfg.remote_dim, 1536);
        assert_eq!(cfg.local_dim, 384);
        assert_eq!(cfg.timeout.as_secs(), 30);
        assert!(!cfg.allow_pseudo);
    }
}
