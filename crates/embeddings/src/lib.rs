pub mod config;
pub mod local;
pub mod remote;

use common::{CoreError, CoreResult};

pub use config::{EmbeddingConfig, MAX_BATCH};
pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

/// Embedding backend chosen once at startup. Remote is preferred; local is
/// the fallback when remote construction fails; pseudo exists only behind
/// an explicit opt-in for test scaffolding.
pub enum Embedder {
    Remote(RemoteEmbedder),
    Local(LocalEmbedder),
    Pseudo { dim: usize },
}

impl Embedder {
    pub fn from_config(cfg: &EmbeddingConfig) -> CoreResult<Self> {
        if cfg.allow_pseudo {
            return Ok(Self::Pseudo { dim: cfg.local_dim });
        }
        if cfg.endpoint.is_some() {
            match RemoteEmbedder::from_config(cfg) {
                Ok(remote) => return Ok(Self::Remote(remote)),
                Err(err) => {
                    tracing::warn!(error = %err, "remote embedder unavailable, trying local model");
                }
            }
        }
        match LocalEmbedder::from_config(cfg) {
            Ok(local) => Ok(Self::Local(local)),
            Err(err) => Err(CoreError::Unavailable(format!(
                "no embedding backend available: {err}"
            ))),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Remote(remote) => remote.dim(),
            Self::Local(local) => local.dim(),
            Self::Pseudo { dim } => *dim,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Local(_) => "local",
            Self::Pseudo { .. } => "pseudo",
        }
    }

    /// Embeds a batch of texts into unit-normalized vectors of `dim()`
    /// elements. A remote dimension mismatch resets the backend and retries
    /// exactly once before surfacing the error.
    pub async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Remote(remote) => match remote.embed(texts).await {
                Err(CoreError::DimensionMismatch { expected, got }) => {
                    tracing::warn!(expected, got, "dimension mismatch, resetting embedder");
                    remote.reset()?;
                    remote.embed(texts).await
                }
                other => other,
            },
            Self::Local(local) => {
                let local = local.clone();
                let owned = texts.to_vec();
                tokio::task::spawn_blocking(move || local.embed_blocking(&owned))
                    .await
                    .map_err(|_| CoreError::Fatal("local embedding task panicked".into()))?
                    .map_err(|err| CoreError::Unavailable(err.to_string()))
            }
            Self::Pseudo { dim } => Ok(texts.iter().map(|text| pseudo_embed(text, *dim)).collect()),
        }
    }
}

/// Scales a vector to unit L2 norm; zero vectors are left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Deterministic byte-histogram embedding for tests. Identical inputs map
/// to identical vectors; shared trigrams give related inputs nonzero
/// similarity.
fn pseudo_embed(input: &str, dim: usize) -> Vec<f32> {
    let dim = dim.max(1);
    let mut out = vec![0.0f32; dim];
    let bytes = input.as_bytes();
    for (idx, b) in bytes.iter().enumerate() {
        out[usize::from(*b) % dim] += 1.0;
        if idx + 2 < bytes.len() {
            let trigram = usize::from(bytes[idx])
                .wrapping_mul(31)
                .wrapping_add(usize::from(bytes[idx + 1]))
                .wrapping_mul(31)
                .wrapping_add(usize::from(bytes[idx + 2]));
            out[trigram % dim] += 0.5;
        }
    }
    normalize_in_place(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::{Embedder, EmbeddingConfig, normalize_in_place, pseudo_embed};

    fn pseudo() -> Embedder {
        Embedder::from_config(&EmbeddingConfig {
            allow_pseudo: true,
            ..EmbeddingConfig::default()
        })
        .expect("pseudo backend")
    }

    #[tokio::test]
    async fn pseudo_backend_embeds_unit_vectors() {
        let embedder = pseudo();
        assert_eq!(embedder.name(), "pseudo");
        let vectors = embedder
            .embed(&["hello".to_string(), "world".to_string()])
            .await
            .expect("vectors");
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), embedder.dim());
        let norm = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let embedder = pseudo();
        let vectors = embedder.embed(&[]).await.expect("empty");
        assert!(vectors.is_empty());
    }

    #[test]
    fn pseudo_embedding_is_deterministic() {
        assert_eq!(pseudo_embed("fn main() {}", 64), pseudo_embed("fn main() {}", 64));
        assert_ne!(pseudo_embed("alpha", 64), pseudo_embed("omega", 64));
    }

    #[test]
    fn normalize_leaves_zero_vectors_alone() {
        let mut zeros = vec![0.0f32; 4];
        normalize_in_place(&mut zeros);
        assert_eq!(zeros, vec![0.0f32; 4]);
    }

    proptest::proptest! {
        #[test]
        fn pseudo_embeddings_are_unit_normalized(input in ".{1,200}", dim in 1usize..512) {
            let vector = pseudo_embed(&input, dim);
            proptest::prop_assert_eq!(vector.len(), dim);
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            proptest::prop_assert!((norm - 1.0).abs() < 1e-4);
        }
    }
}
