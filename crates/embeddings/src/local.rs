use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, anyhow};
use ort::{session::Session, value::Tensor};
use tokenizers::{EncodeInput, Tokenizer};

use crate::{config::EmbeddingConfig, normalize_in_place};

/// In-process embedding backend over a shipped ONNX model. Produces the
/// local dimension; not interchangeable with remote vectors.
#[derive(Clone)]
pub struct LocalEmbedder {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    session: Mutex<Session>,
    tokenizer: Option<Tokenizer>,
    dim: usize,
    max_sequence_length: usize,
}

struct EncodedBatch {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    batch_size: usize,
    seq_len: usize,
}

impl LocalEmbedder {
    pub fn from_config(cfg: &EmbeddingConfig) -> Result<Self> {
        let model_path = Path::new(&cfg.local_model_path);
        if !model_path.exists() {
            return Err(anyhow!(
                "embedding model not found at {}",
                model_path.display()
            ));
        }
        let session = Session::builder()
            .context("failed to create ONNX session builder")?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ONNX model {}", model_path.display()))?;
        let tokenizer = load_tokenizer(cfg)?;
        Ok(Self {
            inner: Arc::new(LocalInner {
                session: Mutex::new(session),
                tokenizer,
                dim: cfg.local_dim,
                max_sequence_length: cfg.max_sequence_length.max(1),
            }),
        })
    }

    pub fn dim(&self) -> usize {
        self.inner.dim
    }

    pub fn embed_blocking(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let encoded = self.inner.encode(inputs)?;
        let mut session = self
            .inner
            .session
            .lock()
            .map_err(|_| anyhow!("embedding session lock poisoned"))?;

        let shape = vec![encoded.batch_size as i64, encoded.seq_len as i64];
        let ids_tensor = Tensor::<i64>::from_array((shape.clone(), encoded.input_ids.clone()))?;
        let mask_tensor =
            Tensor::<i64>::from_array((shape.clone(), encoded.attention_mask.clone()))?;
        let token_type_tensor = Tensor::<i64>::from_array((
            shape,
            vec![0i64; encoded.batch_size * encoded.seq_len],
        ))?;

        let mut model_inputs = HashMap::new();
        for input in session.inputs() {
            let name = input.name().to_lowercase();
            let value = if name.contains("attention") && name.contains("mask") {
                mask_tensor.clone().upcast()
            } else if name.contains("token_type") {
                token_type_tensor.clone().upcast()
            } else {
                ids_tensor.clone().upcast()
            };
            model_inputs.insert(input.name().to_string(), value);
        }

        let mut outputs = session.run(model_inputs)?;
        let first_key = outputs
            .keys()
            .next()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("embedding model returned no outputs"))?;
        let output = outputs
            .remove(first_key)
            .ok_or_else(|| anyhow!("embedding model output extraction failed"))?;
        let (shape, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|err| anyhow!("embedding output decode failed: {err}"))?;

        let mut vectors = mean_pool(
            shape,
            values,
            encoded.batch_size,
            encoded.seq_len,
            &encoded.attention_mask,
            self.inner.dim,
        )?;
        for vector in &mut vectors {
            normalize_in_place(vector);
        }
        Ok(vectors)
    }
}

impl LocalInner {
    fn encode(&self, inputs: &[String]) -> Result<EncodedBatch> {
        let seq_len = self.max_sequence_length;
        let mut input_ids = vec![0i64; inputs.len() * seq_len];
        let mut attention_mask = vec![0i64; inputs.len() * seq_len];

        if let Some(tokenizer) = &self.tokenizer {
            let encode_inputs = inputs
                .iter()
                .map(|text| EncodeInput::Single(text.as_str().into()))
                .collect::<Vec<_>>();
            let encodings = tokenizer
                .encode_batch(encode_inputs, true)
                .map_err(|err| anyhow!("tokenization failed: {err}"))?;
            for (row, encoding) in encodings.iter().enumerate() {
                for (col, token_id) in encoding.get_ids().iter().take(seq_len).enumerate() {
                    input_ids[row * seq_len + col] = i64::from(*token_id);
                    attention_mask[row * seq_len + col] = 1;
                }
            }
        } else {
            for (row, text) in inputs.iter().enumerate() {
                for (col, byte) in text.as_bytes().iter().take(seq_len).enumerate() {
                    input_ids[row * seq_len + col] = i64::from(*byte) + 1;
                    attention_mask[row * seq_len + col] = 1;
                }
            }
        }

        Ok(EncodedBatch {
            input_ids,
            attention_mask,
            batch_size: inputs.len(),
            seq_len,
        })
    }
}

fn load_tokenizer(cfg: &EmbeddingConfig) -> Result<Option<Tokenizer>> {
    let Some(path) = cfg.local_tokenizer_path.as_ref() else {
        return Ok(None);
    };
    let tokenizer = Tokenizer::from_file(path)
        .map_err(|err| anyhow!("failed loading tokenizer from {path}: {err}"))?;
    Ok(Some(tokenizer))
}

fn mean_pool(
    shape: &[i64],
    values: &[f32],
    batch_size: usize,
    seq_len: usize,
    attention_mask: &[i64],
    target_dim: usize,
) -> Result<Vec<Vec<f32>>> {
    if shape.len() < 2 {
        return Err(anyhow!(
            "embedding output rank {} is unsupported",
            shape.len()
        ));
    }

    // Rank-2 outputs are already pooled by the model.
    if shape.len() == 2 {
        let hidden = usize::try_from(shape[1]).unwrap_or(0);
        if hidden == 0 || values.len() < batch_size * hidden {
            return Err(anyhow!("embedding output tensor too small"));
        }
        let mut out = Vec::with_capacity(batch_size);
        for batch in 0..batch_size {
            let start = batch * hidden;
            out.push(fit_dim(&values[start..start + hidden], target_dim));
        }
        return Ok(out);
    }

    let hidden = usize::try_from(shape[shape.len() - 1]).unwrap_or(0);
    if hidden == 0 {
        return Err(anyhow!("embedding output hidden dimension is invalid"));
    }
    let model_seq_len = usize::try_from(shape[shape.len() - 2]).unwrap_or(seq_len);
    if values.len() < batch_size * model_seq_len * hidden {
        return Err(anyhow!("embedding output tensor too small for pooling"));
    }

    let mut out = Vec::with_capacity(batch_size);
    for batch in 0..batch_size {
        let mut pooled = vec![0.0f32; hidden];
        let mut denom = 0.0f32;
        for token in 0..model_seq_len {
            let mask_index = batch * seq_len + token.min(seq_len.saturating_sub(1));
            if attention_mask.get(mask_index).copied().unwrap_or(0) == 0 {
                continue;
            }
            denom += 1.0;
            let base = (batch * model_seq_len + token) * hidden;
            for (slot, value) in pooled.iter_mut().zip(&values[base..base + hidden]) {
                *slot += value;
            }
        }
        if denom > 0.0 {
            for value in &mut pooled {
                *value /= denom;
            }
        }
        out.push(fit_dim(&pooled, target_dim));
    }
    Ok(out)
}

fn fit_dim(values: &[f32], target_dim: usize) -> Vec<f32> {
    if target_dim == 0 {
        return Vec::new();
    }
    if values.len() >= target_dim {
        return values[..target_dim].to_vec();
    }
    let mut out = vec![0.0f32; target_dim];
    out[..values.len()].copy_from_slice(values);
    out
}

#[cfg(test)]
mod tests {
    use super::{LocalEmbedder, fit_dim};
    use crate::config::EmbeddingConfig;

    #[test]
    fn fit_dim_truncates_and_pads() {
        assert_eq!(fit_dim(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(fit_dim(&[1.0], 3), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn missing_model_is_reported() {
        let cfg = EmbeddingConfig {
            local_model_path: "/tmp/does-not-exist.onnx".to_string(),
            ..EmbeddingConfig::default()
        };
        let err = LocalEmbedder::from_config(&cfg).expect_err("missing model");
        assert!(err.to_string().contains("embedding model not found"));
    }
}
