use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use common::{Candidate, config::CacheSettings, projects::atomic_write};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::vector::{read_matrix, write_matrix};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedAnswer {
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CacheEntry {
    query: String,
    k: usize,
    value: CachedAnswer,
    inserted_unix: u64,
}

struct SemanticEntry {
    embedding: Vec<f32>,
    entry: CacheEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Expired,
}

/// Two-tier per-project answer cache. The exact tier is a hashed-key LRU;
/// the semantic tier is a nearest-neighbor lookup over query embeddings
/// with a minimum-cosine threshold. Each tier has its own lock. Both tiers
/// persist best-effort; a cache that fails to load starts empty.
pub struct QueryCache {
    project_id: String,
    exact: Mutex<LruCache<String, CacheEntry>>,
    semantic: Mutex<Vec<SemanticEntry>>,
    ttl_secs: u64,
    capacity: usize,
    threshold: f32,
    /// `None` for embedding-disabled projects: the semantic tier is inert.
    dim: Option<usize>,
    exact_path: PathBuf,
    semantic_index_path: PathBuf,
    semantic_meta_path: PathBuf,
}

impl QueryCache {
    pub fn open(
        project_id: &str,
        settings: &CacheSettings,
        dim: Option<usize>,
        exact_path: &Path,
        semantic_index_path: &Path,
        semantic_meta_path: &Path,
    ) -> Self {
        let capacity = settings.capacity.max(1);
        let cache = Self {
            project_id: project_id.to_string(),
            exact: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            semantic: Mutex::new(Vec::new()),
            ttl_secs: settings.ttl_secs,
            capacity,
            threshold: settings.semantic_threshold,
            dim,
            exact_path: exact_path.to_path_buf(),
            semantic_index_path: semantic_index_path.to_path_buf(),
            semantic_meta_path: semantic_meta_path.to_path_buf(),
        };
        cache.load();
        cache
    }

    pub fn lookup_exact(&self, query: &str, k: usize) -> Option<CachedAnswer> {
        let key = self.exact_key(query, k);
        let mut exact = self.exact.lock();
        match exact.get(&key) {
            Some(entry) if !self.expired(entry) => Some(entry.value.clone()),
            Some(_) => {
                exact.pop(&key);
                None
            }
            None => None,
        }
    }

    /// Nearest-neighbor lookup; a hit writes through to the exact tier
    /// under the current query's key.
    pub fn lookup_semantic(
        &self,
        query: &str,
        k: usize,
        query_vector: &[f32],
    ) -> Option<CachedAnswer> {
        if self.dim != Some(query_vector.len()) {
            return None;
        }
        let best = {
            let semantic = self.semantic.lock();
            semantic
                .iter()
                .filter(|entry| entry.entry.k == k && !self.expired(&entry.entry))
                .map(|entry| (cosine(&entry.embedding, query_vector), entry.entry.clone()))
                .max_by(|a, b| a.0.total_cmp(&b.0))
        };
        let (similarity, entry) = best?;
        if similarity < self.threshold {
            return None;
        }

        let key = self.exact_key(query, k);
        self.exact.lock().put(
            key,
            CacheEntry {
                query: query.to_string(),
                k,
                value: entry.value.clone(),
                inserted_unix: entry.inserted_unix,
            },
        );
        Some(entry.value)
    }

    pub fn put(&self, query: &str, k: usize, query_vector: Option<&[f32]>, value: CachedAnswer) {
        let entry = CacheEntry {
            query: query.to_string(),
            k,
            value,
            inserted_unix: unix_now(),
        };
        self.exact.lock().put(self.exact_key(query, k), entry.clone());

        if let Some(vector) = query_vector
            && self.dim == Some(vector.len())
        {
            let mut semantic = self.semantic.lock();
            semantic.retain(|existing| !(existing.entry.query == query && existing.entry.k == k));
            semantic.push(SemanticEntry {
                embedding: vector.to_vec(),
                entry,
            });
            let len = semantic.len();
            if len > self.capacity {
                semantic.drain(..len - self.capacity);
            }
        }
        self.persist();
    }

    pub fn clear(&self, scope: ClearScope) -> usize {
        let evicted = match scope {
            ClearScope::All => {
                let mut exact = self.exact.lock();
                let mut semantic = self.semantic.lock();
                let count = exact.len() + semantic.len();
                exact.clear();
                semantic.clear();
                count
            }
            ClearScope::Expired => {
                let mut count = 0;
                {
                    let mut exact = self.exact.lock();
                    let expired_keys = exact
                        .iter()
                        .filter(|(_, entry)| self.expired(entry))
                        .map(|(key, _)| key.clone())
                        .collect::<Vec<_>>();
                    count += expired_keys.len();
                    for key in expired_keys {
                        exact.pop(&key);
                    }
                }
                {
                    let mut semantic = self.semantic.lock();
                    let before = semantic.len();
                    semantic.retain(|entry| !self.expired(&entry.entry));
                    count += before - semantic.len();
                }
                count
            }
        };
        self.persist();
        evicted
    }

    pub fn status(&self) -> (usize, usize) {
        (self.exact.lock().len(), self.semantic.lock().len())
    }

    fn exact_key(&self, query: &str, k: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.trim().to_lowercase().as_bytes());
        hasher.update(self.project_id.as_bytes());
        hasher.update(k.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn expired(&self, entry: &CacheEntry) -> bool {
        unix_now().saturating_sub(entry.inserted_unix) > self.ttl_secs
    }

    fn load(&self) {
        if self.exact_path.exists() {
            match fs::read_to_string(&self.exact_path) {
                Ok(raw) => {
                    let mut exact = self.exact.lock();
                    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                        if let Ok(entry) = serde_json::from_str::<CacheEntry>(line) {
                            let key = self.exact_key(&entry.query, entry.k);
                            exact.put(key, entry);
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed loading exact cache tier"),
            }
        }

        let Some(dim) = self.dim else {
            return;
        };
        if !self.semantic_index_path.exists() || !self.semantic_meta_path.exists() {
            return;
        }
        let matrix = match read_matrix(&self.semantic_index_path) {
            Ok((stored_dim, data)) if stored_dim == dim => data,
            Ok(_) | Err(_) => {
                tracing::warn!("semantic cache index unreadable, starting empty");
                return;
            }
        };
        let raw = match fs::read_to_string(&self.semantic_meta_path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "failed loading semantic cache meta");
                return;
            }
        };
        let mut semantic = self.semantic.lock();
        for (row, line) in raw.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let start = row * dim;
            let Some(embedding) = matrix.get(start..start + dim) else {
                break;
            };
            if let Ok(entry) = serde_json::from_str::<CacheEntry>(line) {
                semantic.push(SemanticEntry {
                    embedding: embedding.to_vec(),
                    entry,
                });
            }
        }
    }

    /// Best-effort: a cache that cannot be persisted still serves from
    /// memory.
    fn persist(&self) {
        let mut exact_lines = String::new();
        {
            let exact = self.exact.lock();
            for (_, entry) in exact.iter() {
                if let Ok(line) = serde_json::to_string(entry) {
                    exact_lines.push_str(&line);
                    exact_lines.push('\n');
                }
            }
        }
        if let Err(err) = atomic_write(&self.exact_path, exact_lines.as_bytes()) {
            tracing::warn!(error = %err, "failed persisting exact cache tier");
        }

        let Some(dim) = self.dim else {
            return;
        };
        let (matrix, meta_lines) = {
            let semantic = self.semantic.lock();
            let mut matrix = Vec::with_capacity(semantic.len() * dim);
            let mut meta_lines = String::new();
            for entry in semantic.iter() {
                matrix.extend_from_slice(&entry.embedding);
                if let Ok(line) = serde_json::to_string(&entry.entry) {
                    meta_lines.push_str(&line);
                    meta_lines.push('\n');
                }
            }
            (matrix, meta_lines)
        };
        if let Err(err) = write_matrix(&self.semantic_index_path, dim, &matrix) {
            tracing::warn!(error = %err, "failed persisting semantic cache index");
        }
        if let Err(err) = atomic_write(&self.semantic_meta_path, meta_lines.as_bytes()) {
            tracing::warn!(error = %err, "failed persisting semantic cache meta");
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    // Embeddings are unit-normalized, so the inner product is the cosine.
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn unix_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}
