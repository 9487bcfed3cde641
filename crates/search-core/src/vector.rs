use std::{
    fs,
    path::{Path, PathBuf},
};

use common::{CoreError, CoreResult, projects::atomic_write};
use serde::{Deserialize, Serialize};

const INDEX_MAGIC: &[u8; 4] = b"QVIX";
const INDEX_VERSION: u32 = 1;
/// Compaction triggers once tombstones exceed a quarter of live rows.
const TOMBSTONE_RATIO_NUM: usize = 1;
const TOMBSTONE_RATIO_DEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorRow {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Flat inner-product index over unit-normalized vectors of one frozen
/// dimension, with a jsonl side table mapping row position to chunk
/// metadata. Deletes tombstone rows; compaction rewrites both files.
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    data: Vec<f32>,
    rows: Vec<VectorRow>,
    tombstones: usize,
    index_path: PathBuf,
    meta_path: PathBuf,
}

impl VectorIndex {
    pub fn create(dim: usize, index_path: &Path, meta_path: &Path) -> CoreResult<Self> {
        if dim == 0 {
            return Err(CoreError::Fatal("vector dimension must be non-zero".into()));
        }
        let index = Self {
            dim,
            data: Vec::new(),
            rows: Vec::new(),
            tombstones: 0,
            index_path: index_path.to_path_buf(),
            meta_path: meta_path.to_path_buf(),
        };
        index.persist()?;
        Ok(index)
    }

    pub fn open(dim: usize, index_path: &Path, meta_path: &Path) -> CoreResult<Self> {
        if !index_path.exists() {
            return Self::create(dim, index_path, meta_path);
        }
        let (stored_dim, data) = read_matrix(index_path)?;
        if stored_dim != dim {
            return Err(CoreError::Corrupt(format!(
                "vector index dimension {stored_dim} does not match project dimension {dim}"
            )));
        }
        let rows = read_meta(meta_path)?;
        if rows.len() * dim != data.len() {
            return Err(CoreError::Corrupt(format!(
                "vector index holds {} values for {} rows of dimension {dim}",
                data.len(),
                rows.len()
            )));
        }
        let tombstones = rows.iter().filter(|r| r.deleted).count();
        Ok(Self {
            dim,
            data,
            rows,
            tombstones,
            index_path: index_path.to_path_buf(),
            meta_path: meta_path.to_path_buf(),
        })
    }

    pub const fn dim(&self) -> usize {
        self.dim
    }

    pub fn live_count(&self) -> usize {
        self.rows.len() - self.tombstones
    }

    /// Idempotent per chunk id: rows carrying any of the incoming ids are
    /// tombstoned before the new rows are appended.
    pub fn upsert(&mut self, rows: Vec<VectorRow>, vectors: &[Vec<f32>]) -> CoreResult<()> {
        if rows.len() != vectors.len() {
            return Err(CoreError::Fatal(format!(
                "vector upsert got {} rows and {} vectors",
                rows.len(),
                vectors.len()
            )));
        }
        for vector in vectors {
            if vector.len() != self.dim {
                return Err(CoreError::DimensionMismatch {
                    expected: self.dim,
                    got: vector.len(),
                });
            }
        }

        for row in &rows {
            self.tombstone_id(&row.chunk_id);
        }
        for (row, vector) in rows.into_iter().zip(vectors) {
            self.rows.push(row);
            self.data.extend_from_slice(vector);
        }
        self.persist()
    }

    pub fn delete_by_file(&mut self, path: &str) -> CoreResult<()> {
        let mut touched = false;
        for row in &mut self.rows {
            if !row.deleted && row.path == path {
                row.deleted = true;
                self.tombstones += 1;
                touched = true;
            }
        }
        if touched {
            self.persist()?;
        }
        Ok(())
    }

    pub fn rebuild(&mut self) -> CoreResult<()> {
        self.data.clear();
        self.rows.clear();
        self.tombstones = 0;
        self.persist()
    }

    pub fn needs_compaction(&self) -> bool {
        let live = self.live_count();
        self.tombstones * TOMBSTONE_RATIO_DEN > live.max(1) * TOMBSTONE_RATIO_NUM
    }

    /// Drops tombstoned rows and rewrites both backing files.
    pub fn compact(&mut self) -> CoreResult<()> {
        if self.tombstones == 0 {
            return Ok(());
        }
        let mut data = Vec::with_capacity(self.live_count() * self.dim);
        let mut rows = Vec::with_capacity(self.live_count());
        for (position, row) in self.rows.iter().enumerate() {
            if row.deleted {
                continue;
            }
            let start = position * self.dim;
            data.extend_from_slice(&self.data[start..start + self.dim]);
            rows.push(row.clone());
        }
        self.data = data;
        self.rows = rows;
        self.tombstones = 0;
        self.persist()
    }

    /// Top-`limit` live rows by inner product (cosine, since vectors are
    /// unit-normalized), ties broken by chunk id ascending.
    pub fn search(&self, query: &[f32], limit: usize) -> CoreResult<Vec<VectorHit>> {
        if query.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        for (position, row) in self.rows.iter().enumerate() {
            if row.deleted {
                continue;
            }
            let start = position * self.dim;
            let score = dot(query, &self.data[start..start + self.dim]);
            scored.push((score, position));
        }
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| self.rows[a.1].chunk_id.cmp(&self.rows[b.1].chunk_id))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, position)| {
                let row = &self.rows[position];
                VectorHit {
                    chunk_id: row.chunk_id.clone(),
                    path: row.path.clone(),
                    start_line: row.start_line,
                    end_line: row.end_line,
                    text: row.text.clone(),
                    score,
                }
            })
            .collect())
    }

    pub fn chunk_ids_for_file(&self, path: &str) -> Vec<String> {
        let mut ids = self
            .rows
            .iter()
            .filter(|r| !r.deleted && r.path == path)
            .map(|r| r.chunk_id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn tombstone_id(&mut self, chunk_id: &str) {
        for row in &mut self.rows {
            if !row.deleted && row.chunk_id == chunk_id {
                row.deleted = true;
                self.tombstones += 1;
            }
        }
    }

    fn persist(&self) -> CoreResult<()> {
        write_matrix(&self.index_path, self.dim, &self.data)
            .map_err(|err| CoreError::io("failed writing vector index", &err))?;
        let mut meta = String::new();
        for row in &self.rows {
            let line = serde_json::to_string(row)
                .map_err(|err| CoreError::Fatal(format!("vector meta serialization: {err}")))?;
            meta.push_str(&line);
            meta.push('\n');
        }
        atomic_write(&self.meta_path, meta.as_bytes())
            .map_err(|err| CoreError::io("failed writing vector meta", &err))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Binary layout: magic, format version, dimension, row count, then
/// row-major little-endian f32 values.
pub(crate) fn write_matrix(path: &Path, dim: usize, data: &[f32]) -> std::io::Result<()> {
    let rows = if dim == 0 { 0 } else { data.len() / dim };
    let mut bytes = Vec::with_capacity(16 + data.len() * 4);
    bytes.extend_from_slice(INDEX_MAGIC);
    bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dim as u32).to_le_bytes());
    bytes.extend_from_slice(&(rows as u32).to_le_bytes());
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    atomic_write(path, &bytes)
}

pub(crate) fn read_matrix(path: &Path) -> CoreResult<(usize, Vec<f32>)> {
    let bytes = fs::read(path).map_err(|err| CoreError::io("failed reading vector index", &err))?;
    if bytes.len() < 16 || &bytes[..4] != INDEX_MAGIC {
        return Err(CoreError::Corrupt("vector index header".into()));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default());
    if version != INDEX_VERSION {
        return Err(CoreError::Corrupt(format!(
            "vector index version {version} is not supported"
        )));
    }
    let dim = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default()) as usize;
    let rows = u32::from_le_bytes(bytes[12..16].try_into().unwrap_or_default()) as usize;
    let expected = 16 + rows * dim * 4;
    if bytes.len() != expected {
        return Err(CoreError::Corrupt(format!(
            "vector index is {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    let mut data = Vec::with_capacity(rows * dim);
    for value in bytes[16..].chunks_exact(4) {
        data.push(f32::from_le_bytes(value.try_into().unwrap_or_default()));
    }
    Ok((dim, data))
}

fn read_meta(path: &Path) -> CoreResult<Vec<VectorRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|err| CoreError::io("failed reading vector meta", &err))?;
    let mut rows = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str::<VectorRow>(line)
            .map_err(|err| CoreError::Corrupt(format!("vector meta row: {err}")))?;
        rows.push(row);
    }
    Ok(rows)
}
