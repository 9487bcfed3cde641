use common::{Candidate, CoreResult, DegradedReason};

use crate::{
    fusion::{DEFAULT_ALPHA, DEFAULT_BETA, MAX_CHUNKS_PER_FILE, dedup_per_file, fuse},
    keyword::KeywordIndex,
    vector::VectorIndex,
};

/// Both sub-searches over-fetch `OVERFETCH_FACTOR * k` before fusion and
/// per-file dedup trim the list back down.
pub const OVERFETCH_FACTOR: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    pub candidates: Vec<Candidate>,
    pub degraded_reasons: Vec<DegradedReason>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub alpha: f32,
    pub beta: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
        }
    }
}

/// Hybrid retrieval over one project's indexes. The query vector is
/// precomputed by the caller (the query-cache path already embeds the
/// query); `None` with vectors requested degrades to keyword-only and says
/// why.
pub fn hybrid_search(
    keyword: &KeywordIndex,
    vector: Option<&VectorIndex>,
    query: &str,
    query_vector: Option<&[f32]>,
    k: usize,
    weights: FusionWeights,
    use_vector: bool,
) -> CoreResult<RetrievalOutcome> {
    if query.trim().is_empty() || k == 0 {
        return Ok(RetrievalOutcome {
            candidates: Vec::new(),
            degraded_reasons: Vec::new(),
        });
    }

    let fetch = k.saturating_mul(OVERFETCH_FACTOR);
    let keyword_hits = keyword
        .search(query, fetch)
        .map_err(|err| common::CoreError::Unavailable(format!("keyword search: {err}")))?;

    let mut degraded_reasons = Vec::new();
    let vector_hits = if use_vector {
        match (vector, query_vector) {
            (Some(index), Some(query_vector)) => Some(index.search(query_vector, fetch)?),
            (Some(_), None) => {
                degraded_reasons.push(DegradedReason::EmbedderUnavailable);
                None
            }
            (None, _) => {
                degraded_reasons.push(DegradedReason::VectorUnavailable);
                None
            }
        }
    } else {
        None
    };

    let fused = fuse(
        &keyword_hits,
        vector_hits.as_deref(),
        weights.alpha,
        weights.beta,
    );
    let mut candidates = dedup_per_file(fused, MAX_CHUNKS_PER_FILE);
    candidates.truncate(fetch);

    Ok(RetrievalOutcome {
        candidates,
        degraded_reasons,
    })
}

#[cfg(test)]
mod tests {
    use common::{Chunk, DegradedReason, FileKind};

    use super::{FusionWeights, hybrid_search};
    use crate::{keyword::KeywordIndex, vector::VectorIndex, vector::VectorRow};

    fn keyword_index() -> KeywordIndex {
        let mut index = KeywordIndex::new_in_memory().expect("index");
        index
            .upsert_chunks(&[Chunk {
                id: "p:a.py:0".to_string(),
                path: "a.py".to_string(),
                ordinal: 0,
                start_line: 1,
                end_line: 2,
                kind: FileKind::Code,
                text: "def login(u, p):\n    return check(u, p)".to_string(),
            }])
            .expect("upsert");
        index
    }

    #[test]
    fn empty_query_returns_empty_without_touching_indexes() {
        let keyword = keyword_index();
        let outcome = hybrid_search(
            &keyword,
            None,
            "   ",
            None,
            5,
            FusionWeights::default(),
            true,
        )
        .expect("outcome");
        assert!(outcome.candidates.is_empty());
        assert!(outcome.degraded_reasons.is_empty());
    }

    #[test]
    fn missing_query_vector_flags_embedder_unavailable() {
        let keyword = keyword_index();
        let base = std::env::temp_dir().join(format!("quarry-retrieval-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).expect("mkdir");
        let mut vector = VectorIndex::create(
            2,
            &base.join("vector.idx"),
            &base.join("vector.meta.jsonl"),
        )
        .expect("vector");
        vector
            .upsert(
                vec![VectorRow {
                    chunk_id: "p:a.py:0".to_string(),
                    path: "a.py".to_string(),
                    start_line: 1,
                    end_line: 2,
                    text: "def login".to_string(),
                    deleted: false,
                }],
                &[vec![1.0, 0.0]],
            )
            .expect("upsert");

        let outcome = hybrid_search(
            &keyword,
            Some(&vector),
            "login",
            None,
            5,
            FusionWeights::default(),
            true,
        )
        .expect("outcome");
        assert_eq!(
            outcome.degraded_reasons,
            vec![DegradedReason::EmbedderUnavailable]
        );
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].chunk_id, "p:a.py:0");
    }

    #[test]
    fn vector_disabled_projects_do_not_flag_degradation() {
        let keyword = keyword_index();
        let outcome = hybrid_search(
            &keyword,
            None,
            "login",
            None,
            5,
            FusionWeights::default(),
            false,
        )
        .expect("outcome");
        assert!(outcome.degraded_reasons.is_empty());
        assert_eq!(outcome.candidates.len(), 1);
    }
}
