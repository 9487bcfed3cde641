use ahash::AHashMap;
use common::Candidate;

use crate::{keyword::KeywordHit, vector::VectorHit};

pub const DEFAULT_ALPHA: f32 = 0.5;
pub const DEFAULT_BETA: f32 = 0.5;
pub const MAX_CHUNKS_PER_FILE: usize = 2;

/// Merges the two sub-search result lists by chunk id. Keyword scores are
/// normalized by the in-list maximum; the fused score is
/// `alpha * normalized_keyword + beta * vector`. When no vector list exists
/// (degraded keyword-only mode) the fused score is the normalized keyword
/// score itself. Output is ordered fused-score descending, ties by chunk id
/// ascending.
pub fn fuse(
    keyword: &[KeywordHit],
    vector: Option<&[VectorHit]>,
    alpha: f32,
    beta: f32,
) -> Vec<Candidate> {
    let max_keyword = keyword
        .iter()
        .map(|hit| hit.score)
        .fold(0.0f32, f32::max);

    let mut merged: AHashMap<String, Candidate> = AHashMap::new();
    for hit in keyword {
        let normalized = if max_keyword > 0.0 {
            hit.score / max_keyword
        } else {
            0.0
        };
        merged.insert(
            hit.chunk_id.clone(),
            Candidate {
                chunk_id: hit.chunk_id.clone(),
                path: hit.path.clone(),
                start_line: hit.start_line,
                end_line: hit.end_line,
                text: hit.text.clone(),
                keyword_score: Some(normalized),
                vector_score: None,
                fused_score: 0.0,
            },
        );
    }

    if let Some(vector) = vector {
        for hit in vector {
            merged
                .entry(hit.chunk_id.clone())
                .and_modify(|candidate| candidate.vector_score = Some(hit.score))
                .or_insert_with(|| Candidate {
                    chunk_id: hit.chunk_id.clone(),
                    path: hit.path.clone(),
                    start_line: hit.start_line,
                    end_line: hit.end_line,
                    text: hit.text.clone(),
                    keyword_score: None,
                    vector_score: Some(hit.score),
                    fused_score: 0.0,
                });
        }
    }

    let keyword_only = vector.is_none();
    let mut candidates = merged.into_values().collect::<Vec<_>>();
    for candidate in &mut candidates {
        let kw = candidate.keyword_score.unwrap_or(0.0);
        let vs = candidate.vector_score.unwrap_or(0.0);
        candidate.fused_score = if keyword_only { kw } else { alpha * kw + beta * vs };
    }
    candidates.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates
}

/// Keeps at most `max_per_file` chunks per source path, preserving order.
pub fn dedup_per_file(candidates: Vec<Candidate>, max_per_file: usize) -> Vec<Candidate> {
    let mut seen: AHashMap<String, usize> = AHashMap::new();
    candidates
        .into_iter()
        .filter(|candidate| {
            let count = seen.entry(candidate.path.clone()).or_insert(0);
            *count += 1;
            *count <= max_per_file
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{dedup_per_file, fuse};
    use crate::{keyword::KeywordHit, vector::VectorHit};

    fn kw(id: &str, path: &str, score: f32) -> KeywordHit {
        KeywordHit {
            chunk_id: id.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 2,
            text: "stub".to_string(),
            score,
        }
    }

    fn vh(id: &str, path: &str, score: f32) -> VectorHit {
        VectorHit {
            chunk_id: id.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 2,
            text: "stub".to_string(),
            score,
        }
    }

    #[test]
    fn chunks_in_both_lists_outrank_single_source_chunks() {
        let keyword = vec![kw("a", "a.rs", 4.0), kw("b", "b.rs", 2.0)];
        let vector = vec![vh("b", "b.rs", 0.9), vh("c", "c.rs", 0.8)];
        let fused = fuse(&keyword, Some(&vector), 0.5, 0.5);

        assert_eq!(fused[0].chunk_id, "b");
        let b = &fused[0];
        assert!((b.fused_score - (0.5 * 0.5 + 0.5 * 0.9)).abs() < 1e-6);
        assert_eq!(b.keyword_score, Some(0.5));
        assert_eq!(b.vector_score, Some(0.9));
    }

    #[test]
    fn keyword_only_mode_uses_normalized_score_directly() {
        let keyword = vec![kw("a", "a.rs", 8.0), kw("b", "b.rs", 4.0)];
        let fused = fuse(&keyword, None, 0.5, 0.5);
        assert!((fused[0].fused_score - 1.0).abs() < 1e-6);
        assert!((fused[1].fused_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_max_keyword_score_normalizes_to_zero() {
        let keyword = vec![kw("a", "a.rs", 0.0)];
        let fused = fuse(&keyword, None, 0.5, 0.5);
        assert_eq!(fused[0].keyword_score, Some(0.0));
        assert_eq!(fused[0].fused_score, 0.0);
    }

    #[test]
    fn ties_break_by_chunk_id_ascending() {
        let keyword = vec![kw("z", "z.rs", 3.0), kw("a", "a.rs", 3.0)];
        let fused = fuse(&keyword, None, 0.5, 0.5);
        assert_eq!(fused[0].chunk_id, "a");
        assert_eq!(fused[1].chunk_id, "z");
    }

    proptest::proptest! {
        #[test]
        fn dedup_never_exceeds_the_per_file_cap(
            paths in proptest::collection::vec(0u8..10, 0..100),
        ) {
            let keyword = paths
                .iter()
                .enumerate()
                .map(|(idx, path)| kw(&format!("c{idx}"), &format!("f{path}.rs"), idx as f32))
                .collect::<Vec<_>>();
            let deduped = dedup_per_file(fuse(&keyword, None, 0.5, 0.5), 2);
            for path in paths.iter().map(|p| format!("f{p}.rs")) {
                let count = deduped.iter().filter(|c| c.path == path).count();
                proptest::prop_assert!(count <= 2);
            }
        }
    }

    #[test]
    fn dedup_caps_chunks_per_source_path() {
        let keyword = vec![
            kw("a0", "a.rs", 5.0),
            kw("a1", "a.rs", 4.0),
            kw("a2", "a.rs", 3.0),
            kw("b0", "b.rs", 2.0),
        ];
        let fused = fuse(&keyword, None, 0.5, 0.5);
        let deduped = dedup_per_file(fused, 2);
        let from_a = deduped.iter().filter(|c| c.path == "a.rs").count();
        assert_eq!(from_a, 2);
        assert_eq!(deduped.len(), 3);
    }
}
