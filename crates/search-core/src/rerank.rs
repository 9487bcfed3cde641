use ahash::AHashMap;
use common::{Candidate, DegradedReason};
use serde::Deserialize;

use crate::llm::LlmClient;

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub candidates: Vec<Candidate>,
    pub degraded: Option<DegradedReason>,
}

#[derive(Deserialize)]
struct RerankDecision {
    selected: Vec<SelectedChunk>,
}

#[derive(Deserialize)]
struct SelectedChunk {
    id: String,
}

/// LLM-driven reordering of the candidate list down to `final_k`. Fails
/// open: any LLM failure, timeout, or unparseable reply falls back to the
/// first `final_k` candidates in fused-score order, with the reason
/// reported to the caller.
pub async fn rerank(
    llm: Option<&LlmClient>,
    query: &str,
    candidates: Vec<Candidate>,
    final_k: usize,
    chunk_byte_budget: usize,
) -> RerankOutcome {
    if candidates.len() <= 1 || final_k == 0 {
        return fail_open(candidates, final_k, None);
    }
    let Some(llm) = llm else {
        return fail_open(candidates, final_k, Some(DegradedReason::RerankUnavailable));
    };

    let prompt = build_prompt(query, &candidates, chunk_byte_budget);
    let reply = match tokio::time::timeout(llm.timeout(), llm.complete(&prompt)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "rerank call failed, falling back to fused order");
            return fail_open(candidates, final_k, Some(DegradedReason::RerankUnavailable));
        }
        Err(_) => {
            tracing::warn!("rerank call timed out, falling back to fused order");
            return fail_open(candidates, final_k, Some(DegradedReason::RerankTimeout));
        }
    };

    let Some(decision) = parse_decision(&reply) else {
        tracing::warn!("rerank reply was not parseable, falling back to fused order");
        return fail_open(candidates, final_k, Some(DegradedReason::RerankUnavailable));
    };

    let mut by_id: AHashMap<String, Candidate> = candidates
        .into_iter()
        .map(|c| (c.chunk_id.clone(), c))
        .collect();
    let mut reranked = Vec::with_capacity(final_k);
    for selected in decision.selected {
        // Hallucinated or duplicate ids are ignored.
        if let Some(candidate) = by_id.remove(&selected.id) {
            reranked.push(candidate);
            if reranked.len() == final_k {
                break;
            }
        }
    }

    RerankOutcome {
        candidates: reranked,
        degraded: None,
    }
}

fn fail_open(
    mut candidates: Vec<Candidate>,
    final_k: usize,
    degraded: Option<DegradedReason>,
) -> RerankOutcome {
    candidates.truncate(final_k);
    RerankOutcome {
        candidates,
        degraded,
    }
}

fn build_prompt(query: &str, candidates: &[Candidate], chunk_byte_budget: usize) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "You rank code fragments by relevance to a question. Reply with JSON only, \
         shaped as {\"selected\":[{\"id\":\"...\",\"why\":\"...\"}]} with the most \
         relevant fragment first. Omit irrelevant fragments.\n\n",
    );
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt.push_str("\n\nFragments:\n");
    for candidate in candidates {
        prompt.push_str(&format!(
            "--- id={} path={} lines={}..{}\n",
            candidate.chunk_id, candidate.path, candidate.start_line, candidate.end_line
        ));
        prompt.push_str(truncate_to_bytes(&candidate.text, chunk_byte_budget));
        prompt.push('\n');
    }
    prompt
}

/// Byte-budget truncation that never splits a UTF-8 character.
fn truncate_to_bytes(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let mut end = budget;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Accepts raw JSON or JSON wrapped in prose/code fences.
fn parse_decision(reply: &str) -> Option<RerankDecision> {
    if let Ok(decision) = serde_json::from_str::<RerankDecision>(reply) {
        return Some(decision);
    }
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<RerankDecision>(&reply[start..=end]).ok()
}
