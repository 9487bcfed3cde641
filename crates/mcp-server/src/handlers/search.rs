use std::sync::Arc;

use common::{
    AnswerParams, AnswerResult, Candidate, CoreError, CoreResult, DegradedReason, SearchParams,
    SearchResult,
};
use search_core::{
    CachedAnswer, DEFAULT_ALPHA, DEFAULT_BETA, FusionWeights, hybrid_search, rerank,
};
use tokio_util::sync::CancellationToken;

use crate::{
    handlers::{ensure_fresh, require_readable, resolve_scope},
    state::{CoreContext, ProjectHandles},
};

const MAX_TOP_K: usize = 50;

pub async fn rag_search(
    ctx: &CoreContext,
    params: SearchParams,
    cancel: &CancellationToken,
) -> CoreResult<SearchResult> {
    let started = std::time::Instant::now();
    let k = params.k.clamp(1, MAX_TOP_K);
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;

    if params.query.trim().is_empty() {
        return Ok(SearchResult::default());
    }

    if params.auto_index {
        ensure_fresh(ctx, &handles, cancel).await?;
    }
    require_readable(&handles)?;

    if let Some(hit) = handles.cache.lookup_exact(&params.query, k) {
        metrics::counter!("query_cache_hits_total").increment(1);
        return Ok(SearchResult {
            candidates: hit.candidates,
            degraded_reasons: Vec::new(),
        });
    }

    let query_vector = embed_query(ctx, &handles, &params.query, params.use_vector, cancel).await?;
    if let Some(vector) = &query_vector
        && let Some(hit) = handles.cache.lookup_semantic(&params.query, k, vector)
    {
        metrics::counter!("query_cache_hits_total").increment(1);
        return Ok(SearchResult {
            candidates: hit.candidates,
            degraded_reasons: Vec::new(),
        });
    }
    metrics::counter!("query_cache_misses_total").increment(1);

    let weights = FusionWeights {
        alpha: params.alpha.unwrap_or(DEFAULT_ALPHA),
        beta: params.beta.unwrap_or(DEFAULT_BETA),
    };
    let indexes = handles.indexes.read().await;
    let outcome = hybrid_search(
        &indexes.keyword,
        indexes.vector.as_ref(),
        &params.query,
        query_vector.as_deref(),
        k,
        weights,
        params.use_vector,
    )?;
    drop(indexes);

    let mut candidates = outcome.candidates;
    candidates.truncate(k);
    handles.cache.put(
        &params.query,
        k,
        query_vector.as_deref(),
        CachedAnswer {
            candidates: candidates.clone(),
            answer: None,
        },
    );

    ctx.record_search_latency_ms(started.elapsed().as_millis());
    metrics::counter!("search_requests_total").increment(1);
    Ok(SearchResult {
        candidates,
        degraded_reasons: outcome.degraded_reasons,
    })
}

pub async fn answer_generate(
    ctx: &CoreContext,
    params: AnswerParams,
    cancel: &CancellationToken,
) -> CoreResult<AnswerResult> {
    let k = params.k.clamp(1, MAX_TOP_K);
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;

    if params.query.trim().is_empty() {
        return Ok(AnswerResult::default());
    }

    ensure_fresh(ctx, &handles, cancel).await?;
    require_readable(&handles)?;

    let query_vector = embed_query(ctx, &handles, &params.query, true, cancel).await?;
    if let Some(hit) = cached_answer(&handles, &params, k, query_vector.as_deref())
        && (!params.accumulate || hit.answer.is_some())
    {
        metrics::counter!("query_cache_hits_total").increment(1);
        return Ok(AnswerResult {
            candidates: hit.candidates,
            answer: hit.answer.filter(|_| params.accumulate),
            degraded_reasons: Vec::new(),
        });
    }

    let indexes = handles.indexes.read().await;
    let outcome = hybrid_search(
        &indexes.keyword,
        indexes.vector.as_ref(),
        &params.query,
        query_vector.as_deref(),
        k,
        FusionWeights::default(),
        true,
    )?;
    drop(indexes);
    let mut degraded_reasons = outcome.degraded_reasons;

    let candidates = if params.rerank {
        let reranked = rerank(
            ctx.llm.as_ref(),
            &params.query,
            outcome.candidates,
            k,
            ctx.config.llm.rerank_chunk_bytes,
        )
        .await;
        if let Some(reason) = reranked.degraded {
            degraded_reasons.push(reason);
        }
        reranked.candidates
    } else {
        let mut candidates = outcome.candidates;
        candidates.truncate(k);
        candidates
    };

    let answer = if params.accumulate && !candidates.is_empty() {
        match generate_prose(ctx, &params.query, &candidates).await {
            Ok(answer) => Some(answer),
            Err(err) => {
                tracing::warn!(error = %err, "answer generation failed");
                degraded_reasons.push(DegradedReason::AnswerUnavailable);
                None
            }
        }
    } else {
        None
    };

    handles.cache.put(
        &params.query,
        k,
        query_vector.as_deref(),
        CachedAnswer {
            candidates: candidates.clone(),
            answer: answer.clone(),
        },
    );
    Ok(AnswerResult {
        candidates,
        answer,
        degraded_reasons,
    })
}

fn cached_answer(
    handles: &ProjectHandles,
    params: &AnswerParams,
    k: usize,
    query_vector: Option<&[f32]>,
) -> Option<CachedAnswer> {
    if let Some(hit) = handles.cache.lookup_exact(&params.query, k) {
        return Some(hit);
    }
    query_vector.and_then(|vector| handles.cache.lookup_semantic(&params.query, k, vector))
}

/// Embeds the query once; the vector feeds the semantic cache tier and the
/// vector sub-search. Failures degrade to keyword-only, cancellation
/// propagates.
async fn embed_query(
    ctx: &CoreContext,
    handles: &Arc<ProjectHandles>,
    query: &str,
    use_vector: bool,
    cancel: &CancellationToken,
) -> CoreResult<Option<Vec<f32>>> {
    if !use_vector {
        return Ok(None);
    }
    let Some(embedder) = ctx.embedder_for(&handles.project) else {
        return Ok(None);
    };
    let texts = [query.to_string()];
    let result = tokio::select! {
        result = embedder.embed(&texts) => result,
        () = cancel.cancelled() => return Err(CoreError::Cancelled),
    };
    match result {
        Ok(mut vectors) if !vectors.is_empty() => Ok(Some(vectors.remove(0))),
        Ok(_) => Ok(None),
        Err(err) => {
            tracing::warn!(project = %handles.project.id, error = %err, "query embedding failed");
            Ok(None)
        }
    }
}

async fn generate_prose(
    ctx: &CoreContext,
    query: &str,
    candidates: &[Candidate],
) -> CoreResult<String> {
    let Some(llm) = ctx.llm.as_ref() else {
        return Err(CoreError::Unavailable("no llm endpoint configured".into()));
    };
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "Answer the question using only the code fragments below. Cite paths and \
         line ranges. Say so when the fragments are insufficient.\n\nQuestion: ",
    );
    prompt.push_str(query);
    prompt.push_str("\n\nFragments:\n");
    for candidate in candidates {
        prompt.push_str(&format!(
            "--- {} lines {}..{}\n{}\n",
            candidate.path, candidate.start_line, candidate.end_line, candidate.text
        ));
    }
    match tokio::time::timeout(llm.timeout(), llm.complete(&prompt)).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Transient("answer generation timed out".into())),
    }
}
