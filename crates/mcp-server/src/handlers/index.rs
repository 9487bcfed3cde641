use common::{ChangeStats, CoreResult, IndexStatusResult, ProjectScopeParams, RebuildParams};
use tokio_util::sync::CancellationToken;

use crate::{
    handlers::{require_readable, resolve_scope},
    state::{CoreContext, catch_up_project},
};

pub async fn index_status(
    ctx: &CoreContext,
    params: ProjectScopeParams,
) -> CoreResult<IndexStatusResult> {
    let (project, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let needs_rebuild = handles.needs_rebuild();
    let indexes = handles.indexes.read().await;
    Ok(IndexStatusResult {
        project_id: project.id,
        files_indexed: indexes.state.len(),
        chunks_indexed: indexes.keyword.doc_count(),
        vectors_indexed: indexes.vector.as_ref().map_or(0, |v| v.live_count()),
        last_catch_up_unix: handles.last_catch_up_unix(),
        needs_rebuild,
    })
}

/// Drops and recreates the project's indexes, then runs a full catch-up.
/// Existing vector rows survive unless `drop_vectors` is set; either way
/// the re-index upserts them idempotently.
pub async fn index_rebuild(
    ctx: &CoreContext,
    params: RebuildParams,
    cancel: &CancellationToken,
) -> CoreResult<ChangeStats> {
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    {
        let mut indexes = handles.indexes.write().await;
        indexes.state.clear();
        indexes
            .keyword
            .rebuild()
            .map_err(|err| common::CoreError::Unavailable(format!("keyword rebuild: {err}")))?;
        indexes.symbols.clear();
        if params.drop_vectors
            && let Some(vector) = indexes.vector.as_mut()
        {
            vector.rebuild()?;
        }
    }
    let stats = catch_up_project(ctx, &handles, cancel).await?;
    require_readable(&handles)?;
    Ok(stats)
}
