use common::{
    CacheClearParams, CacheClearResult, CacheScope, CacheStatusResult, CoreResult,
    ProjectScopeParams,
};
use search_core::ClearScope;

use crate::{handlers::resolve_scope, state::CoreContext};

pub fn cache_clear(ctx: &CoreContext, params: CacheClearParams) -> CoreResult<CacheClearResult> {
    let evicted = match params.scope {
        CacheScope::All => {
            let mut evicted = 0;
            for project in ctx.registry.list()? {
                let handles = ctx.handles(&project)?;
                evicted += handles.cache.clear(ClearScope::All);
            }
            evicted
        }
        CacheScope::Project => {
            let (_, handles) =
                resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
            handles.cache.clear(ClearScope::All)
        }
        CacheScope::Expired => {
            let (_, handles) =
                resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
            handles.cache.clear(ClearScope::Expired)
        }
    };
    Ok(CacheClearResult { evicted })
}

pub fn cache_status(
    ctx: &CoreContext,
    params: ProjectScopeParams,
) -> CoreResult<CacheStatusResult> {
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let (exact_entries, semantic_entries) = handles.cache.status();
    Ok(CacheStatusResult {
        exact_entries,
        semantic_entries,
    })
}
