pub mod cache;
pub mod code;
pub mod files;
pub mod index;
pub mod project;
pub mod search;

use std::{path::Path, sync::Arc};

use common::{CoreError, CoreResult, projects::Project};
use tokio_util::sync::CancellationToken;

use crate::state::{CoreContext, ProjectHandles, catch_up_project};

/// Every query-path entry point resolves the project first; auto-init of
/// unknown working directories belongs to the transport layer, not here.
pub fn resolve_scope(
    ctx: &CoreContext,
    selector: &str,
    working_dir: Option<&str>,
) -> CoreResult<(Project, Arc<ProjectHandles>)> {
    let project = ctx
        .registry
        .resolve(selector, working_dir.map(Path::new))?;
    let handles = ctx.handles(&project)?;
    Ok((project, handles))
}

/// Catch-up policy shared by the query-path operations: corruption and
/// cancellation propagate, anything else logs and serves the last
/// committed index state.
pub async fn ensure_fresh(
    ctx: &CoreContext,
    handles: &Arc<ProjectHandles>,
    cancel: &CancellationToken,
) -> CoreResult<()> {
    match catch_up_project(ctx, handles, cancel).await {
        Ok(_) => Ok(()),
        Err(err @ (CoreError::Corrupt(_) | CoreError::Cancelled)) => Err(err),
        Err(err) => {
            tracing::warn!(
                project = %handles.project.id,
                error = %err,
                "catch-up failed, serving last committed index"
            );
            Ok(())
        }
    }
}

pub fn require_readable(handles: &ProjectHandles) -> CoreResult<()> {
    if handles.needs_rebuild() {
        return Err(CoreError::Corrupt(format!(
            "project {} is flagged for rebuild",
            handles.project.id
        )));
    }
    Ok(())
}
