use std::path::Path;

use common::{
    CoreError, CoreResult, ProjectAddParams, ProjectListResult, ProjectScopeParams,
    projects::Project,
};

use crate::state::CoreContext;

pub fn project_add(ctx: &CoreContext, params: ProjectAddParams) -> CoreResult<Project> {
    let path = Path::new(&params.path);
    if !path.is_dir() {
        return Err(CoreError::NotFound(format!(
            "project root {} is not a directory",
            params.path
        )));
    }
    let project = ctx.registry.add(
        path,
        params.name.as_deref(),
        ctx.creation_dim(params.enable_vectors),
    )?;
    tracing::info!(project = %project.id, name = %project.name, "project registered");
    Ok(project)
}

pub fn project_activate(ctx: &CoreContext, params: ProjectScopeParams) -> CoreResult<Project> {
    ctx.registry.activate(&params.project)
}

/// Removal takes the project-write lock so no in-flight reader observes
/// the indexes disappearing under it, then purges every derived file.
pub async fn project_remove(ctx: &CoreContext, params: ProjectScopeParams) -> CoreResult<Project> {
    let project = ctx
        .registry
        .resolve(&params.project, params.working_dir.as_deref().map(Path::new))?;
    if let Ok(handles) = ctx.handles(&project) {
        let _write_guard = handles.indexes.write().await;
        let removed = ctx.registry.remove(&project.id)?;
        drop(_write_guard);
        ctx.drop_handles(&project.id);
        return Ok(removed);
    }
    let removed = ctx.registry.remove(&project.id)?;
    ctx.drop_handles(&project.id);
    Ok(removed)
}

pub fn project_list(ctx: &CoreContext) -> CoreResult<ProjectListResult> {
    Ok(ProjectListResult {
        projects: ctx.registry.list()?,
    })
}
