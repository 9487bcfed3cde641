use std::path::{Path, PathBuf};

use common::{
    CoreError, CoreResult, FileFindParams, FileListParams, FileListResult, FileReadParams,
    FileReadResult,
};
use globset::Glob;

use crate::{handlers::resolve_scope, state::CoreContext};

pub fn file_read(ctx: &CoreContext, params: FileReadParams) -> CoreResult<FileReadResult> {
    let (project, _) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let resolved = resolve_inside_root(Path::new(&project.root), &params.path)?;
    let content = std::fs::read_to_string(&resolved)
        .map_err(|_| CoreError::NotFound(format!("file {}", params.path)))?;
    Ok(FileReadResult {
        path: params.path,
        content,
    })
}

pub fn file_list(ctx: &CoreContext, params: FileListParams) -> CoreResult<FileListResult> {
    let (project, _) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let root = Path::new(&project.root);
    let dir = match &params.dir {
        Some(dir) => resolve_inside_root(root, dir)?,
        None => root.to_path_buf(),
    };

    let entries = std::fs::read_dir(&dir)
        .map_err(|_| CoreError::NotFound(format!("directory {}", dir.display())))?;
    let mut names = Vec::new();
    for entry in entries.flatten() {
        let mut name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(FileListResult { entries: names })
}

pub fn file_find(ctx: &CoreContext, params: FileFindParams) -> CoreResult<FileListResult> {
    let (project, _) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let matcher = Glob::new(&params.glob)
        .map_err(|err| CoreError::NotFound(format!("invalid glob {}: {err}", params.glob)))?
        .compile_matcher();

    let mut entries = indexer::scan_working_tree(Path::new(&project.root))
        .into_iter()
        .map(|file| file.rel_path)
        .filter(|rel| matcher.is_match(rel))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(FileListResult { entries })
}

/// Rejects `..`-style escapes: the resolved path must stay inside the
/// project root.
fn resolve_inside_root(root: &Path, relative: &str) -> CoreResult<PathBuf> {
    let joined = root.join(relative);
    let canonical_root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let canonical = std::fs::canonicalize(&joined).unwrap_or(joined);
    if !canonical.starts_with(&canonical_root) {
        return Err(CoreError::NotFound(format!(
            "path {relative} is outside the project root"
        )));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::resolve_inside_root;

    #[test]
    fn escaping_the_root_is_rejected() {
        let base = std::env::temp_dir().join(format!("quarry-files-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("root")).expect("mkdir");
        std::fs::write(base.join("secret.txt"), "no").expect("write");

        let err = resolve_inside_root(&base.join("root"), "../secret.txt").expect_err("escape");
        assert!(err.to_string().contains("outside the project root"));
    }

    #[test]
    fn paths_inside_the_root_resolve() {
        let base = std::env::temp_dir().join(format!("quarry-files-ok-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("root/src")).expect("mkdir");
        std::fs::write(base.join("root/src/a.rs"), "fn a() {}").expect("write");

        let resolved = resolve_inside_root(&base.join("root"), "src/a.rs").expect("resolve");
        assert!(resolved.ends_with("src/a.rs"));
    }
}
