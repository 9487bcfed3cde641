use common::{
    CoreError, CoreResult, FindSymbolParams, PatternMatch, PatternParams, PatternResult,
    ReferencesParams, SymbolSitesResult, SymbolsParams, SymbolsResult,
};
use regex::Regex;

use crate::{handlers::resolve_scope, state::CoreContext};

pub async fn code_symbols(ctx: &CoreContext, params: SymbolsParams) -> CoreResult<SymbolsResult> {
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let indexes = handles.indexes.read().await;
    let symbols = indexes
        .symbols
        .symbols(&params.path)
        .ok_or_else(|| CoreError::NotFound(format!("no symbols for {}", params.path)))?;
    Ok(SymbolsResult { symbols })
}

pub async fn code_find_symbol(
    ctx: &CoreContext,
    params: FindSymbolParams,
) -> CoreResult<SymbolSitesResult> {
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let indexes = handles.indexes.read().await;
    let mut sites = indexes.symbols.find_definition(&params.name, params.kind);
    sites.sort_by(|a, b| a.path.cmp(&b.path).then(a.start_line.cmp(&b.start_line)));
    Ok(SymbolSitesResult { sites })
}

pub async fn code_references(
    ctx: &CoreContext,
    params: ReferencesParams,
) -> CoreResult<SymbolSitesResult> {
    let (_, handles) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let indexes = handles.indexes.read().await;
    let mut sites = indexes.symbols.find_references(&params.name);
    sites.sort_by(|a, b| a.path.cmp(&b.path).then(a.start_line.cmp(&b.start_line)));
    Ok(SymbolSitesResult { sites })
}

/// Regex scan over the working tree, bounded by `limit` matches. Runs
/// against the filesystem directly, so no index lock is needed.
pub fn search_pattern(
    ctx: &CoreContext,
    params: PatternParams,
    pattern: &Regex,
) -> CoreResult<PatternResult> {
    let (project, _) = resolve_scope(ctx, &params.project, params.working_dir.as_deref())?;
    let root = std::path::Path::new(&project.root);
    let limit = params.limit.max(1);

    let mut matches = Vec::new();
    let mut files = indexer::scan_working_tree(root);
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    'files: for file in files {
        let Ok(content) = std::fs::read_to_string(root.join(&file.rel_path)) else {
            continue;
        };
        for (line_idx, line) in content.lines().enumerate() {
            if pattern.is_match(line) {
                matches.push(PatternMatch {
                    path: file.rel_path.clone(),
                    line: line_idx + 1,
                    text: line.to_string(),
                });
                if matches.len() >= limit {
                    break 'files;
                }
            }
        }
    }
    Ok(PatternResult { matches })
}
