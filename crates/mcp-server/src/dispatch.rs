use common::{
    AnswerParams, CacheClearParams, CoreResult, FileFindParams, FileListParams, FileReadParams,
    FindSymbolParams, PatternParams, ProjectAddParams, ProjectScopeParams, RebuildParams,
    ReferencesParams, RpcErrorCode, RpcId, RpcRequest, RpcResponse, SearchParams, SymbolsParams,
    schema_bundle,
};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{handlers, json_rpc::json_from_response, state::CoreContext};

/// Routes one protocol request to its operation. Parameter records are
/// schema-validated (for the two search surfaces) and decoded before the
/// handler runs; core errors map onto protocol error codes at this
/// boundary and nowhere else.
pub async fn dispatch(
    ctx: &CoreContext,
    req: RpcRequest,
    cancel: &CancellationToken,
) -> serde_json::Value {
    metrics::counter!("rpc_requests_total").increment(1);
    let id = req.id;
    let params = req.params;

    match req.method.as_str() {
        "ping" => json_from_response(RpcResponse::ok(id, serde_json::json!({}))),
        "rag.search" => {
            if let Err(message) = validate_search_params(&params) {
                return invalid(id, message);
            }
            match parse::<SearchParams>(params) {
                Ok(p) => {
                    tracing::info!(query_hash = hash_query(&p.query), k = p.k, "rag.search");
                    respond(id, handlers::search::rag_search(ctx, p, cancel).await)
                }
                Err(message) => invalid(id, message),
            }
        }
        "answer.generate" => {
            if let Err(message) = validate_answer_params(&params) {
                return invalid(id, message);
            }
            match parse::<AnswerParams>(params) {
                Ok(p) => {
                    tracing::info!(query_hash = hash_query(&p.query), k = p.k, "answer.generate");
                    respond(id, handlers::search::answer_generate(ctx, p, cancel).await)
                }
                Err(message) => invalid(id, message),
            }
        }
        "index.status" => match parse::<ProjectScopeParams>(params) {
            Ok(p) => respond(id, handlers::index::index_status(ctx, p).await),
            Err(message) => invalid(id, message),
        },
        "index.rebuild" => match parse::<RebuildParams>(params) {
            Ok(p) => respond(id, handlers::index::index_rebuild(ctx, p, cancel).await),
            Err(message) => invalid(id, message),
        },
        "project.add" => match parse::<ProjectAddParams>(params) {
            Ok(p) => respond(id, handlers::project::project_add(ctx, p)),
            Err(message) => invalid(id, message),
        },
        "project.activate" => match parse::<ProjectScopeParams>(params) {
            Ok(p) => respond(id, handlers::project::project_activate(ctx, p)),
            Err(message) => invalid(id, message),
        },
        "project.remove" => match parse::<ProjectScopeParams>(params) {
            Ok(p) => respond(id, handlers::project::project_remove(ctx, p).await),
            Err(message) => invalid(id, message),
        },
        "project.list" => respond(id, handlers::project::project_list(ctx)),
        "cache.clear" => match parse::<CacheClearParams>(params) {
            Ok(p) => respond(id, handlers::cache::cache_clear(ctx, p)),
            Err(message) => invalid(id, message),
        },
        "cache.status" => match parse::<ProjectScopeParams>(params) {
            Ok(p) => respond(id, handlers::cache::cache_status(ctx, p)),
            Err(message) => invalid(id, message),
        },
        "code.symbols" => match parse::<SymbolsParams>(params) {
            Ok(p) => respond(id, handlers::code::code_symbols(ctx, p).await),
            Err(message) => invalid(id, message),
        },
        "code.find_symbol" => match parse::<FindSymbolParams>(params) {
            Ok(p) => respond(id, handlers::code::code_find_symbol(ctx, p).await),
            Err(message) => invalid(id, message),
        },
        "code.references" => match parse::<ReferencesParams>(params) {
            Ok(p) => respond(id, handlers::code::code_references(ctx, p).await),
            Err(message) => invalid(id, message),
        },
        "search.pattern" => match parse::<PatternParams>(params) {
            Ok(p) => match regex::Regex::new(&p.pattern) {
                Ok(pattern) => respond(id, handlers::code::search_pattern(ctx, p, &pattern)),
                Err(err) => invalid(id, format!("invalid pattern: {err}")),
            },
            Err(message) => invalid(id, message),
        },
        "file.read" => match parse::<FileReadParams>(params) {
            Ok(p) => respond(id, handlers::files::file_read(ctx, p)),
            Err(message) => invalid(id, message),
        },
        "file.list" => match parse::<FileListParams>(params) {
            Ok(p) => respond(id, handlers::files::file_list(ctx, p)),
            Err(message) => invalid(id, message),
        },
        "file.find" => match parse::<FileFindParams>(params) {
            Ok(p) => respond(id, handlers::files::file_find(ctx, p)),
            Err(message) => invalid(id, message),
        },
        _ => {
            tracing::warn!(method = req.method, "unknown method");
            json_from_response(RpcResponse::<serde_json::Value>::err(
                id,
                RpcErrorCode::MethodNotFound.as_i64(),
                "method not found",
            ))
        }
    }
}

fn parse<P: DeserializeOwned>(params: serde_json::Value) -> Result<P, String> {
    serde_json::from_value(params).map_err(|err| format!("invalid params: {err}"))
}

fn respond<T: Serialize>(id: RpcId, result: CoreResult<T>) -> serde_json::Value {
    match result {
        Ok(value) => json_from_response(RpcResponse::ok(id, value)),
        Err(err) => {
            let code = RpcErrorCode::from(&err);
            json_from_response(RpcResponse::<serde_json::Value>::err(
                id,
                code.as_i64(),
                err.to_string(),
            ))
        }
    }
}

fn invalid(id: RpcId, message: String) -> serde_json::Value {
    json_from_response(RpcResponse::<serde_json::Value>::err(
        id,
        RpcErrorCode::InvalidParams.as_i64(),
        message,
    ))
}

fn validate_search_params(params: &serde_json::Value) -> Result<(), String> {
    let schema = serde_json::to_value(schema_bundle().search_params)
        .map_err(|err| format!("schema serialization error: {err}"))?;
    jsonschema::validate(&schema, params).map_err(|err| format!("schema validation failed: {err}"))
}

fn validate_answer_params(params: &serde_json::Value) -> Result<(), String> {
    let schema = serde_json::to_value(schema_bundle().answer_params)
        .map_err(|err| format!("schema serialization error: {err}"))?;
    jsonschema::validate(&schema, params).map_err(|err| format!("schema validation failed: {err}"))
}

/// Query text never reaches the logs, only its digest.
fn hash_query(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    format!("{:x}", hasher.finalize())
}
