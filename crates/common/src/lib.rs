pub mod config;
pub mod error;
pub mod projects;
pub mod types;

use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};

pub use error::{CoreError, CoreResult, DegradedReason};
pub use types::{Candidate, ChangeStats, Chunk, FileKind, SymbolKind, SymbolRecord, SymbolSite};

use projects::Project;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum RpcId {
    String(String),
    Number(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RpcResponse<T> {
    pub jsonrpc: &'static str,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl<T> RpcResponse<T> {
    pub fn ok(id: RpcId, result: T) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: RpcId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RpcErrorCode {
    ParseError,
    InvalidParams,
    MethodNotFound,
    NotFound,
    AlreadyExists,
    Unavailable,
    Corrupt,
    Cancelled,
    Timeout,
    Internal,
}

impl RpcErrorCode {
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidParams => -32602,
            Self::MethodNotFound => -32601,
            Self::NotFound => -32010,
            Self::AlreadyExists => -32011,
            Self::Unavailable => -32012,
            Self::Corrupt => -32013,
            Self::Cancelled => -32014,
            Self::Timeout => -32015,
            Self::Internal => -32603,
        }
    }
}

impl From<&CoreError> for RpcErrorCode {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => Self::NotFound,
            CoreError::AlreadyExists(_) => Self::AlreadyExists,
            CoreError::Transient(_) | CoreError::Unavailable(_) => Self::Unavailable,
            CoreError::Corrupt(_) => Self::Corrupt,
            CoreError::Cancelled => Self::Cancelled,
            CoreError::DimensionMismatch { .. } | CoreError::Fatal(_) => Self::Internal,
        }
    }
}

fn default_selector() -> String {
    projects::AUTO_SELECTOR.to_string()
}

fn default_top_k() -> usize {
    8
}

const fn default_true() -> bool {
    true
}

fn default_pattern_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SearchParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub query: String,
    #[serde(default = "default_top_k", alias = "topK")]
    pub k: usize,
    #[serde(default = "default_true")]
    pub use_vector: bool,
    #[serde(default = "default_true")]
    pub auto_index: bool,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
    /// Fusion weight overrides; both default to 0.5.
    #[serde(default)]
    pub alpha: Option<f32>,
    #[serde(default)]
    pub beta: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SearchResult {
    pub candidates: Vec<Candidate>,
    pub degraded_reasons: Vec<DegradedReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AnswerParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub query: String,
    #[serde(default = "default_top_k", alias = "topK")]
    pub k: usize,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default)]
    pub accumulate: bool,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AnswerResult {
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub degraded_reasons: Vec<DegradedReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ProjectScopeParams {
    #[serde(default = "default_selector")]
    pub project: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct IndexStatusResult {
    pub project_id: String,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub vectors_indexed: usize,
    pub last_catch_up_unix: Option<u64>,
    pub needs_rebuild: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RebuildParams {
    #[serde(default = "default_selector")]
    pub project: String,
    #[serde(default)]
    pub drop_vectors: bool,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ProjectAddParams {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `false` creates the project embedding-disabled with an inert
    /// semantic tier.
    #[serde(default = "default_true")]
    pub enable_vectors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProjectListResult {
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    Project,
    All,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CacheClearParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub scope: CacheScope,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CacheClearResult {
    pub evicted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CacheStatusResult {
    pub exact_entries: usize,
    pub semantic_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SymbolsParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub path: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SymbolsResult {
    pub symbols: Vec<SymbolRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FindSymbolParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub name: String,
    #[serde(default)]
    pub kind: Option<SymbolKind>,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ReferencesParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub name: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SymbolSitesResult {
    pub sites: Vec<SymbolSite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PatternParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub pattern: String,
    #[serde(default = "default_pattern_limit")]
    pub limit: usize,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PatternMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PatternResult {
    pub matches: Vec<PatternMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FileReadParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub path: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FileReadResult {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FileListParams {
    #[serde(default = "default_selector")]
    pub project: String,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FileFindParams {
    #[serde(default = "default_selector")]
    pub project: String,
    pub glob: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FileListResult {
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SchemaBundle {
    pub search_params: Schema,
    pub search_result: Schema,
    pub answer_params: Schema,
    pub answer_result: Schema,
}

pub fn schema_bundle() -> SchemaBundle {
    SchemaBundle {
        search_params: schemars::schema_for!(SearchParams),
        search_result: schemars::schema_for!(SearchResult),
        answer_params: schemars::schema_for!(AnswerParams),
        answer_result: schemars::schema_for!(AnswerResult),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_response_ok_sets_fields() {
        let response = RpcResponse::ok(RpcId::Number(1), SearchResult::default());
        assert_eq!(response.jsonrpc, "2.0");
        assert!(response.result.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn search_params_fill_defaults() {
        let params: SearchParams =
            serde_json::from_str("{\"query\":\"login handler\"}").expect("params");
        assert_eq!(params.project, "auto");
        assert_eq!(params.k, 8);
        assert!(params.use_vector);
        assert!(params.auto_index);
        assert!(params.alpha.is_none());
    }

    #[test]
    fn core_error_maps_to_protocol_codes() {
        let code = RpcErrorCode::from(&CoreError::NotFound("x".into()));
        assert_eq!(code.as_i64(), -32010);
        let code = RpcErrorCode::from(&CoreError::Cancelled);
        assert_eq!(code.as_i64(), -32014);
    }

    #[test]
    fn schema_bundle_generates() {
        let schemas = schema_bundle();
        let raw = serde_json::to_string(&schemas.search_params).expect("serialize schema");
        assert!(raw.contains("query"));
    }
}
