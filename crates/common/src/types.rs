use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Code,
    Doc,
}

/// A contiguous window of a source file, the unit of indexing and retrieval.
/// Windows are never mutated in place: a file change replaces the file's
/// entire chunk range.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub ordinal: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: FileKind,
    pub text: String,
}

impl Chunk {
    pub fn make_id(project_id: &str, path: &str, ordinal: usize) -> String {
        format!("{project_id}:{path}:{ordinal}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub keyword_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub fused_score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ChangeStats {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Interface,
    Module,
    Variable,
    Constant,
    Type,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SymbolSite {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[cfg(test)]
mod tests {
    use super::Chunk;

    #[test]
    fn chunk_id_joins_project_path_and_ordinal() {
        assert_eq!(Chunk::make_id("ab12cd34", "src/a.py", 0), "ab12cd34:src/a.py:0");
    }
}
