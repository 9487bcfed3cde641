use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use common::{CoreError, CoreResult, SymbolKind, SymbolRecord, SymbolSite, projects::atomic_write};
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, TreeCursor};

use crate::languages::{LanguageKind, parser_for_path};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct FileSymbols {
    path: String,
    symbols: Vec<SymbolRecord>,
    references: Vec<ReferenceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ReferenceRecord {
    name: String,
    line: usize,
}

/// AST-derived symbol map for the grammars in [`crate::languages`].
/// Definitions and reference sites are extracted per file and persisted as
/// jsonl; a file that fails to parse is skipped for symbols only.
pub struct SymbolStore {
    path: PathBuf,
    files: BTreeMap<String, FileSymbols>,
}

impl SymbolStore {
    /// Best-effort load: an unreadable store starts empty and is rebuilt by
    /// the next catch-up.
    pub fn open(path: &Path) -> Self {
        let mut files = BTreeMap::new();
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(raw) => {
                    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                        if let Ok(file) = serde_json::from_str::<FileSymbols>(line) {
                            files.insert(file.path.clone(), file);
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed loading symbol store"),
            }
        }
        Self {
            path: path.to_path_buf(),
            files,
        }
    }

    /// Re-extracts one file. Returns false when the file has no grammar or
    /// does not parse; keyword/vector indexing of it proceeds regardless.
    pub fn update_file(&mut self, rel_path: &str, content: &str) -> bool {
        match extract_file_symbols(rel_path, content) {
            Ok(file) => {
                self.files.insert(rel_path.to_string(), file);
                true
            }
            Err(err) => {
                tracing::debug!(file = rel_path, error = %err, "symbol extraction skipped");
                self.files.remove(rel_path);
                false
            }
        }
    }

    pub fn remove_file(&mut self, rel_path: &str) {
        self.files.remove(rel_path);
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn symbols(&self, rel_path: &str) -> Option<Vec<SymbolRecord>> {
        self.files.get(rel_path).map(|f| f.symbols.clone())
    }

    pub fn find_definition(&self, name: &str, kind: Option<SymbolKind>) -> Vec<SymbolSite> {
        let mut sites = Vec::new();
        for file in self.files.values() {
            for symbol in &file.symbols {
                if symbol.name == name && kind.is_none_or(|k| k == symbol.kind) {
                    sites.push(SymbolSite {
                        path: file.path.clone(),
                        start_line: symbol.start_line,
                        end_line: symbol.end_line,
                    });
                }
            }
        }
        sites
    }

    /// Reference sites are AST identifier nodes, so names inside comments
    /// and string literals never match.
    pub fn find_references(&self, name: &str) -> Vec<SymbolSite> {
        let mut sites = Vec::new();
        for file in self.files.values() {
            for reference in &file.references {
                if reference.name == name {
                    sites.push(SymbolSite {
                        path: file.path.clone(),
                        start_line: reference.line,
                        end_line: reference.line,
                    });
                }
            }
        }
        sites
    }

    pub fn persist(&self) -> CoreResult<()> {
        let mut body = String::new();
        for file in self.files.values() {
            let line = serde_json::to_string(file)
                .map_err(|err| CoreError::Fatal(format!("symbol serialization: {err}")))?;
            body.push_str(&line);
            body.push('\n');
        }
        atomic_write(&self.path, body.as_bytes())
            .map_err(|err| CoreError::io("failed persisting symbol store", &err))
    }
}

fn extract_file_symbols(rel_path: &str, content: &str) -> Result<FileSymbols> {
    let (lang, mut parser) = parser_for_path(rel_path)?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("failed to parse source"))?;

    let mut symbols = Vec::new();
    let mut references = Vec::new();
    let mut cursor = tree.root_node().walk();
    collect(lang, content, &mut cursor, &mut symbols, &mut references);
    references.sort_by(|a, b| a.name.cmp(&b.name).then(a.line.cmp(&b.line)));
    references.dedup();

    Ok(FileSymbols {
        path: rel_path.to_string(),
        symbols,
        references,
    })
}

fn collect(
    lang: LanguageKind,
    content: &str,
    cursor: &mut TreeCursor<'_>,
    symbols: &mut Vec<SymbolRecord>,
    references: &mut Vec<ReferenceRecord>,
) {
    loop {
        let node = cursor.node();
        if let Some(kind) = definition_kind(lang, node.kind()) {
            if let Some(name) = node_name(node, content) {
                symbols.push(SymbolRecord {
                    name,
                    kind,
                    start_line: node.start_position().row + 1,
                    end_line: node.end_position().row + 1,
                });
            }
        } else if is_reference(node) {
            if let Ok(name) = node.utf8_text(content.as_bytes()) {
                references.push(ReferenceRecord {
                    name: name.to_string(),
                    line: node.start_position().row + 1,
                });
            }
        }

        if cursor.goto_first_child() {
            collect(lang, content, cursor, symbols, references);
            let _ = cursor.goto_parent();
        }
        if !cursor.goto_next_sibling() {
            break;
        }
    }
}

fn is_reference(node: Node<'_>) -> bool {
    if node.child_count() != 0 || !node.kind().ends_with("identifier") {
        return false;
    }
    // The name of a definition is not a reference to it.
    match node.parent() {
        Some(parent) => parent
            .child_by_field_name("name")
            .is_none_or(|name| name.id() != node.id()),
        None => true,
    }
}

fn definition_kind(lang: LanguageKind, node_kind: &str) -> Option<SymbolKind> {
    match lang {
        LanguageKind::Rust => match node_kind {
            "function_item" => Some(SymbolKind::Function),
            "struct_item" => Some(SymbolKind::Struct),
            "enum_item" => Some(SymbolKind::Enum),
            "trait_item" => Some(SymbolKind::Trait),
            "mod_item" => Some(SymbolKind::Module),
            "const_item" | "static_item" => Some(SymbolKind::Constant),
            "type_item" => Some(SymbolKind::Type),
            _ => None,
        },
        LanguageKind::Python => match node_kind {
            "function_definition" => Some(SymbolKind::Function),
            "class_definition" => Some(SymbolKind::Class),
            _ => None,
        },
        LanguageKind::JavaScript => match node_kind {
            "function_declaration" => Some(SymbolKind::Function),
            "method_definition" => Some(SymbolKind::Method),
            "class_declaration" => Some(SymbolKind::Class),
            "variable_declarator" => Some(SymbolKind::Variable),
            _ => None,
        },
        LanguageKind::TypeScript => match node_kind {
            "function_declaration" => Some(SymbolKind::Function),
            "method_definition" => Some(SymbolKind::Method),
            "class_declaration" => Some(SymbolKind::Class),
            "interface_declaration" => Some(SymbolKind::Interface),
            "type_alias_declaration" => Some(SymbolKind::Type),
            "enum_declaration" => Some(SymbolKind::Enum),
            "variable_declarator" => Some(SymbolKind::Variable),
            _ => None,
        },
        LanguageKind::Go => match node_kind {
            "function_declaration" => Some(SymbolKind::Function),
            "method_declaration" => Some(SymbolKind::Method),
            "type_spec" => Some(SymbolKind::Type),
            "const_spec" => Some(SymbolKind::Constant),
            "var_spec" => Some(SymbolKind::Variable),
            _ => None,
        },
        LanguageKind::Java => match node_kind {
            "method_declaration" => Some(SymbolKind::Method),
            "class_declaration" => Some(SymbolKind::Class),
            "interface_declaration" => Some(SymbolKind::Interface),
            "enum_declaration" => Some(SymbolKind::Enum),
            _ => None,
        },
        LanguageKind::C => match node_kind {
            "function_definition" => Some(SymbolKind::Function),
            "struct_specifier" => Some(SymbolKind::Struct),
            "enum_specifier" => Some(SymbolKind::Enum),
            "type_definition" => Some(SymbolKind::Type),
            _ => None,
        },
        LanguageKind::Cpp => match node_kind {
            "function_definition" => Some(SymbolKind::Function),
            "struct_specifier" => Some(SymbolKind::Struct),
            "class_specifier" => Some(SymbolKind::Class),
            "enum_specifier" => Some(SymbolKind::Enum),
            "type_definition" => Some(SymbolKind::Type),
            _ => None,
        },
        LanguageKind::CSharp => match node_kind {
            "method_declaration" => Some(SymbolKind::Method),
            "class_declaration" => Some(SymbolKind::Class),
            "interface_declaration" => Some(SymbolKind::Interface),
            "struct_declaration" => Some(SymbolKind::Struct),
            "enum_declaration" => Some(SymbolKind::Enum),
            _ => None,
        },
        LanguageKind::Php => match node_kind {
            "function_definition" => Some(SymbolKind::Function),
            "method_declaration" => Some(SymbolKind::Method),
            "class_declaration" => Some(SymbolKind::Class),
            _ => None,
        },
        LanguageKind::Ruby => match node_kind {
            "method" | "singleton_method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            "module" => Some(SymbolKind::Module),
            _ => None,
        },
        LanguageKind::Kotlin => match node_kind {
            "function_declaration" => Some(SymbolKind::Function),
            "class_declaration" | "object_declaration" => Some(SymbolKind::Class),
            _ => None,
        },
        LanguageKind::Swift => match node_kind {
            "function_declaration" => Some(SymbolKind::Function),
            "class_declaration" => Some(SymbolKind::Class),
            "struct_declaration" => Some(SymbolKind::Struct),
            _ => None,
        },
        LanguageKind::Haskell => match node_kind {
            "function" => Some(SymbolKind::Function),
            "data_type" | "newtype" => Some(SymbolKind::Type),
            "class" => Some(SymbolKind::Class),
            _ => None,
        },
    }
}

fn node_name(node: Node<'_>, content: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return name
            .utf8_text(content.as_bytes())
            .ok()
            .map(ToOwned::to_owned);
    }
    find_identifier(node, content, 0)
}

/// C-style declarations bury the name inside a declarator subtree.
fn find_identifier(node: Node<'_>, content: &str, depth: usize) -> Option<String> {
    if depth > 4 {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.child_count() == 0 && child.kind().ends_with("identifier") {
            return child
                .utf8_text(content.as_bytes())
                .ok()
                .map(ToOwned::to_owned);
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_identifier(child, content, depth + 1) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use common::SymbolKind;

    use super::SymbolStore;

    fn temp_store(tag: &str) -> SymbolStore {
        let base = std::env::temp_dir().join(format!("quarry-symbols-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).expect("mkdir");
        SymbolStore::open(&base.join("symbols.jsonl"))
    }

    #[test]
    fn extracts_rust_definitions() {
        let mut store = temp_store("rust");
        let parsed = store.update_file(
            "src/auth.rs",
            "struct Session;\n\nfn login(user: &str) -> Session {\n    Session\n}\n",
        );
        assert!(parsed);

        let symbols = store.symbols("src/auth.rs").expect("symbols");
        assert!(symbols.iter().any(|s| s.name == "login" && s.kind == SymbolKind::Function));
        assert!(symbols.iter().any(|s| s.name == "Session" && s.kind == SymbolKind::Struct));
    }

    #[test]
    fn extracts_python_definitions_and_references() {
        let mut store = temp_store("python");
        store.update_file(
            "app.py",
            "def check(u, p):\n    return True\n\ndef login(u, p):\n    return check(u, p)\n",
        );

        let defs = store.find_definition("check", Some(SymbolKind::Function));
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].start_line, 1);

        let refs = store.find_references("check");
        assert!(refs.iter().any(|site| site.start_line == 5));
    }

    #[test]
    fn names_in_strings_and_comments_are_not_references() {
        let mut store = temp_store("strings");
        store.update_file(
            "app.py",
            "# check the user\nmessage = \"call check here\"\n\ndef check():\n    pass\n",
        );
        let refs = store.find_references("check");
        assert!(refs.is_empty(), "got {refs:?}");
    }

    #[test]
    fn unparseable_or_ungrammared_files_are_skipped() {
        let mut store = temp_store("skip");
        assert!(!store.update_file("config.yaml", "key: value\n"));
        assert!(store.symbols("config.yaml").is_none());
    }

    #[test]
    fn definition_filter_by_kind() {
        let mut store = temp_store("kindfilter");
        store.update_file(
            "lib.rs",
            "struct Login;\nfn login() {}\n",
        );
        let funcs = store.find_definition("login", Some(SymbolKind::Function));
        assert_eq!(funcs.len(), 1);
        let structs = store.find_definition("login", Some(SymbolKind::Struct));
        assert!(structs.is_empty());
    }

    #[test]
    fn store_round_trips_through_disk() {
        let base = std::env::temp_dir().join(format!("quarry-symbols-persist-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).expect("mkdir");
        let path = base.join("symbols.jsonl");
        {
            let mut store = SymbolStore::open(&path);
            store.update_file("app.py", "def login():\n    pass\n");
            store.persist().expect("persist");
        }
        let store = SymbolStore::open(&path);
        assert_eq!(store.find_definition("login", None).len(), 1);
    }

    #[test]
    fn remove_file_drops_its_symbols() {
        let mut store = temp_store("remove");
        store.update_file("app.py", "def login():\n    pass\n");
        store.remove_file("app.py");
        assert!(store.symbols("app.py").is_none());
        assert!(store.find_definition("login", None).is_empty());
    }
}
