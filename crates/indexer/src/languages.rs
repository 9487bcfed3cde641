use anyhow::{Result, anyhow};
use common::FileKind;
use tree_sitter::{Language, Parser};

/// Source-file extensions chunked as code (line windows). Extensions in
/// neither this set nor [`DOC_EXTENSIONS`] are skipped entirely.
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "hxx", "ipp", "tpp", "inl", "js", "jsx",
    "mjs", "cjs", "ts", "tsx", "py", "pyi", "go", "java", "cs", "php", "phtml", "rb", "kt", "kts",
    "swift", "hs", "lhs", "sh", "bash", "zsh", "pl", "pm", "lua", "r", "scala", "clj", "cljs",
    "ex", "exs", "erl", "ml", "mli", "zig", "d", "nim", "vue", "svelte", "sql", "proto", "json",
    "yaml", "yml", "toml", "hcl", "tf", "css", "scss", "less", "xml", "gradle", "cmake", "mk",
    "dockerfile",
];

/// Prose extensions chunked as docs (token windows).
const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "html", "adoc", "org", "tex"];

/// Classifies a path into the code set or the doc set; `None` means the
/// file is not indexed.
pub fn classify(path: &str) -> Option<FileKind> {
    let ext = extension(path)?;
    if DOC_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileKind::Doc);
    }
    if CODE_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileKind::Code);
    }
    None
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let lower = name.to_ascii_lowercase();
    if lower == "dockerfile" {
        return Some("dockerfile".to_string());
    }
    lower.rsplit_once('.').map(|(_, ext)| ext.to_string())
}

/// Languages with a tree-sitter grammar wired in; files of any other code
/// extension still get keyword/vector indexing, never symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageKind {
    Rust,
    C,
    Cpp,
    JavaScript,
    TypeScript,
    Python,
    Go,
    Haskell,
    Java,
    CSharp,
    Php,
    Ruby,
    Kotlin,
    Swift,
}

impl LanguageKind {
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        for kind in Self::all() {
            if kind.extensions().iter().any(|ext| lower.ends_with(ext)) {
                return Some(*kind);
            }
        }
        None
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::Rust,
            Self::C,
            Self::Cpp,
            Self::JavaScript,
            Self::TypeScript,
            Self::Python,
            Self::Go,
            Self::Haskell,
            Self::Java,
            Self::CSharp,
            Self::Php,
            Self::Ruby,
            Self::Kotlin,
            Self::Swift,
        ]
    }

    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[".rs"],
            Self::C => &[".c", ".h"],
            Self::Cpp => &[
                ".cc", ".cpp", ".cxx", ".hpp", ".hh", ".hxx", ".ipp", ".tpp", ".inl",
            ],
            Self::JavaScript => &[".js", ".jsx", ".mjs", ".cjs"],
            Self::TypeScript => &[".ts", ".tsx"],
            Self::Python => &[".py", ".pyi"],
            Self::Go => &[".go"],
            Self::Haskell => &[".hs", ".lhs"],
            Self::Java => &[".java"],
            Self::CSharp => &[".cs"],
            Self::Php => &[".php", ".phtml"],
            Self::Ruby => &[".rb"],
            Self::Kotlin => &[".kt", ".kts"],
            Self::Swift => &[".swift"],
        }
    }
}

pub fn parser_for_path(path: &str) -> Result<(LanguageKind, Parser)> {
    let kind = LanguageKind::from_path(path)
        .ok_or_else(|| anyhow!("no grammar for file extension"))?;
    let mut parser = Parser::new();
    parser.set_language(&language_for(kind))?;
    Ok((kind, parser))
}

fn language_for(kind: LanguageKind) -> Language {
    match kind {
        LanguageKind::Rust => tree_sitter_rust::LANGUAGE.into(),
        LanguageKind::C => tree_sitter_c::LANGUAGE.into(),
        LanguageKind::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        LanguageKind::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        LanguageKind::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        LanguageKind::Python => tree_sitter_python::LANGUAGE.into(),
        LanguageKind::Go => tree_sitter_go::LANGUAGE.into(),
        LanguageKind::Haskell => tree_sitter_haskell::LANGUAGE.into(),
        LanguageKind::Java => tree_sitter_java::LANGUAGE.into(),
        LanguageKind::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        LanguageKind::Php => tree_sitter_php::LANGUAGE_PHP.into(),
        LanguageKind::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        LanguageKind::Kotlin => tree_sitter_kotlin_ng::LANGUAGE.into(),
        LanguageKind::Swift => tree_sitter_swift::LANGUAGE.into(),
    }
}

#[cfg(test)]
mod tests {
    use common::FileKind;

    use super::{CODE_EXTENSIONS, DOC_EXTENSIONS, LanguageKind, classify, parser_for_path};

    #[test]
    fn code_and_doc_sets_are_disjoint() {
        for ext in DOC_EXTENSIONS {
            assert!(!CODE_EXTENSIONS.contains(ext), "{ext} is in both sets");
        }
        assert!(CODE_EXTENSIONS.len() >= 50);
    }

    #[test]
    fn classify_covers_code_docs_and_neither() {
        assert_eq!(classify("src/main.rs"), Some(FileKind::Code));
        assert_eq!(classify("deploy/Dockerfile"), Some(FileKind::Code));
        assert_eq!(classify("README.md"), Some(FileKind::Doc));
        assert_eq!(classify("notes/guide.adoc"), Some(FileKind::Doc));
        assert_eq!(classify("image.png"), None);
        assert_eq!(classify("no_extension"), None);
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(classify("src/Main.RS"), Some(FileKind::Code));
        assert_eq!(classify("README.MD"), Some(FileKind::Doc));
    }

    #[test]
    fn grammar_detection_follows_extension() {
        assert_eq!(LanguageKind::from_path("src/main.rs"), Some(LanguageKind::Rust));
        assert_eq!(LanguageKind::from_path("app.py"), Some(LanguageKind::Python));
        assert_eq!(LanguageKind::from_path("config.toml"), None);
    }

    #[test]
    fn parser_builds_for_supported_grammar() {
        assert!(parser_for_path("src/main.rs").is_ok());
        assert!(parser_for_path("config.yaml").is_err());
    }
}
