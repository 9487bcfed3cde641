use std::{
    fs,
    io::Read,
    path::Path,
    time::UNIX_EPOCH,
};

use ignore::WalkBuilder;

use crate::languages::classify;

/// Files larger than this are skipped entirely; a file of exactly this
/// size is still indexed.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;
/// A NUL byte within this prefix marks the file as binary.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "__pycache__",
    "target",
    "build",
    "dist",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Relative to the project root, forward-slash separated.
    pub rel_path: String,
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
}

/// Walks a working tree and yields candidate files: classification,
/// `.gitignore`, hardcoded excludes, the size cap, and binary sniffing all
/// applied. Symlinks are followed only while they stay inside the root.
/// Ordering is not guaranteed.
pub fn scan_working_tree(root: &Path) -> Vec<ScannedFile> {
    let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut out = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .follow_links(true)
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !EXCLUDED_DIRS.contains(&name.as_ref())
        })
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel_path = rel.to_string_lossy().replace('\\', "/");
        if classify(&rel_path).is_none() {
            continue;
        }
        // A symlink target outside the root would escape the project.
        if let Ok(canonical) = fs::canonicalize(path)
            && !canonical.starts_with(&canonical_root)
        {
            continue;
        }
        let Ok(meta) = path.metadata() else {
            continue;
        };
        if meta.len() > MAX_FILE_BYTES {
            continue;
        }
        if is_probably_binary(path) {
            continue;
        }
        let (mtime_secs, mtime_nanos) = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or((0, 0), |d| (d.as_secs(), d.subsec_nanos()));
        out.push(ScannedFile {
            rel_path,
            mtime_secs,
            mtime_nanos,
            size: meta.len(),
        });
    }
    out
}

fn is_probably_binary(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut buffer = [0u8; BINARY_SNIFF_BYTES];
    let Ok(read) = file.read(&mut buffer) else {
        return false;
    };
    buffer[..read].contains(&0)
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::{MAX_FILE_BYTES, scan_working_tree};

    fn temp_tree(tag: &str) -> PathBuf {
        let base = std::env::temp_dir().join(format!("quarry-scan-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(base.join("src")).expect("mkdir");
        base
    }

    fn names(base: &PathBuf) -> Vec<String> {
        let mut out = scan_working_tree(base)
            .into_iter()
            .map(|f| f.rel_path)
            .collect::<Vec<_>>();
        out.sort();
        out
    }

    #[test]
    fn scanner_skips_hardcoded_excludes() {
        let base = temp_tree("excludes");
        fs::create_dir_all(base.join("node_modules/pkg")).expect("mkdir");
        fs::create_dir_all(base.join(".venv/lib")).expect("mkdir");
        fs::write(base.join("src/main.rs"), "fn main() {}").expect("write");
        fs::write(base.join("node_modules/pkg/a.js"), "x").expect("write");
        fs::write(base.join(".venv/lib/a.py"), "x").expect("write");

        assert_eq!(names(&base), vec!["src/main.rs".to_string()]);
    }

    #[test]
    fn scanner_honors_gitignore() {
        let base = temp_tree("gitignore");
        fs::write(base.join(".gitignore"), "generated/\n*.tmp.rs\n").expect("write");
        fs::create_dir_all(base.join("generated")).expect("mkdir");
        fs::write(base.join("generated/out.rs"), "fn g() {}").expect("write");
        fs::write(base.join("src/keep.rs"), "fn k() {}").expect("write");
        fs::write(base.join("src/scratch.tmp.rs"), "fn s() {}").expect("write");

        assert_eq!(names(&base), vec!["src/keep.rs".to_string()]);
    }

    #[test]
    fn scanner_applies_the_size_cap_inclusively() {
        let base = temp_tree("sizecap");
        fs::write(base.join("src/at_cap.rs"), "a".repeat(MAX_FILE_BYTES as usize)).expect("write");
        fs::write(
            base.join("src/over_cap.rs"),
            "a".repeat(MAX_FILE_BYTES as usize + 1),
        )
        .expect("write");

        assert_eq!(names(&base), vec!["src/at_cap.rs".to_string()]);
    }

    #[test]
    fn scanner_skips_files_with_early_nul_but_keeps_late_nul() {
        let base = temp_tree("binary");
        let mut early = b"fn main() {}".to_vec();
        early.insert(3, 0);
        fs::write(base.join("src/early.rs"), early).expect("write");

        let mut late = vec![b'a'; 9000];
        late.push(0);
        fs::write(base.join("src/late.rs"), late).expect("write");

        assert_eq!(names(&base), vec!["src/late.rs".to_string()]);
    }

    #[test]
    fn scanner_skips_unclassified_extensions() {
        let base = temp_tree("classify");
        fs::write(base.join("src/tool.rs"), "fn t() {}").expect("write");
        fs::write(base.join("src/blob.bin"), "data").expect("write");
        fs::write(base.join("README.md"), "# doc").expect("write");

        assert_eq!(
            names(&base),
            vec!["README.md".to_string(), "src/tool.rs".to_string()]
        );
    }
}
