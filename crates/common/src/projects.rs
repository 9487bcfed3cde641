use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

pub const AUTO_SELECTOR: &str = "auto";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Project {
    /// 8 hex chars derived from root path and creation time.
    pub id: String,
    pub name: String,
    /// Absolute root path of the working tree.
    pub root: String,
    pub created_at_unix: u64,
    pub active: bool,
    /// Embedding dimension frozen at creation; `None` means the project was
    /// created embedding-disabled and its semantic tiers stay inert.
    pub embedding_dim: Option<usize>,
}

/// Process-wide registry of projects. One lock covers both the in-memory
/// list and the persistent `projects.json`; all writes go through
/// temp-and-rename.
pub struct ProjectRegistry {
    data_dir: PathBuf,
    inner: Mutex<Vec<Project>>,
}

impl ProjectRegistry {
    pub fn open(data_dir: &Path) -> CoreResult<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|err| CoreError::io("failed creating data directory", &err))?;
        let file = data_dir.join("projects.json");
        let projects = if file.exists() {
            let raw = fs::read_to_string(&file)
                .map_err(|err| CoreError::io("failed reading registry", &err))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<Vec<Project>>(&raw)
                    .map_err(|err| CoreError::Corrupt(format!("registry file: {err}")))?
            }
        } else {
            Vec::new()
        };
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            inner: Mutex::new(projects),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Registers a working tree. Registering an already-known root is
    /// idempotent and returns the existing record; a name collision on a
    /// different root is `AlreadyExists`.
    pub fn add(
        &self,
        path: &Path,
        name: Option<&str>,
        embedding_dim: Option<usize>,
    ) -> CoreResult<Project> {
        let root = normalize_root(path)?;
        let mut projects = self.lock()?;
        if let Some(existing) = projects.iter().find(|p| p.root == root) {
            return Ok(existing.clone());
        }

        let name = match name.filter(|n| !n.trim().is_empty() && *n != AUTO_SELECTOR) {
            Some(given) => sanitize_name(given),
            None => sanitize_name(&basename(&root)),
        };
        if projects.iter().any(|p| p.name == name) {
            return Err(CoreError::AlreadyExists(format!("project name {name}")));
        }

        let created_at_unix = unix_now();
        let project = Project {
            id: derive_id(&root, created_at_unix),
            name,
            root,
            created_at_unix,
            active: projects.is_empty(),
            embedding_dim,
        };
        projects.push(project.clone());
        self.persist(&projects)?;
        Ok(project)
    }

    /// Resolves a selector to a project. "auto"/empty first tries a
    /// longest-prefix match of the caller's working directory against
    /// registered roots, then the active flag.
    pub fn resolve(&self, selector: &str, working_dir: Option<&Path>) -> CoreResult<Project> {
        let projects = self.lock()?;
        find_project(&projects, selector, working_dir).map(Clone::clone)
    }

    pub fn activate(&self, selector: &str) -> CoreResult<Project> {
        let mut projects = self.lock()?;
        let id = find_project(&projects, selector, None)?.id.clone();
        for project in projects.iter_mut() {
            project.active = project.id == id;
        }
        self.persist(&projects)?;
        let activated = projects
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| CoreError::Fatal("activated project vanished from registry".into()))?;
        Ok(activated)
    }

    /// Removes the record and deletes every derived index file for the
    /// project.
    pub fn remove(&self, selector: &str) -> CoreResult<Project> {
        let mut projects = self.lock()?;
        let removed = find_project(&projects, selector, None)?.clone();
        projects.retain(|p| p.id != removed.id);
        self.persist(&projects)?;
        drop(projects);

        let derived = self.project_dir(&removed.id);
        if derived.exists()
            && let Err(err) = fs::remove_dir_all(&derived)
        {
            tracing::warn!(project = %removed.id, error = %err, "failed purging derived indexes");
        }
        Ok(removed)
    }

    pub fn list(&self) -> CoreResult<Vec<Project>> {
        let projects = self.lock()?;
        Ok(projects.clone())
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id)
    }

    pub fn state_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("state.jsonl")
    }

    pub fn keyword_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("keyword")
    }

    pub fn vector_index_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("vector.idx")
    }

    pub fn vector_meta_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("vector.meta.jsonl")
    }

    pub fn cache_exact_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("cache_exact.jsonl")
    }

    pub fn cache_semantic_index_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("cache_semantic.idx")
    }

    pub fn cache_semantic_meta_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("cache_semantic.meta.jsonl")
    }

    pub fn symbols_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("symbols.jsonl")
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, Vec<Project>>> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Fatal("registry lock poisoned".into()))
    }

    fn persist(&self, projects: &[Project]) -> CoreResult<()> {
        let target = self.data_dir.join("projects.json");
        let raw = serde_json::to_string_pretty(projects)
            .map_err(|err| CoreError::Fatal(format!("registry serialization: {err}")))?;
        atomic_write(&target, raw.as_bytes())
            .map_err(|err| CoreError::io("failed persisting registry", &err))
    }
}

/// Temp-file-and-rename write; readers never observe a half-written file.
pub fn atomic_write(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "write".to_string()),
        std::process::id()
    ));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, target)
}

fn find_project<'a>(
    projects: &'a [Project],
    selector: &str,
    working_dir: Option<&Path>,
) -> CoreResult<&'a Project> {
    let selector = selector.trim();
    if selector.is_empty() || selector == AUTO_SELECTOR {
        if let Some(dir) = working_dir
            && let Some(found) = longest_prefix_match(projects, dir)
        {
            return Ok(found);
        }
        if let Some(active) = projects.iter().find(|p| p.active) {
            return Ok(active);
        }
        return Err(CoreError::NotFound(
            "no project matches the working directory and none is active".into(),
        ));
    }

    projects
        .iter()
        .find(|p| p.name == selector)
        .or_else(|| projects.iter().find(|p| p.id == selector))
        .or_else(|| {
            let as_root = normalize_root(Path::new(selector)).ok()?;
            projects.iter().find(|p| p.root == as_root)
        })
        .ok_or_else(|| CoreError::NotFound(format!("project {selector}")))
}

fn longest_prefix_match<'a>(projects: &'a [Project], dir: &Path) -> Option<&'a Project> {
    let dir = normalize_root(dir).ok()?;
    projects
        .iter()
        .filter(|p| {
            let root = Path::new(&p.root);
            Path::new(&dir).starts_with(root)
        })
        .max_by_key(|p| p.root.len())
}

fn normalize_root(path: &Path) -> CoreResult<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| CoreError::io("failed resolving current directory", &err))?
            .join(path)
    };
    let canonical = fs::canonicalize(&absolute).unwrap_or(absolute);
    Ok(canonical.to_string_lossy().replace('\\', "/"))
}

fn sanitize_name(raw: &str) -> String {
    let cleaned = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "project".to_string()
    } else {
        trimmed.to_string()
    }
}

fn basename(root: &str) -> String {
    Path::new(root)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}

fn derive_id(root: &str, created_at_unix: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.as_bytes());
    hasher.update(created_at_unix.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}

fn unix_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{ProjectRegistry, sanitize_name};
    use crate::error::CoreError;

    fn temp_dirs(tag: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let base = std::env::temp_dir().join(format!("quarry-registry-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&base);
        let data = base.join("data");
        let tree = base.join("tree");
        fs::create_dir_all(&data).expect("data dir");
        fs::create_dir_all(tree.join("sub")).expect("tree dir");
        (data, tree)
    }

    #[test]
    fn add_is_idempotent_per_root_and_derives_names() {
        let (data, tree) = temp_dirs("add");
        let registry = ProjectRegistry::open(&data).expect("registry");

        let first = registry.add(&tree, None, Some(384)).expect("add");
        let second = registry.add(&tree, Some("other"), None).expect("re-add");
        assert_eq!(first.id, second.id);
        assert_eq!(first.embedding_dim, Some(384));
        assert_eq!(registry.list().expect("list").len(), 1);
        assert_eq!(first.id.len(), 8);
    }

    #[test]
    fn resolve_auto_prefers_longest_prefix_match() {
        let (data, tree) = temp_dirs("prefix");
        let nested = tree.join("sub");
        let registry = ProjectRegistry::open(&data).expect("registry");
        let outer = registry.add(&tree, Some("outer"), None).expect("outer");
        let inner = registry.add(&nested, Some("inner"), None).expect("inner");

        let resolved = registry
            .resolve("auto", Some(&nested.join("deeper")))
            .expect("resolve");
        assert_eq!(resolved.id, inner.id);

        let resolved = registry.resolve("auto", Some(&tree)).expect("resolve");
        assert_eq!(resolved.id, outer.id);
    }

    #[test]
    fn resolve_falls_back_to_active_project() {
        let (data, tree) = temp_dirs("active");
        let registry = ProjectRegistry::open(&data).expect("registry");
        let project = registry.add(&tree, Some("only"), None).expect("add");
        assert!(project.active);

        let resolved = registry.resolve("", None).expect("resolve");
        assert_eq!(resolved.id, project.id);
    }

    #[test]
    fn resolve_unknown_selector_is_not_found() {
        let (data, _tree) = temp_dirs("missing");
        let registry = ProjectRegistry::open(&data).expect("registry");
        let err = registry.resolve("nope", None).expect_err("must fail");
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn activate_moves_the_flag() {
        let (data, tree) = temp_dirs("activate");
        let nested = tree.join("sub");
        let registry = ProjectRegistry::open(&data).expect("registry");
        let a = registry.add(&tree, Some("a"), None).expect("a");
        let b = registry.add(&nested, Some("b"), None).expect("b");

        registry.activate("b").expect("activate");
        let listed = registry.list().expect("list");
        assert!(!listed.iter().find(|p| p.id == a.id).expect("a").active);
        assert!(listed.iter().find(|p| p.id == b.id).expect("b").active);
    }

    #[test]
    fn remove_purges_derived_index_directory() {
        let (data, tree) = temp_dirs("remove");
        let registry = ProjectRegistry::open(&data).expect("registry");
        let project = registry.add(&tree, Some("doomed"), None).expect("add");
        let derived = registry.project_dir(&project.id);
        fs::create_dir_all(&derived).expect("derived dir");
        fs::write(derived.join("state.jsonl"), "x").expect("state");

        registry.remove("doomed").expect("remove");
        assert!(!derived.exists());
        assert!(registry.list().expect("list").is_empty());
    }

    #[test]
    fn registry_reloads_from_disk() {
        let (data, tree) = temp_dirs("reload");
        {
            let registry = ProjectRegistry::open(&data).expect("registry");
            registry.add(&tree, Some("persisted"), None).expect("add");
        }
        let reopened = ProjectRegistry::open(&data).expect("reopen");
        let listed = reopened.list().expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "persisted");
    }

    #[test]
    fn names_are_sanitized_to_portable_characters() {
        assert_eq!(sanitize_name("My Repo (v2)"), "My-Repo--v2");
        assert_eq!(sanitize_name("***"), "project");
        assert_eq!(sanitize_name("ok_name-1"), "ok_name-1");
    }

    proptest::proptest! {
        #[test]
        fn sanitized_names_only_carry_portable_characters(raw in ".{0,64}") {
            let name = sanitize_name(&raw);
            proptest::prop_assert!(!name.is_empty());
            proptest::prop_assert!(
                name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }
}
