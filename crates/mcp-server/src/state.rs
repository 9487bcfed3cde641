use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use common::{
    ChangeStats, CoreError, CoreResult,
    config::AppConfig,
    projects::{Project, ProjectRegistry},
};
use dashmap::DashMap;
use embeddings::{Embedder, EmbeddingConfig};
use indexer::{
    CatchUpGate, CatchUpTarget, GateTicket, IndexState, IndexerTelemetry, SymbolStore,
    await_leader, run_catch_up,
};
use search_core::{KeywordIndex, LlmClient, QueryCache, VectorIndex};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Long-lived owner of every shared collaborator: registry, embedder, LLM
/// client, and the per-project handle map. Constructed once at startup and
/// passed into each operation; there is no global mutable state.
pub struct CoreContext {
    pub config: AppConfig,
    pub registry: ProjectRegistry,
    pub embedder: Option<Arc<Embedder>>,
    pub llm: Option<LlmClient>,
    pub telemetry: IndexerTelemetry,
    handles: DashMap<String, Arc<ProjectHandles>>,
    search_latencies_ms: parking_lot::Mutex<VecDeque<u128>>,
    shutting_down: AtomicBool,
}

/// One project's open indexes behind the project lock hierarchy: the
/// `RwLock` write half serializes catch-up/rebuild/remove against all
/// readers, and the gate coalesces concurrent catch-ups.
pub struct ProjectHandles {
    pub project: Project,
    pub indexes: RwLock<ProjectIndexes>,
    pub cache: QueryCache,
    pub gate: CatchUpGate,
    needs_rebuild: AtomicBool,
    last_catch_up_unix: AtomicU64,
}

pub struct ProjectIndexes {
    pub state: IndexState,
    pub keyword: KeywordIndex,
    pub vector: Option<VectorIndex>,
    pub symbols: SymbolStore,
}

impl CoreContext {
    pub fn open(config: AppConfig) -> CoreResult<Self> {
        let registry = ProjectRegistry::open(Path::new(&config.data_dir))?;
        let embedder = match Embedder::from_config(&EmbeddingConfig::from_settings(&config.embedding))
        {
            Ok(embedder) => {
                tracing::info!(backend = embedder.name(), dim = embedder.dim(), "embedder ready");
                Some(Arc::new(embedder))
            }
            Err(err) => {
                tracing::warn!(error = %err, "no embedding backend, projects degrade to keyword-only");
                None
            }
        };
        let llm = LlmClient::from_settings(&config.llm)?;
        Ok(Self {
            config,
            registry,
            embedder,
            llm,
            telemetry: IndexerTelemetry::default(),
            handles: DashMap::new(),
            search_latencies_ms: parking_lot::Mutex::new(VecDeque::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// The dimension a newly added project freezes, or `None` when vectors
    /// are disabled for it.
    pub fn creation_dim(&self, enable_vectors: bool) -> Option<usize> {
        if !enable_vectors {
            return None;
        }
        self.embedder.as_ref().map(|e| e.dim())
    }

    /// The embedder, if it matches the project's frozen dimension. A
    /// dimension drift (project created remote, server now local) is a
    /// query-time degradation, never a silent re-embed.
    pub fn embedder_for(&self, project: &Project) -> Option<Arc<Embedder>> {
        let dim = project.embedding_dim?;
        let embedder = self.embedder.as_ref()?;
        if embedder.dim() == dim {
            Some(embedder.clone())
        } else {
            tracing::warn!(
                project = %project.id,
                project_dim = dim,
                embedder_dim = embedder.dim(),
                "embedder dimension does not match project"
            );
            None
        }
    }

    /// Opens (or returns) the handle set for a project. Corrupt backing
    /// files flag the project for rebuild instead of failing the process.
    pub fn handles(&self, project: &Project) -> CoreResult<Arc<ProjectHandles>> {
        if let Some(existing) = self.handles.get(&project.id) {
            return Ok(existing.clone());
        }

        let dir = self.registry.project_dir(&project.id);
        std::fs::create_dir_all(&dir)
            .map_err(|err| CoreError::io("failed creating project directory", &err))?;

        let mut needs_rebuild = false;
        let state = match IndexState::open(&self.registry.state_file(&project.id)) {
            Ok(state) => state,
            Err(CoreError::Corrupt(reason)) => {
                tracing::warn!(project = %project.id, reason, "index state corrupt, flagging rebuild");
                needs_rebuild = true;
                let _ = std::fs::remove_file(self.registry.state_file(&project.id));
                IndexState::open(&self.registry.state_file(&project.id))?
            }
            Err(err) => return Err(err),
        };
        let keyword = KeywordIndex::open_or_create(&self.registry.keyword_dir(&project.id))
            .map_err(|err| CoreError::Corrupt(format!("keyword index: {err}")))?;
        let vector = match project.embedding_dim {
            Some(dim) => match VectorIndex::open(
                dim,
                &self.registry.vector_index_file(&project.id),
                &self.registry.vector_meta_file(&project.id),
            ) {
                Ok(vector) => Some(vector),
                Err(CoreError::Corrupt(reason)) => {
                    tracing::warn!(project = %project.id, reason, "vector index corrupt, flagging rebuild");
                    needs_rebuild = true;
                    let _ = std::fs::remove_file(self.registry.vector_index_file(&project.id));
                    let _ = std::fs::remove_file(self.registry.vector_meta_file(&project.id));
                    Some(VectorIndex::create(
                        dim,
                        &self.registry.vector_index_file(&project.id),
                        &self.registry.vector_meta_file(&project.id),
                    )?)
                }
                Err(err) => return Err(err),
            },
            None => None,
        };
        let symbols = SymbolStore::open(&self.registry.symbols_file(&project.id));
        let cache = QueryCache::open(
            &project.id,
            &self.config.cache,
            project.embedding_dim,
            &self.registry.cache_exact_file(&project.id),
            &self.registry.cache_semantic_index_file(&project.id),
            &self.registry.cache_semantic_meta_file(&project.id),
        );

        let handles = Arc::new(ProjectHandles {
            project: project.clone(),
            indexes: RwLock::new(ProjectIndexes {
                state,
                keyword,
                vector,
                symbols,
            }),
            cache,
            gate: CatchUpGate::new(),
            needs_rebuild: AtomicBool::new(needs_rebuild),
            last_catch_up_unix: AtomicU64::new(0),
        });
        // First insert wins if two callers raced to open the same project.
        let canonical = self
            .handles
            .entry(project.id.clone())
            .or_insert(handles)
            .value()
            .clone();
        Ok(canonical)
    }

    pub fn drop_handles(&self, project_id: &str) {
        self.handles.remove(project_id);
    }

    pub fn open_handles(&self) -> Vec<Arc<ProjectHandles>> {
        self.handles.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn record_search_latency_ms(&self, latency_ms: u128) {
        let mut guard = self.search_latencies_ms.lock();
        guard.push_back(latency_ms);
        if guard.len() > 1024 {
            let _ = guard.pop_front();
        }
    }

    pub fn search_latency_percentiles_ms(&self) -> (u128, u128) {
        let guard = self.search_latencies_ms.lock();
        if guard.is_empty() {
            return (0, 0);
        }
        let mut values = guard.iter().copied().collect::<Vec<_>>();
        values.sort_unstable();
        (percentile(&values, 0.50), percentile(&values, 0.95))
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn persist_runtime_state(&self) -> CoreResult<()> {
        let mut projects = self
            .open_handles()
            .iter()
            .map(|handles| ProjectRuntimeStatus {
                project_id: handles.project.id.clone(),
                name: handles.project.name.clone(),
                needs_rebuild: handles.needs_rebuild(),
                last_catch_up_unix: handles.last_catch_up_unix(),
            })
            .collect::<Vec<_>>();
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        let (p50, p95) = self.search_latency_percentiles_ms();
        let snapshot = RuntimeStateSnapshot {
            projects,
            telemetry: self.telemetry.snapshot(),
            search_latency_ms: SearchLatencySnapshot { p50, p95 },
        };
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| CoreError::Fatal(format!("runtime snapshot serialization: {err}")))?;
        common::projects::atomic_write(
            &self.registry.data_dir().join("runtime-state.json"),
            raw.as_bytes(),
        )
        .map_err(|err| CoreError::io("failed persisting runtime state", &err))
    }
}

impl ProjectHandles {
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    pub fn flag_rebuild(&self) {
        self.needs_rebuild.store(true, Ordering::SeqCst);
    }

    pub fn last_catch_up_unix(&self) -> Option<u64> {
        match self.last_catch_up_unix.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }
}

/// Runs catch-up for a project through the coalescing gate. Followers
/// receive the leader's `ChangeStats`; a rebuild-flagged project is fully
/// re-indexed first.
pub async fn catch_up_project(
    ctx: &CoreContext,
    handles: &Arc<ProjectHandles>,
    cancel: &CancellationToken,
) -> CoreResult<ChangeStats> {
    match handles.gate.enter().await {
        GateTicket::Follower(rx) => await_leader(rx).await,
        GateTicket::Leader(ticket) => {
            let result = catch_up_as_leader(ctx, handles, cancel).await;
            handles.gate.finish(ticket, &result).await;
            if let Ok(stats) = &result {
                ctx.telemetry.record_catch_up(stats);
                handles
                    .last_catch_up_unix
                    .store(unix_now(), Ordering::SeqCst);
                handles.needs_rebuild.store(false, Ordering::SeqCst);
            }
            result
        }
    }
}

async fn catch_up_as_leader(
    ctx: &CoreContext,
    handles: &Arc<ProjectHandles>,
    cancel: &CancellationToken,
) -> CoreResult<ChangeStats> {
    let embedder = ctx.embedder_for(&handles.project);
    let mut indexes = handles.indexes.write().await;
    if handles.needs_rebuild() {
        reset_indexes(&mut indexes)?;
    }

    let ProjectIndexes {
        state,
        keyword,
        vector,
        symbols,
    } = &mut *indexes;
    let root = std::path::PathBuf::from(&handles.project.root);
    let timeout = std::time::Duration::from_secs(ctx.config.catchup_timeout_secs.max(1));
    let work = run_catch_up(
        CatchUpTarget {
            project_id: &handles.project.id,
            root: &root,
            state,
            keyword,
            vector: vector.as_mut(),
            symbols,
            embedder: embedder.as_deref(),
        },
        cancel,
    );
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Transient("catch-up timed out".into())),
    }
}

pub fn reset_indexes(indexes: &mut ProjectIndexes) -> CoreResult<()> {
    indexes.state.clear();
    indexes
        .keyword
        .rebuild()
        .map_err(|err| CoreError::Unavailable(format!("keyword rebuild: {err}")))?;
    if let Some(vector) = indexes.vector.as_mut() {
        vector.rebuild()?;
    }
    indexes.symbols.clear();
    Ok(())
}

#[derive(Debug, Serialize)]
struct RuntimeStateSnapshot {
    projects: Vec<ProjectRuntimeStatus>,
    telemetry: indexer::telemetry::IndexerTelemetrySnapshot,
    search_latency_ms: SearchLatencySnapshot,
}

#[derive(Debug, Serialize)]
struct ProjectRuntimeStatus {
    project_id: String,
    name: String,
    needs_rebuild: bool,
    last_catch_up_unix: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SearchLatencySnapshot {
    p50: u128,
    p95: u128,
}

fn percentile(sorted: &[u128], p: f64) -> u128 {
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use common::config::AppConfig;

    use super::CoreContext;

    fn temp_config(tag: &str) -> (AppConfig, std::path::PathBuf) {
        let base = std::env::temp_dir().join(format!("quarry-state-ctx-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("tree")).expect("mkdir");
        let config = AppConfig {
            data_dir: base.join("data").to_string_lossy().to_string(),
            embedding: common::config::EmbeddingSettings {
                allow_pseudo: true,
                ..common::config::EmbeddingSettings::default()
            },
            ..AppConfig::default()
        };
        (config, base)
    }

    #[tokio::test]
    async fn handles_are_cached_per_project() {
        let (config, base) = temp_config("cached");
        let ctx = CoreContext::open(config).expect("ctx");
        let project = ctx
            .registry
            .add(&base.join("tree"), Some("demo"), ctx.creation_dim(true))
            .expect("add");

        let first = ctx.handles(&project).expect("handles");
        let second = ctx.handles(&project).expect("handles again");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn corrupt_state_file_flags_rebuild_instead_of_failing() {
        let (config, base) = temp_config("corrupt");
        let ctx = CoreContext::open(config).expect("ctx");
        let project = ctx
            .registry
            .add(&base.join("tree"), Some("demo"), ctx.creation_dim(true))
            .expect("add");

        let state_file = ctx.registry.state_file(&project.id);
        std::fs::create_dir_all(state_file.parent().expect("parent")).expect("mkdir");
        std::fs::write(&state_file, "{\"version\":99}\n").expect("write");

        let handles = ctx.handles(&project).expect("handles");
        assert!(handles.needs_rebuild());
    }

    #[test]
    fn latency_percentiles_track_recorded_values() {
        let (config, _base) = temp_config("latency");
        let ctx = CoreContext::open(config).expect("ctx");
        for ms in [10u128, 20, 30, 40, 1000] {
            ctx.record_search_latency_ms(ms);
        }
        let (p50, p95) = ctx.search_latency_percentiles_ms();
        assert_eq!(p50, 30);
        assert_eq!(p95, 1000);
    }
}
