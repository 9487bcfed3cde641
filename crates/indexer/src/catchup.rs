use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use ahash::AHashMap;
use common::{ChangeStats, CoreError, CoreResult};
use embeddings::Embedder;
use rayon::prelude::*;
use search_core::{KeywordIndex, VectorIndex, VectorRow};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    chunker::chunk_file,
    languages::classify,
    scanner::{ScannedFile, scan_working_tree},
    state::{FileDisposition, FileRecord, IndexState, classify_scanned, content_hash},
    symbols::SymbolStore,
};

/// A catch-up that processes no file for this long is aborted.
pub const IDLE_DEADLINE: Duration = Duration::from_secs(60);

pub struct CatchUpTarget<'a> {
    pub project_id: &'a str,
    pub root: &'a Path,
    pub state: &'a mut IndexState,
    pub keyword: &'a mut KeywordIndex,
    pub vector: Option<&'a mut VectorIndex>,
    pub symbols: &'a mut SymbolStore,
    pub embedder: Option<&'a Embedder>,
}

/// Diffs the working tree against [`IndexState`] and converges every index.
/// Single-file failures are recorded in `ChangeStats.errors` and retried by
/// the next catch-up; only a state-persist failure fails the whole pass.
/// Callers serialize invocations through [`CatchUpGate`].
pub async fn run_catch_up(
    target: CatchUpTarget<'_>,
    cancel: &CancellationToken,
) -> CoreResult<ChangeStats> {
    let progress = AtomicU64::new(0);
    let work = catch_up(target, cancel, &progress);
    tokio::pin!(work);

    let mut last_progress = 0u64;
    loop {
        tokio::select! {
            result = &mut work => return result,
            () = tokio::time::sleep(IDLE_DEADLINE) => {
                let seen = progress.load(Ordering::Relaxed);
                if seen == last_progress {
                    return Err(CoreError::Transient(
                        "catch-up made no progress within the idle deadline".into(),
                    ));
                }
                last_progress = seen;
            }
        }
    }
}

async fn catch_up(
    target: CatchUpTarget<'_>,
    cancel: &CancellationToken,
    progress: &AtomicU64,
) -> CoreResult<ChangeStats> {
    let CatchUpTarget {
        project_id,
        root,
        state,
        keyword,
        mut vector,
        symbols,
        embedder,
    } = target;

    let started = Instant::now();
    let mut stats = ChangeStats::default();

    let scanned = scan_working_tree(root);
    let by_path: AHashMap<&str, &ScannedFile> = scanned
        .iter()
        .map(|file| (file.rel_path.as_str(), file))
        .collect();

    let deleted_paths = state
        .iter()
        .filter(|record| !by_path.contains_key(record.path.as_str()))
        .map(|record| record.path.clone())
        .collect::<Vec<_>>();
    for path in deleted_paths {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        keyword
            .delete_by_file(&path)
            .map_err(|err| CoreError::Unavailable(format!("keyword delete: {err}")))?;
        if let Some(vector) = vector.as_deref_mut() {
            vector.delete_by_file(&path)?;
        }
        symbols.remove_file(&path);
        state.delete(&path);
        stats.deleted += 1;
        progress.fetch_add(1, Ordering::Relaxed);
    }

    let candidates = scanned
        .iter()
        .filter_map(|file| match classify_scanned(state, file) {
            FileDisposition::Unchanged => None,
            disposition => Some((file.clone(), disposition)),
        })
        .collect::<Vec<_>>();

    // Hashing dominates large diffs, so it fans out over the worker pool;
    // index mutation stays sequential.
    let hashed = candidates
        .into_par_iter()
        .map(|(file, disposition)| {
            let bytes = fs::read(root.join(&file.rel_path)).ok();
            let hash = bytes.as_deref().map(content_hash);
            (file, disposition, bytes, hash)
        })
        .collect::<Vec<_>>();

    for (file, disposition, bytes, hash) in hashed {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        progress.fetch_add(1, Ordering::Relaxed);

        let (Some(bytes), Some(hash)) = (bytes, hash) else {
            stats.errors.push(format!("{}: read failed", file.rel_path));
            continue;
        };

        let prior = state.get(&file.rel_path).cloned();
        if disposition == FileDisposition::NeedsHash
            && let Some(prior) = &prior
            && prior.content_hash == hash
        {
            // Touched but content-identical: refresh the fingerprint so the
            // next scan stops re-hashing it.
            state.put(FileRecord {
                mtime_secs: file.mtime_secs,
                mtime_nanos: file.mtime_nanos,
                size: file.size,
                ..prior.clone()
            });
            continue;
        }

        let Some(kind) = classify(&file.rel_path) else {
            continue;
        };
        let chunks = match chunk_file(project_id, &file.rel_path, &bytes, kind) {
            Ok(chunks) => chunks,
            Err(err) => {
                stats.errors.push(format!("{}: {err}", file.rel_path));
                continue;
            }
        };

        let is_modified = prior.is_some();
        if is_modified {
            if let Err(err) = keyword.delete_by_file(&file.rel_path) {
                stats.errors.push(format!("{}: keyword delete: {err}", file.rel_path));
                continue;
            }
            if let Some(vector) = vector.as_deref_mut()
                && let Err(err) = vector.delete_by_file(&file.rel_path)
            {
                stats.errors.push(format!("{}: vector delete: {err}", file.rel_path));
                continue;
            }
            symbols.remove_file(&file.rel_path);
            state.delete(&file.rel_path);
        }
        if chunks.is_empty() {
            continue;
        }

        if let Err(err) = keyword.upsert_chunks(&chunks) {
            stats.errors.push(format!("{}: keyword upsert: {err}", file.rel_path));
            let _ = keyword.delete_by_file(&file.rel_path);
            continue;
        }

        if let Some(vector) = vector.as_deref_mut() {
            let vectors = match embed_chunks(embedder, &chunks, cancel).await {
                Ok(vectors) => vectors,
                Err(err) => {
                    // Roll the file back so keyword and vector stay in
                    // lockstep; the unchanged state record retries it next
                    // catch-up.
                    let _ = keyword.delete_by_file(&file.rel_path);
                    stats.errors.push(format!("{}: embedding: {err}", file.rel_path));
                    continue;
                }
            };
            let rows = chunks
                .iter()
                .map(|chunk| VectorRow {
                    chunk_id: chunk.id.clone(),
                    path: chunk.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    text: chunk.text.clone(),
                    deleted: false,
                })
                .collect::<Vec<_>>();
            if let Err(err) = vector.upsert(rows, &vectors) {
                let _ = keyword.delete_by_file(&file.rel_path);
                stats.errors.push(format!("{}: vector upsert: {err}", file.rel_path));
                continue;
            }
        }

        symbols.update_file(&file.rel_path, &String::from_utf8_lossy(&bytes));
        state.put(FileRecord {
            path: file.rel_path.clone(),
            mtime_secs: file.mtime_secs,
            mtime_nanos: file.mtime_nanos,
            size: file.size,
            content_hash: hash,
            indexed_at_unix: unix_now(),
        });
        if is_modified {
            stats.modified += 1;
        } else {
            stats.added += 1;
        }
    }

    if let Some(vector) = vector.as_deref_mut()
        && vector.needs_compaction()
    {
        vector.compact()?;
    }
    if let Err(err) = symbols.persist() {
        tracing::warn!(project = project_id, error = %err, "failed persisting symbol store");
    }
    state.persist()?;

    stats.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        project = project_id,
        added = stats.added,
        modified = stats.modified,
        deleted = stats.deleted,
        errors = stats.errors.len(),
        duration_ms = stats.duration_ms,
        "catch-up complete"
    );
    Ok(stats)
}

async fn embed_chunks(
    embedder: Option<&Embedder>,
    chunks: &[common::Chunk],
    cancel: &CancellationToken,
) -> CoreResult<Vec<Vec<f32>>> {
    let Some(embedder) = embedder else {
        return Err(CoreError::Unavailable("no embedder configured".into()));
    };
    let texts = chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>();
    tokio::select! {
        result = embedder.embed(&texts) => result,
        () = cancel.cancelled() => Err(CoreError::Cancelled),
    }
}

type SharedOutcome = Result<ChangeStats, String>;

/// At most one catch-up per project runs at a time; concurrent callers
/// coalesce and receive the leader's result.
pub struct CatchUpGate {
    slot: Mutex<Option<watch::Receiver<Option<SharedOutcome>>>>,
}

pub enum GateTicket {
    Leader(LeaderTicket),
    Follower(watch::Receiver<Option<SharedOutcome>>),
}

pub struct LeaderTicket {
    tx: watch::Sender<Option<SharedOutcome>>,
}

impl Default for CatchUpGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CatchUpGate {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub async fn enter(&self) -> GateTicket {
        let mut slot = self.slot.lock().await;
        if let Some(rx) = slot.as_ref() {
            let leader_gone = rx.borrow().is_some() || rx.has_changed().is_err();
            if !leader_gone {
                return GateTicket::Follower(rx.clone());
            }
        }
        let (tx, rx) = watch::channel(None);
        *slot = Some(rx);
        GateTicket::Leader(LeaderTicket { tx })
    }

    pub async fn finish(&self, ticket: LeaderTicket, outcome: &CoreResult<ChangeStats>) {
        let shared = match outcome {
            Ok(stats) => Ok(stats.clone()),
            Err(err) => Err(err.to_string()),
        };
        let _ = ticket.tx.send(Some(shared));
        *self.slot.lock().await = None;
    }
}

pub async fn await_leader(
    mut rx: watch::Receiver<Option<SharedOutcome>>,
) -> CoreResult<ChangeStats> {
    let outcome = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| CoreError::Unavailable("catch-up leader aborted".into()))?
        .clone();
    match outcome {
        Some(Ok(stats)) => Ok(stats),
        Some(Err(message)) => Err(CoreError::Unavailable(message)),
        None => Err(CoreError::Fatal("catch-up gate yielded no outcome".into())),
    }
}

fn unix_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}
