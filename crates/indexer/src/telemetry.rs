use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use common::ChangeStats;

#[derive(Default)]
pub struct IndexerTelemetry {
    catchups_completed: AtomicU64,
    files_indexed: AtomicU64,
    files_deleted: AtomicU64,
    file_errors: AtomicU64,
    last_catch_up_unix_ms: AtomicU64,
}

impl IndexerTelemetry {
    pub fn record_catch_up(&self, stats: &ChangeStats) {
        self.catchups_completed.fetch_add(1, Ordering::Relaxed);
        self.files_indexed
            .fetch_add((stats.added + stats.modified) as u64, Ordering::Relaxed);
        self.files_deleted
            .fetch_add(stats.deleted as u64, Ordering::Relaxed);
        self.file_errors
            .fetch_add(stats.errors.len() as u64, Ordering::Relaxed);
        self.last_catch_up_unix_ms
            .store(unix_now_ms(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexerTelemetrySnapshot {
        IndexerTelemetrySnapshot {
            catchups_completed: self.catchups_completed.load(Ordering::Relaxed),
            files_indexed: self.files_indexed.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            file_errors: self.file_errors.load(Ordering::Relaxed),
            last_catch_up_unix_ms: self.last_catch_up_unix_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerTelemetrySnapshot {
    pub catchups_completed: u64,
    pub files_indexed: u64,
    pub files_deleted: u64,
    pub file_errors: u64,
    pub last_catch_up_unix_ms: u64,
}

fn unix_now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as u64,
        Err(_) => 0,
    }
}
