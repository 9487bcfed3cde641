pub mod catchup;
pub mod chunker;
pub mod languages;
pub mod scanner;
pub mod state;
pub mod symbols;
pub mod telemetry;

pub use catchup::{
    CatchUpGate, CatchUpTarget, GateTicket, IDLE_DEADLINE, await_leader, run_catch_up,
};
pub use chunker::chunk_file;
pub use languages::{LanguageKind, classify};
pub use scanner::{MAX_FILE_BYTES, ScannedFile, scan_working_tree};
pub use state::{FileRecord, IndexState, content_hash};
pub use symbols::SymbolStore;
pub use telemetry::IndexerTelemetry;
