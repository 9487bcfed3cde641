pub mod cache;
pub mod fusion;
pub mod keyword;
pub mod llm;
pub mod rerank;
pub mod retrieval;
pub mod vector;

pub use cache::{CachedAnswer, ClearScope, QueryCache};
pub use fusion::{DEFAULT_ALPHA, DEFAULT_BETA, MAX_CHUNKS_PER_FILE, dedup_per_file, fuse};
pub use keyword::{KeywordHit, KeywordIndex, code_tokens};
pub use llm::LlmClient;
pub use rerank::{RerankOutcome, rerank};
pub use retrieval::{FusionWeights, OVERFETCH_FACTOR, RetrievalOutcome, hybrid_search};
pub use vector::{VectorHit, VectorIndex, VectorRow};
