use embeddings::{Embedder, EmbeddingConfig};
use indexer::{CatchUpTarget, IndexState, SymbolStore, run_catch_up};
use search_core::{KeywordIndex, VectorIndex};
use tokio_util::sync::CancellationToken;

struct Harness {
    base: std::path::PathBuf,
    state: IndexState,
    keyword: KeywordIndex,
    vector: VectorIndex,
    symbols: SymbolStore,
    embedder: Embedder,
    cancel: CancellationToken,
}

impl Harness {
    fn new(tag: &str) -> Self {
        let base =
            std::env::temp_dir().join(format!("quarry-catchup-vec-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("tree/src")).expect("mkdir");
        std::fs::create_dir_all(base.join("data")).expect("mkdir");

        let embedder = Embedder::from_config(&EmbeddingConfig {
            allow_pseudo: true,
            ..EmbeddingConfig::default()
        })
        .expect("embedder");
        let vector = VectorIndex::create(
            embedder.dim(),
            &base.join("data/vector.idx"),
            &base.join("data/vector.meta.jsonl"),
        )
        .expect("vector");

        Self {
            state: IndexState::open(&base.join("data/state.jsonl")).expect("state"),
            keyword: KeywordIndex::open_or_create(&base.join("data/keyword")).expect("keyword"),
            vector,
            symbols: SymbolStore::open(&base.join("data/symbols.jsonl")),
            embedder,
            cancel: CancellationToken::new(),
            base,
        }
    }

    fn tree(&self) -> std::path::PathBuf {
        self.base.join("tree")
    }

    async fn catch_up(&mut self) -> common::ChangeStats {
        run_catch_up(
            CatchUpTarget {
                project_id: "pid",
                root: &self.base.join("tree"),
                state: &mut self.state,
                keyword: &mut self.keyword,
                vector: Some(&mut self.vector),
                symbols: &mut self.symbols,
                embedder: Some(&self.embedder),
            },
            &self.cancel,
        )
        .await
        .expect("catch-up")
    }
}

#[tokio::test]
async fn keyword_and_vector_indexes_stay_in_lockstep() {
    let mut harness = Harness::new("lockstep");
    std::fs::write(
        harness.tree().join("src/auth.py"),
        "def login(u, p):\n    return check(u, p)\n",
    )
    .expect("write");
    std::fs::write(
        harness.tree().join("src/billing.py"),
        "def invoice(total):\n    return total * 1.2\n",
    )
    .expect("write");

    let stats = harness.catch_up().await;
    assert_eq!(stats.added, 2);
    assert!(stats.errors.is_empty());

    for path in ["src/auth.py", "src/billing.py"] {
        let keyword_ids = harness.keyword.chunk_ids_for_file(path).expect("ids");
        let vector_ids = harness.vector.chunk_ids_for_file(path);
        assert_eq!(keyword_ids, vector_ids, "divergence for {path}");
        assert!(!keyword_ids.is_empty());
    }
}

#[tokio::test]
async fn modifying_a_file_replaces_its_chunk_range() {
    let mut harness = Harness::new("modify");
    let file = harness.tree().join("src/auth.py");
    std::fs::write(&file, "def login(u, p):\n    return check(u, p)\n").expect("write");
    harness.catch_up().await;
    let before = harness
        .state
        .get("src/auth.py")
        .expect("record")
        .content_hash
        .clone();

    // The rewrite grows the file, so size alone marks it for re-hashing.
    std::fs::write(
        &file,
        "def login(u, p):\n    return check(u, p)\n\ndef logout():\n    pass\n",
    )
    .expect("rewrite");

    let stats = harness.catch_up().await;
    assert_eq!((stats.added, stats.modified), (0, 1));

    let after = harness
        .state
        .get("src/auth.py")
        .expect("record")
        .content_hash
        .clone();
    assert_ne!(before, after);

    let hits = harness.keyword.search("logout", 10).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "pid:src/auth.py:0");
    assert_eq!(hits[0].start_line, 1);
    assert_eq!(hits[0].end_line, 5);
}

#[tokio::test]
async fn unreadable_embeddings_roll_the_file_back() {
    let mut harness = Harness::new("rollback");
    std::fs::write(
        harness.tree().join("src/auth.py"),
        "def login(u, p):\n    return check(u, p)\n",
    )
    .expect("write");

    let stats = run_catch_up(
        CatchUpTarget {
            project_id: "pid",
            root: &harness.base.join("tree"),
            state: &mut harness.state,
            keyword: &mut harness.keyword,
            vector: Some(&mut harness.vector),
            symbols: &mut harness.symbols,
            embedder: None,
        },
        &harness.cancel,
    )
    .await
    .expect("catch-up");

    assert_eq!(stats.added, 0);
    assert_eq!(stats.errors.len(), 1);
    assert!(stats.errors[0].contains("embedding"));
    assert_eq!(harness.keyword.doc_count(), 0);
    assert!(harness.state.is_empty());
}
