use criterion::{Criterion, black_box, criterion_group, criterion_main};
use search_core::{FusionWeights, dedup_per_file, fuse, keyword::KeywordHit, vector::VectorHit};

fn keyword_hits(n: usize) -> Vec<KeywordHit> {
    (0..n)
        .map(|i| KeywordHit {
            chunk_id: format!("p:src/file_{}.rs:{}", i % 40, i / 40),
            path: format!("src/file_{}.rs", i % 40),
            start_line: 1,
            end_line: 50,
            text: "fn handler() { /* body */ }".to_string(),
            score: (n - i) as f32,
        })
        .collect()
}

fn vector_hits(n: usize) -> Vec<VectorHit> {
    (0..n)
        .map(|i| VectorHit {
            chunk_id: format!("p:src/file_{}.rs:{}", (i + 13) % 40, i / 40),
            path: format!("src/file_{}.rs", (i + 13) % 40),
            start_line: 1,
            end_line: 50,
            text: "fn handler() { /* body */ }".to_string(),
            score: 1.0 - (i as f32 / n as f32),
        })
        .collect()
}

fn bench_fusion(c: &mut Criterion) {
    let keyword = keyword_hits(150);
    let vector = vector_hits(150);
    let weights = FusionWeights::default();

    c.bench_function("fuse_150x150", |b| {
        b.iter(|| {
            fuse(
                black_box(&keyword),
                Some(black_box(&vector)),
                weights.alpha,
                weights.beta,
            )
        });
    });

    c.bench_function("fuse_and_dedup_150x150", |b| {
        b.iter(|| {
            let fused = fuse(
                black_box(&keyword),
                Some(black_box(&vector)),
                weights.alpha,
                weights.beta,
            );
            dedup_per_file(fused, 2)
        });
    });
}

criterion_group!(benches, bench_fusion);
criterion_main!(benches);
