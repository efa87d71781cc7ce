//! スコアリングと学習のベンチマーク
//!
//! 乱数で生成した候補集合のコーパスに対して、素性ベクトルの内積、
//! 学習済みモデルによるスコアリング、1エポックの学習の速度を計測します。

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use reranker::{Candidate, CandidateSet, FeatureVector, Model, ModelConfig, UpdateRule};

const NUM_SETS: usize = 200;
const CANDIDATES_PER_SET: usize = 50;
const FEATURES_PER_CANDIDATE: usize = 30;
const VOCABULARY: usize = 5000;

fn random_corpus(seed: u64) -> Vec<CandidateSet> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..NUM_SETS)
        .map(|i| {
            let mut set = CandidateSet::new(format!("set-{i}")).with_gold_index(0);
            for j in 0..CANDIDATES_PER_SET {
                let features: FeatureVector<String> = (0..FEATURES_PER_CANDIDATE)
                    .map(|_| {
                        let id = rng.gen_range(0..VOCABULARY);
                        (format!("f{id}"), rng.gen_range(-1.0..1.0))
                    })
                    .collect();
                set.push(
                    Candidate::new(j, format!("hypothesis {j}"))
                        .with_loss(rng.gen_range(0.0..1.0))
                        .with_symbolic_features(features),
                );
            }
            set
        })
        .collect()
}

fn bench_dot(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let weights: FeatureVector = (0..VOCABULARY as u32)
        .map(|i| (i, rng.gen_range(-1.0..1.0)))
        .collect();
    let features: FeatureVector = (0..FEATURES_PER_CANDIDATE)
        .map(|_| (rng.gen_range(0..VOCABULARY as u32), 1.0))
        .collect();

    c.bench_function("feature_vector/dot", |b| {
        b.iter(|| std::hint::black_box(features.dot(&weights)))
    });
}

fn bench_scoring(c: &mut Criterion) {
    let mut corpus = random_corpus(42);
    let mut model = Model::new("bench", UpdateRule::Perceptron);
    model.configure(ModelConfig::new().max_epochs(3)).unwrap();
    model.train(&mut corpus).unwrap();

    let mut group = c.benchmark_group("model");
    group.throughput(Throughput::Elements((NUM_SETS * CANDIDATES_PER_SET) as u64));

    group.bench_function("score_compiled", |b| {
        b.iter(|| {
            for set in corpus.iter_mut() {
                model.score_candidates(set).unwrap();
            }
        })
    });

    let uncompiled = random_corpus(43);
    group.bench_function("score_uncompiled", |b| {
        b.iter_batched(
            || uncompiled.clone(),
            |mut sets| {
                for set in sets.iter_mut() {
                    model.score_candidates(set).unwrap();
                }
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("train_one_epoch", |b| {
        b.iter_batched(
            || {
                let mut model = Model::new("bench", UpdateRule::Mira);
                model.configure(ModelConfig::new().max_epochs(1)).unwrap();
                (model, random_corpus(44))
            },
            |(mut model, mut sets)| model.train(&mut sets).unwrap(),
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_dot, bench_scoring);
criterion_main!(benches);
