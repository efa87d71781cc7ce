//! リランキングの精度を評価するユーティリティ
//!
//! このバイナリは、学習済みモデルで並べ替えた1-best候補の平均損失を、
//! ベースラインスコアによる1-best候補と損失が最小の候補（オラクル）の平均損失と比較します。

use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use reranker::{CandidateSet, CandidateSetReader, Comparator, LossFunction, Model};

/// 損失の計算方法の指定
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LossArg {
    /// 候補集合のファイルに書かれた損失をそのまま使用する
    Given,
    /// 単語誤り率
    Wer,
    /// 参照と完全に一致すれば0、そうでなければ1
    ZeroOne,
}

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "evaluate", about = "Evaluate the reranking accuracy")]
struct Args {
    /// Test candidate sets. Files ending with `.zst` are decompressed.
    #[clap(short = 't', long)]
    test_in: PathBuf,

    /// Model file (in zstd).
    #[clap(short = 'i', long)]
    model_in: PathBuf,

    /// How candidate losses are obtained.
    #[clap(long, value_enum, default_value_t = LossArg::Given)]
    loss: LossArg,
}

/// 1つの選択方法による損失の集計
#[derive(Debug, Default)]
struct LossSummary {
    sum: f64,
    num_sets: usize,
}

impl LossSummary {
    fn add(&mut self, loss: f64) {
        self.sum += loss;
        self.num_sets += 1;
    }

    fn average(&self) -> f64 {
        if self.num_sets == 0 {
            0.0
        } else {
            self.sum / self.num_sets as f64
        }
    }
}

fn open_input(path: &Path) -> std::io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "zst") {
        Ok(Box::new(zstd::Decoder::new(file)?))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// ベースラインスコアが最も高い候補の位置。同点なら前の候補が優先されます。
fn baseline_best(set: &CandidateSet) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in set.iter().enumerate() {
        match best {
            Some(b) if candidate.baseline_score() <= set[b].baseline_score() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// メイン関数
///
/// テスト用の候補集合を学習済みモデルでスコアリングし、
/// リランキング、ベースライン、オラクルのそれぞれの平均損失を表示します。
///
/// # 戻り値
///
/// 実行が成功した場合は `Ok(())`、エラーが発生した場合はエラー情報
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    log::info!("Loading the model...");
    let model = Model::read_model(open_input(&args.model_in)?)?;

    log::info!("Reading candidate sets...");
    let mut sets = CandidateSetReader::new().read(open_input(&args.test_in)?)?;

    let loss_function = match args.loss {
        LossArg::Given => None,
        LossArg::Wer => Some(LossFunction::WordErrorRate),
        LossArg::ZeroOne => Some(LossFunction::ZeroOne),
    };

    let mut reranked = LossSummary::default();
    let mut baseline = LossSummary::default();
    let mut oracle = LossSummary::default();
    let mut num_skipped = 0;
    for set in &mut sets {
        if let Some(loss_function) = &loss_function {
            set.compute_losses(loss_function, true);
        }
        if let Err(e) = model.score_candidates(set) {
            log::warn!("Skipping instance: {e}");
            num_skipped += 1;
            continue;
        }
        let (Some(best), Some(base), Some(gold)) = (
            set.best_scoring_index(),
            baseline_best(set),
            Comparator::Gold.best_index(set),
        ) else {
            num_skipped += 1;
            continue;
        };
        reranked.add(set[best].loss());
        baseline.add(set[base].loss());
        oracle.add(set[gold].loss());
    }

    println!("Sets = {}", reranked.num_sets);
    println!("Skipped = {num_skipped}");
    println!("Baseline loss = {}", baseline.average());
    println!("Reranked loss = {}", reranked.average());
    println!("Oracle loss = {}", oracle.average());

    Ok(())
}
