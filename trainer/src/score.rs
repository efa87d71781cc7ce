//! スコアリングモジュール
//!
//! 学習済みモデルを読み込み、候補集合の各候補にスコアを付与します。
//! 出力先を指定するとすべての候補のスコアを書き出し、指定しない場合は
//! 候補集合ごとに最高スコアの候補を標準出力に表示します。

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use reranker::errors::RerankerError;
use reranker::{CandidateSet, CandidateSetReader, Model};

use crate::open_input;

/// スコアリングコマンドの引数
#[derive(Parser, Debug)]
#[clap(name = "score", about = "Score candidate sets with a trained model")]
pub struct Args {
    /// Model file (in zstd).
    #[clap(short = 'i', long)]
    model_in: PathBuf,

    /// Candidate sets to be scored. Files ending with `.zst` are decompressed.
    #[clap(short = 't', long)]
    input: PathBuf,

    /// A file to which every candidate is written as `key<TAB>index<TAB>score<TAB>raw data`.
    ///
    /// If omitted, the best candidate of each set is printed as `key<TAB>index<TAB>raw data`.
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,
}

/// スコアリング中に発生する可能性のあるエラー
#[derive(Debug, Error)]
pub enum ScoreError {
    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// スコアリング処理エラー
    #[error("Scoring failed: {0}")]
    Reranker(#[from] RerankerError),
}

/// スコアリングコマンドを実行する
///
/// # 引数
///
/// * `args` - スコアリングコマンドの引数
///
/// # エラー
///
/// ファイルの読み書きやスコアリングに失敗した場合、`ScoreError`を返します。
pub fn run(args: Args) -> Result<(), ScoreError> {
    log::info!("Loading the model from {}", args.model_in.display());
    let model = Model::read_model(open_input(&args.model_in)?)?;

    log::info!("Reading candidate sets from {}", args.input.display());
    let mut sets = CandidateSetReader::new().read(open_input(&args.input)?)?;
    score_candidate_sets(&model, &mut sets)?;

    match &args.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            for set in &sets {
                for candidate in set.iter() {
                    writeln!(
                        out,
                        "{}\t{}\t{}\t{}",
                        set.training_key(),
                        candidate.index(),
                        candidate.score(),
                        candidate.raw_data()
                    )?;
                }
            }
            out.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for set in &sets {
                if let Some(best) = set.best_scoring_index() {
                    writeln!(
                        out,
                        "{}\t{}\t{}",
                        set.training_key(),
                        best,
                        set[best].raw_data()
                    )?;
                }
            }
            out.flush()?;
        }
    }
    Ok(())
}

/// すべての候補集合をスコアリングします。
///
/// 不正な候補集合はスキップされ、件数がログに出力されます。
///
/// # 戻り値
///
/// スコアリングできた候補集合の数
///
/// # エラー
///
/// 候補集合が別のシンボル表でコンパイルされている場合、`ScoreError`を返します。
pub fn score_candidate_sets(model: &Model, sets: &mut [CandidateSet]) -> Result<usize, ScoreError> {
    let mut num_scored = 0;
    for set in sets.iter_mut() {
        match model.score_candidates(set) {
            Ok(()) => num_scored += 1,
            Err(RerankerError::Instance(e)) => log::warn!("Skipping instance: {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    if num_scored != sets.len() {
        log::warn!("{} of {} candidate sets were skipped", sets.len() - num_scored, sets.len());
    }
    Ok(num_scored)
}
