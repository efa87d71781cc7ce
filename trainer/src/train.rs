//! モデル学習モジュール
//!
//! 候補集合のコーパスを読み込み、パーセプトロンまたはMIRAでリランキングモデルを学習します。
//! 開発データを与えると、打ち切り判定に開発データ上の損失を使用します。

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use thiserror::Error;

use reranker::candidate_set::CandidateSet;
use reranker::errors::RerankerError;
use reranker::model::{EndOfEpochModelWriter, StepSize, TrainingReport};
use reranker::symbols::write_symbols;
use reranker::{
    CandidateSetReader, CandidateSetScorer, LossFunction, Model, ModelConfig, RandomPairScorer,
    UpdateRule,
};

use crate::open_input;

/// 更新則の指定
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum UpdateRuleArg {
    /// パーセプトロン
    Perceptron,
    /// MIRA
    Mira,
}

impl From<UpdateRuleArg> for UpdateRule {
    fn from(arg: UpdateRuleArg) -> Self {
        match arg {
            UpdateRuleArg::Perceptron => Self::Perceptron,
            UpdateRuleArg::Mira => Self::Mira,
        }
    }
}

/// 損失の計算方法の指定
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LossArg {
    /// 候補集合のファイルに書かれた損失をそのまま使用する
    Given,
    /// 単語誤り率
    Wer,
    /// 参照と完全に一致すれば0、そうでなければ1
    ZeroOne,
}

impl LossArg {
    /// 対応する損失関数。`Given` の場合は `None` です。
    pub fn loss_function(self) -> Option<LossFunction> {
        match self {
            Self::Given => None,
            Self::Wer => Some(LossFunction::WordErrorRate),
            Self::ZeroOne => Some(LossFunction::ZeroOne),
        }
    }
}

/// 学習コマンドの引数
#[derive(Parser, Debug)]
#[clap(name = "train", about = "Reranking model trainer")]
pub struct Args {
    /// Candidate sets to be trained on. Files ending with `.zst` are decompressed.
    #[clap(short = 't', long)]
    corpus: PathBuf,

    /// Development candidate sets used to decide when training declines.
    #[clap(short = 'd', long)]
    dev: Option<PathBuf>,

    /// A file to which the model is output. The file is compressed by zstd.
    #[clap(short = 'o', long)]
    model_out: PathBuf,

    /// A file to which the symbol table is output as `name<TAB>index` lines.
    #[clap(long)]
    symbols_out: Option<PathBuf>,

    /// A file to which the weights are output as `index<TAB>weight` lines.
    #[clap(long)]
    weights_out: Option<PathBuf>,

    /// A file to which the uncompressed model is written whenever the best epoch changes.
    #[clap(long)]
    checkpoint: Option<PathBuf>,

    /// Name stored in the model.
    #[clap(long, default_value = "reranker")]
    name: String,

    /// Weight update rule.
    #[clap(long, value_enum, default_value_t = UpdateRuleArg::Perceptron)]
    update_rule: UpdateRuleArg,

    /// How candidate losses are obtained.
    #[clap(long, value_enum, default_value_t = LossArg::Given)]
    loss: LossArg,

    /// Maximum number of epochs.
    #[clap(long, default_value = "20")]
    max_epochs: usize,

    /// Minimum number of epochs before training may stop.
    #[clap(long, default_value = "0")]
    min_epochs: usize,

    /// Number of epochs without improvement after which training stops. 0 disables the check.
    #[clap(long, default_value = "5")]
    max_epochs_in_decline: usize,

    /// Perceptron step size.
    #[clap(long, default_value = "1.0")]
    step_size: f64,

    /// Decay of the step size per epoch: `step_size / (1 + decay * epoch)`.
    #[clap(long)]
    step_decay: Option<f64>,

    /// Upper bound of the norm of a single MIRA update.
    #[clap(long)]
    mira_clip: Option<f64>,

    /// Scale perceptron updates by one plus the loss difference between the competitor and the gold candidate.
    #[clap(long)]
    weighted_loss: bool,

    /// Score and export the averaged weights.
    #[clap(long)]
    average: bool,

    /// Restore the weights of the best epoch after training.
    #[clap(long)]
    use_best: bool,

    /// Score only this many random pairs per candidate set during training.
    #[clap(long)]
    random_pairs: Option<usize>,

    /// Seed of the random pair sampler.
    #[clap(long, default_value = "0")]
    seed: u64,

    /// Maximum number of candidate sets to read.
    #[clap(long)]
    max_sets: Option<usize>,

    /// Maximum number of candidates to read per set.
    #[clap(long)]
    max_candidates: Option<usize>,
}

/// 学習処理中に発生する可能性のあるエラー
#[derive(Debug, Error)]
pub enum TrainError {
    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 学習処理エラー
    #[error("Training process failed: {0}")]
    Reranker(#[from] RerankerError),

    /// 引数エラー
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// モデル学習のパラメータ
///
/// CLIの引数から入出力のパスを除いた学習設定です。
#[derive(Debug, Clone)]
pub struct TrainingParams {
    /// モデルの名前
    pub name: String,
    /// 更新則
    pub update_rule: UpdateRule,
    /// 損失の計算方法
    pub loss: LossArg,
    /// 最大エポック数
    pub max_epochs: usize,
    /// 最小エポック数
    pub min_epochs: usize,
    /// 改善しないエポックの許容数
    pub max_epochs_in_decline: usize,
    /// 学習率
    pub step_size: StepSize,
    /// MIRAの更新量の上限
    pub mira_clip: Option<f64>,
    /// 損失の差で更新を重み付けするか
    pub weighted_loss: bool,
    /// 平均化された重みを使用するか
    pub average: bool,
    /// 最良のエポックの重みに戻すか
    pub use_best: bool,
    /// ランダムペアスコアラーのペア数とシード
    pub random_pairs: Option<(usize, u64)>,
    /// 最良のエポックのモデルを書き出すパス
    pub checkpoint: Option<PathBuf>,
}

impl TrainingParams {
    fn validate(&self) -> Result<(), TrainError> {
        let (initial, decay) = match self.step_size {
            StepSize::Fixed(eta) => (eta, 0.0),
            StepSize::Annealed { initial, decay } => (initial, decay),
        };
        if !(initial > 0.0) || !(decay >= 0.0) {
            return Err(TrainError::InvalidArgument(format!(
                "step size must be positive and decay non-negative: {:?}",
                self.step_size
            )));
        }
        if self.mira_clip.is_some_and(|clip| !(clip > 0.0)) {
            return Err(TrainError::InvalidArgument(
                "mira clip must be positive".to_string(),
            ));
        }
        if self.random_pairs.is_some_and(|(n, _)| n == 0) {
            return Err(TrainError::InvalidArgument(
                "the number of random pairs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 学習設定を作成します。
    fn model_config(&self) -> ModelConfig {
        let mut config = ModelConfig::new()
            .max_epochs(self.max_epochs)
            .min_epochs(self.min_epochs)
            .max_epochs_in_decline(self.max_epochs_in_decline)
            .step_size(self.step_size)
            .use_weighted_loss(self.weighted_loss)
            .average_weights(self.average);
        if let Some(clip) = self.mira_clip {
            config = config.mira_clip(clip);
        }
        if let Some(loss_function) = self.loss.loss_function() {
            config = config.loss_function(loss_function);
        }
        if let Some((num_pairs, seed)) = self.random_pairs {
            config = config.scorer(CandidateSetScorer::RandomPair(RandomPairScorer::new(
                num_pairs, seed,
            )));
        }
        config
    }
}

/// 学習コマンドを実行する
///
/// 候補集合からモデルを学習し、zstd圧縮して保存します。
///
/// # 引数
///
/// * `args` - 学習コマンドの引数
///
/// # エラー
///
/// ファイルの読み書きや学習処理に失敗した場合、`TrainError`を返します。
pub fn run(args: Args) -> Result<(), TrainError> {
    let step_size = match args.step_decay {
        Some(decay) => StepSize::Annealed {
            initial: args.step_size,
            decay,
        },
        None => StepSize::Fixed(args.step_size),
    };
    let params = TrainingParams {
        name: args.name,
        update_rule: args.update_rule.into(),
        loss: args.loss,
        max_epochs: args.max_epochs,
        min_epochs: args.min_epochs,
        max_epochs_in_decline: args.max_epochs_in_decline,
        step_size,
        mira_clip: args.mira_clip,
        weighted_loss: args.weighted_loss,
        average: args.average,
        use_best: args.use_best,
        random_pairs: args.random_pairs.map(|n| (n, args.seed)),
        checkpoint: args.checkpoint,
    };

    let mut reader = CandidateSetReader::new();
    if let Some(n) = args.max_sets {
        reader = reader.max_num_to_read(n.max(1));
    }
    if let Some(n) = args.max_candidates {
        reader = reader.max_candidates_per_set(n.max(1));
    }

    log::info!("Reading candidate sets from {}", args.corpus.display());
    let mut corpus = read_candidate_sets(&reader, &args.corpus)?;
    let mut dev = match &args.dev {
        Some(path) => {
            log::info!("Reading development candidate sets from {}", path.display());
            Some(read_candidate_sets(&reader, path)?)
        }
        None => None,
    };

    let (model, report) = train_model(&params, &mut corpus, dev.as_deref_mut())?;
    log::info!(
        "Finished after {} epochs: {:?}, {} violations in the last epoch, {} instances skipped",
        report.epochs_run,
        report.stop_reason,
        report.final_violations,
        report.skipped_instances
    );

    log::info!("Writing model to {}", args.model_out.display());
    let file = File::create(&args.model_out)?;
    let mut encoder = zstd::stream::Encoder::new(file, 19)?;
    model.write_model(&mut encoder)?;
    encoder.finish()?;

    if let Some(path) = &args.symbols_out {
        log::info!("Writing symbols to {}", path.display());
        write_symbols(model.symbols(), File::create(path)?)?;
    }
    if let Some(path) = &args.weights_out {
        log::info!("Writing weights to {}", path.display());
        model.write_weights(File::create(path)?)?;
    }

    Ok(())
}

/// 候補集合のファイルを読み込みます。
pub(crate) fn read_candidate_sets(
    reader: &CandidateSetReader,
    path: &Path,
) -> Result<Vec<CandidateSet>, TrainError> {
    Ok(reader.read(open_input(path)?)?)
}

/// 指定されたパラメータでモデルを学習する
///
/// CLIに依存しないコアの学習ロジックです。
///
/// # 引数
///
/// * `params` - 学習パラメータ
/// * `corpus` - 訓練データ
/// * `dev` - 開発データ
///
/// # 戻り値
///
/// 推論可能な状態の学習済みモデルと学習の結果
///
/// # エラー
///
/// パラメータや学習設定が不正な場合、`TrainError`を返します。
pub fn train_model(
    params: &TrainingParams,
    corpus: &mut [CandidateSet],
    dev: Option<&mut [CandidateSet]>,
) -> Result<(Model, TrainingReport), TrainError> {
    params.validate()?;

    let mut model = Model::new(params.name.clone(), params.update_rule);
    model.configure(params.model_config())?;
    if let Some(path) = &params.checkpoint {
        model.set_end_of_epoch_hook(EndOfEpochModelWriter::new(path))?;
    }

    let report = match dev {
        Some(dev) => model.train_with_dev(corpus, dev)?,
        None => model.train(corpus)?,
    };
    model.prepare_for_inference(params.use_best)?;
    Ok((model, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    use reranker::StopReason;

    const CORPUS: &str = "\
@key\tutt-1
@reference\tthe cat sat
0\t-1.0\ta cat sat\tlm=-1.0 sub
0\t-1.2\tthe cat sat\tlm=-1.2
EOS
@key\tutt-2
@reference\ta dog ran
0\t-2.0\tthe dog ran\tlm=-0.8 sub
0\t-2.1\ta dog ran\tlm=-0.9
EOS
";

    fn params() -> TrainingParams {
        TrainingParams {
            name: "test".to_string(),
            update_rule: UpdateRule::Perceptron,
            loss: LossArg::Wer,
            max_epochs: 10,
            min_epochs: 0,
            max_epochs_in_decline: 5,
            step_size: StepSize::Fixed(1.0),
            mira_clip: None,
            weighted_loss: false,
            average: false,
            use_best: true,
            random_pairs: None,
            checkpoint: None,
        }
    }

    #[test]
    fn test_train_model() {
        let mut corpus = CandidateSetReader::new().read(CORPUS.as_bytes()).unwrap();
        let (model, report) = train_model(&params(), &mut corpus, None).unwrap();
        assert_eq!(StopReason::Converged, report.stop_reason);
        assert_eq!("test", model.name());

        for set in &mut corpus {
            model.score_candidates(set).unwrap();
            assert_eq!(Some(1), set.best_scoring_index());
        }
    }

    #[test]
    fn test_compressed_model_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let corpus_path = dir.path().join("corpus.txt");
        std::fs::write(&corpus_path, CORPUS).unwrap();

        let model_path = dir.path().join("model.zst");
        let weights_path = dir.path().join("weights.txt");
        let args = Args::parse_from([
            "train",
            "-t",
            corpus_path.to_str().unwrap(),
            "-o",
            model_path.to_str().unwrap(),
            "--weights-out",
            weights_path.to_str().unwrap(),
            "--update-rule",
            "mira",
            "--loss",
            "wer",
        ]);
        run(args).unwrap();

        let model = Model::read_model(open_input(&model_path).unwrap()).unwrap();
        assert_eq!(UpdateRule::Mira, model.update_rule());
        assert!(!std::fs::read_to_string(&weights_path).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_params() {
        let mut corpus = CandidateSetReader::new().read(CORPUS.as_bytes()).unwrap();
        let mut params = params();
        params.mira_clip = Some(-1.0);
        assert!(matches!(
            train_model(&params, &mut corpus, None),
            Err(TrainError::InvalidArgument(_))
        ));
    }
}
