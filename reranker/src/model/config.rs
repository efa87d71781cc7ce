//! モデルの学習設定。

use crate::candidate::Comparator;
use crate::kernel::KernelFunction;
use crate::loss::LossFunction;
use crate::model::update::StepSize;
use crate::scorer::CandidateSetScorer;

/// モデルの学習設定。
///
/// 設定は学習開始前に [`Model::configure`](crate::model::Model::configure) で適用します。
///
/// # 例
///
/// ```
/// use reranker::model::{ModelConfig, StepSize};
///
/// let config = ModelConfig::new()
///     .max_epochs(10)
///     .min_epochs(2)
///     .max_epochs_in_decline(3)
///     .step_size(StepSize::Fixed(0.5))
///     .use_weighted_loss(true);
/// assert_eq!(10, config.get_max_epochs());
/// ```
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub(crate) gold_comparator: Option<Comparator>,
    pub(crate) score_comparator: Option<Comparator>,
    pub(crate) kernel: KernelFunction,
    pub(crate) use_weighted_loss: bool,
    pub(crate) min_epochs: usize,
    pub(crate) max_epochs: usize,
    pub(crate) max_epochs_in_decline: usize,
    pub(crate) scorer: CandidateSetScorer,
    pub(crate) step_size: StepSize,
    pub(crate) mira_clip: f64,
    pub(crate) loss_function: Option<LossFunction>,
    pub(crate) average_weights: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            gold_comparator: Some(Comparator::Gold),
            score_comparator: Some(Comparator::Score),
            kernel: KernelFunction::DotProduct,
            use_weighted_loss: false,
            min_epochs: 0,
            max_epochs: 20,
            max_epochs_in_decline: 5,
            scorer: CandidateSetScorer::Default,
            step_size: StepSize::Fixed(1.0),
            mira_clip: f64::INFINITY,
            loss_function: None,
            average_weights: false,
        }
    }
}

impl ModelConfig {
    /// デフォルトの設定を作成します。
    pub fn new() -> Self {
        Self::default()
    }

    /// 正解を選ぶ比較関数を設定します。
    ///
    /// `None` の場合、すべての候補集合に正解インデックスが必要です。
    pub fn gold_comparator(mut self, comparator: Option<Comparator>) -> Self {
        self.gold_comparator = comparator;
        self
    }

    /// 最高スコアの候補を選ぶ比較関数を設定します。
    pub fn score_comparator(mut self, comparator: Option<Comparator>) -> Self {
        self.score_comparator = comparator;
        self
    }

    /// カーネル関数を設定します。
    pub fn kernel(mut self, kernel: KernelFunction) -> Self {
        self.kernel = kernel;
        self
    }

    /// パーセプトロンの更新量を損失の差で重み付けするかを設定します。
    ///
    /// 有効な場合、学習率に `1 + 損失の差` を掛けます。MIRA には影響しません。
    pub fn use_weighted_loss(mut self, use_weighted_loss: bool) -> Self {
        self.use_weighted_loss = use_weighted_loss;
        self
    }

    /// 収束と判定する前に最低限実行するエポック数を設定します。
    pub fn min_epochs(mut self, min_epochs: usize) -> Self {
        self.min_epochs = min_epochs;
        self
    }

    /// 最大エポック数を設定します。0の場合、学習は1エポックも実行されません。
    pub fn max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    /// 目的関数が改善しないエポックがこの数だけ続くと学習を打ち切ります。0で無効です。
    pub fn max_epochs_in_decline(mut self, max_epochs_in_decline: usize) -> Self {
        self.max_epochs_in_decline = max_epochs_in_decline;
        self
    }

    /// 学習時のスコアラーを設定します。
    pub fn scorer(mut self, scorer: CandidateSetScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// パーセプトロンの学習率を設定します。
    ///
    /// # パニック
    ///
    /// 学習率は正、減衰率は0以上である必要があります。
    pub fn step_size(mut self, step_size: StepSize) -> Self {
        match step_size {
            StepSize::Fixed(eta) => assert!(eta > 0.0, "step size must be positive"),
            StepSize::Annealed { initial, decay } => {
                assert!(initial > 0.0, "initial step size must be positive");
                assert!(decay >= 0.0, "decay must be >= 0");
            }
        }
        self.step_size = step_size;
        self
    }

    /// MIRAの1回あたりの更新量の上限を設定します。
    ///
    /// # パニック
    ///
    /// 値は正である必要があります。
    pub fn mira_clip(mut self, mira_clip: f64) -> Self {
        assert!(mira_clip > 0.0, "mira_clip must be positive");
        self.mira_clip = mira_clip;
        self
    }

    /// 学習前に候補の損失を計算する関数を設定します。
    ///
    /// 設定しない場合、候補集合に与えられた損失をそのまま使用します。
    pub fn loss_function(mut self, loss_function: LossFunction) -> Self {
        self.loss_function = Some(loss_function);
        self
    }

    /// 推論と出力に平均化された重みを使用するかを設定します。
    pub fn average_weights(mut self, average_weights: bool) -> Self {
        self.average_weights = average_weights;
        self
    }

    /// 最大エポック数
    pub fn get_max_epochs(&self) -> usize {
        self.max_epochs
    }

    /// 最小エポック数
    pub fn get_min_epochs(&self) -> usize {
        self.min_epochs
    }

    /// カーネル関数
    pub fn get_kernel(&self) -> &KernelFunction {
        &self.kernel
    }

    /// 平均化された重みを使用するか
    pub fn get_average_weights(&self) -> bool {
        self.average_weights
    }
}
