//! 重みの更新則。

use rkyv::{Archive, Deserialize, Serialize};

use crate::candidate::Candidate;

/// 違反が起きたときの重みの更新則。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum UpdateRule {
    /// パーセプトロン
    ///
    /// `w += η · (f(gold) − f(competitor))`
    #[default]
    Perceptron,

    /// MIRA
    ///
    /// 正解が競合候補を損失の差のマージン以上で上回るのに必要な最小ノルムの更新を行い、
    /// その大きさを `mira_clip` で制限します。
    Mira,
}

/// パーセプトロンの学習率。
#[derive(Clone, Copy, Debug, PartialEq, Archive, Serialize, Deserialize)]
pub enum StepSize {
    /// 固定の学習率
    Fixed(f64),

    /// エポックごとに減衰する学習率 `initial / (1 + decay · epoch)`
    Annealed {
        /// 初期値
        initial: f64,
        /// 減衰率
        decay: f64,
    },
}

impl Default for StepSize {
    fn default() -> Self {
        Self::Fixed(1.0)
    }
}

impl StepSize {
    /// 指定したエポック（0始まり）の学習率を返します。
    pub fn at(&self, epoch: usize) -> f64 {
        match *self {
            Self::Fixed(eta) => eta,
            Self::Annealed { initial, decay } => initial / (1.0 + decay * epoch as f64),
        }
    }
}

/// 1回の更新に必要なパラメータ
#[derive(Clone, Copy, Debug)]
pub(crate) struct UpdateParams {
    pub(crate) step_size: f64,
    pub(crate) use_weighted_loss: bool,
    pub(crate) mira_clip: f64,
}

/// MIRA のマージンの下限。損失が等しい候補どうしの同点も違反として解消します。
pub(crate) const MIN_MIRA_MARGIN: f64 = 1e-3;

impl UpdateRule {
    /// 差分ベクトル `f(gold) − f(competitor)` に掛ける係数を計算します。
    ///
    /// 損失の差 `loss(competitor) − loss(gold)` は0を下限とします。
    /// パーセプトロンは重み付き損失が有効な場合に `1 + 損失の差` を学習率に掛けます。
    /// MIRA は常に損失の差（下限 [`MIN_MIRA_MARGIN`]）をマージンとして使用します。
    /// いずれも違反があれば0でない更新になります。
    ///
    /// # 引数
    ///
    /// * `gold` - 正解の候補
    /// * `competitor` - 競合候補
    /// * `delta_norm_squared` - 差分ベクトルのノルムの2乗
    /// * `params` - 学習率などのパラメータ
    pub(crate) fn scale(
        &self,
        gold: &Candidate,
        competitor: &Candidate,
        delta_norm_squared: f64,
        params: &UpdateParams,
    ) -> f64 {
        let loss_diff = (competitor.loss() - gold.loss()).max(0.0);
        match self {
            Self::Perceptron => {
                if params.use_weighted_loss {
                    params.step_size * (1.0 + loss_diff)
                } else {
                    params.step_size
                }
            }
            Self::Mira => {
                if delta_norm_squared == 0.0 {
                    return 0.0;
                }
                let margin = loss_diff.max(MIN_MIRA_MARGIN);
                let tau =
                    ((margin - (gold.score() - competitor.score())) / delta_norm_squared).max(0.0);
                let norm = delta_norm_squared.sqrt();
                if tau * norm > params.mira_clip {
                    params.mira_clip / norm
                } else {
                    tau
                }
            }
        }
    }
}
