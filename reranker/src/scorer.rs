//! 候補集合のスコアリング戦略。
//!
//! スコアラーは候補集合内の候補に現在の重みでスコアを付与し、
//! 最高スコアの位置を更新します。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::candidate_set::CandidateSet;
use crate::feature_vector::FeatureVector;
use crate::kernel::KernelFunction;

/// 学習時に使用するスコアラー。
#[derive(Clone, Debug, Default)]
pub enum CandidateSetScorer {
    /// すべての候補をスコアリングします。
    #[default]
    Default,

    /// ランダムに選んだ候補の組だけをスコアリングします。
    RandomPair(RandomPairScorer),
}

impl CandidateSetScorer {
    /// 候補集合をスコアリングします。
    ///
    /// # 引数
    ///
    /// * `set` - 対象の候補集合
    /// * `weights` - 現在の重み
    /// * `kernel` - 内積に適用するカーネル関数
    pub fn score(&mut self, set: &mut CandidateSet, weights: &FeatureVector, kernel: &KernelFunction) {
        match self {
            Self::Default => set.score_all(weights, kernel),
            Self::RandomPair(scorer) => scorer.score(set, weights, kernel),
        }
    }
}

/// 候補の組を無作為に抽出してスコアリングするスコアラー。
///
/// 抽出されなかった候補のスコアは負の無限大になるため、
/// 真に最高スコアの候補が選ばれる保証はありません。
/// 正解インデックスが既知の場合、正解の候補は常にスコアリングされます。
#[derive(Clone, Debug)]
pub struct RandomPairScorer {
    num_pairs: usize,
    rng: StdRng,
}

impl RandomPairScorer {
    /// 新しいスコアラーを作成します。
    ///
    /// # 引数
    ///
    /// * `num_pairs` - 1つの候補集合から抽出する組の数
    /// * `seed` - 乱数の種
    ///
    /// # パニック
    ///
    /// `num_pairs` は1以上である必要があります。
    pub fn new(num_pairs: usize, seed: u64) -> Self {
        assert!(num_pairs >= 1, "num_pairs must be >= 1");
        Self {
            num_pairs,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 抽出する組の数
    pub fn num_pairs(&self) -> usize {
        self.num_pairs
    }

    fn score(&mut self, set: &mut CandidateSet, weights: &FeatureVector, kernel: &KernelFunction) {
        let len = set.len();
        if len == 0 || 2 * self.num_pairs >= len {
            set.score_all(weights, kernel);
            return;
        }
        let mut selected = vec![false; len];
        for _ in 0..self.num_pairs {
            selected[self.rng.gen_range(0..len)] = true;
            selected[self.rng.gen_range(0..len)] = true;
        }
        if let Some(gold) = set.gold_index().filter(|&gold| gold < len) {
            selected[gold] = true;
        }
        set.score_subset(&selected, weights, kernel);
    }
}
