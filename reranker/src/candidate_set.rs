//! 候補集合のモジュール。
//!
//! 候補集合は1つの訓練インスタンス（または推論対象）に対応し、
//! 順序付きの候補と、任意の正解インデックス、参照文字列を保持します。

pub mod reader;

use std::ops::Deref;

use crate::candidate::Candidate;
use crate::errors::{InstanceError, RerankerError, Result};
use crate::feature_vector::FeatureVector;
use crate::kernel::KernelFunction;
use crate::loss::LossFunction;
use crate::symbols::{Symbols, TableId};

/// 候補集合。
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    gold_index: Option<usize>,
    best_scoring_index: Option<usize>,
    reference: String,
    reference_token_count: usize,
    training_key: String,
    table_id: Option<TableId>,
    losses_computed: bool,
}

impl Deref for CandidateSet {
    type Target = [Candidate];

    fn deref(&self) -> &Self::Target {
        &self.candidates
    }
}

impl CandidateSet {
    /// 空の候補集合を作成します。
    ///
    /// # 引数
    ///
    /// * `training_key` - インスタンスを識別するキー
    pub fn new<S>(training_key: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            training_key: training_key.into(),
            ..Default::default()
        }
    }

    /// 参照文字列を設定します。トークン数も更新されます。
    pub fn with_reference<S>(mut self, reference: S) -> Self
    where
        S: Into<String>,
    {
        self.set_reference(reference);
        self
    }

    /// 正解インデックスを設定します。
    pub fn with_gold_index(mut self, gold_index: usize) -> Self {
        self.gold_index = Some(gold_index);
        self
    }

    /// 参照文字列を設定します。トークン数も更新されます。
    pub fn set_reference<S>(&mut self, reference: S)
    where
        S: Into<String>,
    {
        self.reference = reference.into();
        self.reference_token_count = self.reference.split_whitespace().count();
    }

    /// 訓練キーを設定します。
    pub fn set_training_key<S>(&mut self, training_key: S)
    where
        S: Into<String>,
    {
        self.training_key = training_key.into();
    }

    /// 正解インデックスを設定します。範囲の検査は [`CandidateSet::validate`] で行います。
    pub fn set_gold_index(&mut self, gold_index: Option<usize>) {
        self.gold_index = gold_index;
    }

    /// 候補を末尾に追加します。候補のインデックスは追加位置に付け替えられます。
    pub fn push(&mut self, mut candidate: Candidate) {
        candidate.set_index(self.candidates.len());
        self.candidates.push(candidate);
        self.best_scoring_index = None;
    }

    /// 指定位置の候補への可変参照を返します。
    pub fn get_candidate_mut(&mut self, index: usize) -> Option<&mut Candidate> {
        self.candidates.get_mut(index)
    }

    /// 候補数が `max` を超える分を削除します。
    pub(crate) fn truncate(&mut self, max: usize) {
        self.candidates.truncate(max);
        if self.best_scoring_index.is_some_and(|i| i >= max) {
            self.best_scoring_index = None;
        }
    }

    /// 正解インデックス
    #[inline(always)]
    pub fn gold_index(&self) -> Option<usize> {
        self.gold_index
    }

    /// 直近のスコアリングで最もスコアの高い候補の位置
    #[inline(always)]
    pub fn best_scoring_index(&self) -> Option<usize> {
        self.best_scoring_index
    }

    /// 参照文字列
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// 参照文字列のトークン数
    pub fn reference_token_count(&self) -> usize {
        self.reference_token_count
    }

    /// 訓練キー
    pub fn training_key(&self) -> &str {
        &self.training_key
    }

    /// 素性をコンパイルしたシンボル表の識別子
    pub fn table_id(&self) -> Option<TableId> {
        self.table_id
    }

    /// 損失が計算済みであれば `true` を返します。
    pub fn losses_computed(&self) -> bool {
        self.losses_computed
    }

    pub(crate) fn set_losses_computed(&mut self, computed: bool) {
        self.losses_computed = computed;
    }

    /// すべての候補の記号素性をコンパイルします。
    ///
    /// # 引数
    ///
    /// * `symbols` - 素性名を登録するシンボル表
    /// * `clear_symbolic` - `true` の場合、変換後に記号素性を削除します。
    ///
    /// # エラー
    ///
    /// 別のシンボル表に対してコンパイル済みの場合、[`RerankerError`] が返されます。
    pub fn compile_features<S>(&mut self, symbols: &mut S, clear_symbolic: bool) -> Result<()>
    where
        S: Symbols + ?Sized,
    {
        let id = symbols.table_id();
        if let Some(compiled_with) = self.table_id {
            if compiled_with != id {
                return Err(RerankerError::invalid_state(
                    format!("compiling candidate set '{}'", self.training_key),
                    "features were compiled against another symbol table; decompile them first",
                ));
            }
        }
        for candidate in &mut self.candidates {
            candidate.compile(symbols, clear_symbolic);
        }
        self.table_id = Some(id);
        Ok(())
    }

    /// すべての候補のコンパイル済み素性を記号素性へ戻します。
    ///
    /// # エラー
    ///
    /// 別のシンボル表が渡された場合や、未登録のインデックスがある場合、
    /// [`RerankerError`] が返されます。
    pub fn decompile_features<S>(&mut self, symbols: &S) -> Result<()>
    where
        S: Symbols + ?Sized,
    {
        if let Some(compiled_with) = self.table_id {
            if compiled_with != symbols.table_id() {
                return Err(RerankerError::invalid_state(
                    format!("decompiling candidate set '{}'", self.training_key),
                    "features were compiled against another symbol table",
                ));
            }
        }
        for candidate in &mut self.candidates {
            candidate.decompile(symbols)?;
        }
        self.table_id = None;
        Ok(())
    }

    /// 損失関数で各候補の損失を計算します。
    ///
    /// 計算済みの場合は `force` が `true` のときだけ再計算します。
    pub fn compute_losses(&mut self, loss_function: &LossFunction, force: bool) {
        if self.losses_computed && !force {
            return;
        }
        for candidate in &mut self.candidates {
            let loss = loss_function.loss(candidate, &self.reference, self.reference_token_count);
            candidate.set_loss(loss);
        }
        self.losses_computed = true;
    }

    /// 学習や推論に使えるかを検査します。
    ///
    /// # 引数
    ///
    /// * `symbols` - 素性をコンパイルしたシンボル表
    ///
    /// # エラー
    ///
    /// 候補が空、正解インデックスが範囲外、未登録のインデックスや有限でない値を持つ
    /// 素性がある場合、[`InstanceError`] が返されます。
    pub fn validate<S>(&self, symbols: &S) -> Result<(), InstanceError>
    where
        S: Symbols + ?Sized,
    {
        if self.candidates.is_empty() {
            return Err(InstanceError::EmptySet {
                key: self.training_key.clone(),
            });
        }
        if let Some(gold) = self.gold_index {
            if gold >= self.candidates.len() {
                return Err(InstanceError::GoldOutOfRange {
                    key: self.training_key.clone(),
                    gold,
                    len: self.candidates.len(),
                });
            }
        }
        for candidate in &self.candidates {
            candidate
                .features()
                .validate(symbols, &self.training_key, candidate.index())?;
        }
        Ok(())
    }

    /// すべての候補にスコアを付与し、最高スコアの位置を更新します。
    pub fn score_all(&mut self, weights: &FeatureVector, kernel: &KernelFunction) {
        for candidate in &mut self.candidates {
            candidate.set_score(kernel.score(candidate.features(), weights));
        }
        self.update_best_scoring_index();
    }

    /// 指定した候補だけにスコアを付与し、他の候補のスコアは負の無限大にします。
    pub(crate) fn score_subset(
        &mut self,
        selected: &[bool],
        weights: &FeatureVector,
        kernel: &KernelFunction,
    ) {
        for (candidate, &scored) in self.candidates.iter_mut().zip(selected) {
            let score = if scored {
                kernel.score(candidate.features(), weights)
            } else {
                f64::NEG_INFINITY
            };
            candidate.set_score(score);
        }
        self.update_best_scoring_index();
    }

    /// 現在のスコアから最高スコアの位置を再計算します。同点なら前の候補が優先されます。
    pub fn update_best_scoring_index(&mut self) {
        let mut best: Option<usize> = None;
        for (i, candidate) in self.candidates.iter().enumerate() {
            match best {
                Some(b) if candidate.score() <= self.candidates[b].score() => {}
                _ => best = Some(i),
            }
        }
        self.best_scoring_index = best;
    }
}
