//! 候補のモジュール。
//!
//! 候補は外部の生成器が出力した仮説1つに対応し、生データ、素性、損失、
//! ベースラインスコア、現在のモデルによるスコアを保持します。

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::errors::{RerankerError, Result};
use crate::feature_vector::FeatureVector;
use crate::symbols::Symbols;

/// 候補集合内の1つの候補。
#[derive(Clone, Debug)]
pub struct Candidate {
    index: usize,
    loss: f64,
    score: f64,
    baseline_score: f64,
    num_words: usize,
    features: FeatureVector,
    symbolic_features: FeatureVector<String>,
    raw_data: String,
    compiled: bool,
}

impl Candidate {
    /// 新しい候補を作成します。
    ///
    /// 単語数は生データの空白区切りのトークン数で初期化されます。
    ///
    /// # 引数
    ///
    /// * `index` - 候補集合内での位置
    /// * `raw_data` - 候補の生データ
    pub fn new<S>(index: usize, raw_data: S) -> Self
    where
        S: Into<String>,
    {
        let raw_data = raw_data.into();
        Self {
            index,
            loss: 0.0,
            score: 0.0,
            baseline_score: 0.0,
            num_words: raw_data.split_whitespace().count(),
            features: FeatureVector::new(),
            symbolic_features: FeatureVector::new(),
            raw_data,
            compiled: false,
        }
    }

    /// 損失を設定します。
    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    /// ベースラインスコアを設定します。
    pub fn with_baseline_score(mut self, baseline_score: f64) -> Self {
        self.baseline_score = baseline_score;
        self
    }

    /// コンパイル済みの素性を設定します。
    pub fn with_features(mut self, features: FeatureVector) -> Self {
        self.features = features;
        self
    }

    /// 記号素性を設定します。
    pub fn with_symbolic_features(mut self, symbolic_features: FeatureVector<String>) -> Self {
        self.symbolic_features = symbolic_features;
        self
    }

    /// 候補集合内での位置
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// 損失
    #[inline(always)]
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// 損失を上書きします。
    pub fn set_loss(&mut self, loss: f64) {
        self.loss = loss;
    }

    /// 直近のスコアリングで付与されたスコア
    #[inline(always)]
    pub fn score(&self) -> f64 {
        self.score
    }

    pub(crate) fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    /// 生成器が付与したベースラインスコア
    #[inline(always)]
    pub fn baseline_score(&self) -> f64 {
        self.baseline_score
    }

    /// 単語数
    #[inline(always)]
    pub fn num_words(&self) -> usize {
        self.num_words
    }

    /// コンパイル済みの素性
    #[inline(always)]
    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    /// コンパイル済みの素性への可変参照
    pub fn features_mut(&mut self) -> &mut FeatureVector {
        &mut self.features
    }

    /// 記号素性
    #[inline(always)]
    pub fn symbolic_features(&self) -> &FeatureVector<String> {
        &self.symbolic_features
    }

    /// 記号素性への可変参照
    pub fn symbolic_features_mut(&mut self) -> &mut FeatureVector<String> {
        &mut self.symbolic_features
    }

    /// 生データ
    #[inline(always)]
    pub fn raw_data(&self) -> &str {
        &self.raw_data
    }

    /// 記号素性がコンパイル済みであれば `true` を返します。
    #[inline(always)]
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// 記号素性をシンボル表のインデックスに変換し、コンパイル済みの素性へ加算します。
    ///
    /// すでにコンパイル済みであれば何もしません。
    ///
    /// # 引数
    ///
    /// * `symbols` - 素性名を登録するシンボル表
    /// * `clear_symbolic` - `true` の場合、変換後に記号素性を削除します。
    ///
    /// # 戻り値
    ///
    /// 変換を行った場合は `true`
    pub fn compile<S>(&mut self, symbols: &mut S, clear_symbolic: bool) -> bool
    where
        S: Symbols + ?Sized,
    {
        if self.compiled {
            return false;
        }
        for (name, value) in self.symbolic_features.iter() {
            self.features.increment(symbols.index_of(name), value);
        }
        if clear_symbolic {
            self.symbolic_features.clear();
        }
        self.compiled = true;
        true
    }

    /// コンパイル済みの素性を記号素性へ戻します。
    ///
    /// # エラー
    ///
    /// シンボル表に登録されていないインデックスがある場合、[`RerankerError`] が返されます。
    pub fn decompile<S>(&mut self, symbols: &S) -> Result<()>
    where
        S: Symbols + ?Sized,
    {
        if !self.compiled {
            return Ok(());
        }
        let mut symbolic = FeatureVector::new();
        for (&index, value) in self.features.iter() {
            let name = symbols.get_symbol(index).ok_or_else(|| {
                RerankerError::invalid_state(
                    "decompiling a candidate",
                    format!("symbol index {index} is not registered"),
                )
            })?;
            symbolic.set(name, value);
        }
        // Symbolic features kept from compilation are already included above.
        self.symbolic_features = symbolic;
        self.features.clear();
        self.compiled = false;
        Ok(())
    }
}

/// 2つの候補の優劣を決める比較関数。
///
/// `compare(a, b)` は `a` の方が良い場合に [`Ordering::Greater`] を返します。
#[derive(Clone)]
pub enum Comparator {
    /// 正解選択用。損失が小さい方が良く、同じならベースラインスコアが高い方が良い。
    Gold,

    /// スコアが高い方が良い。
    Score,

    /// 利用者定義の比較
    Custom(Arc<dyn Fn(&Candidate, &Candidate) -> Ordering + Send + Sync>),
}

impl Comparator {
    /// 2つの候補を比較します。
    pub fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        match self {
            Self::Gold => b
                .loss
                .total_cmp(&a.loss)
                .then_with(|| a.baseline_score.total_cmp(&b.baseline_score)),
            Self::Score => a.score.total_cmp(&b.score),
            Self::Custom(f) => f(a, b),
        }
    }

    /// 最も良い候補の位置を返します。
    ///
    /// 同等の候補が複数ある場合は最も前の位置を返します。
    /// 候補が空なら `None` です。
    pub fn best_index(&self, candidates: &[Candidate]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            match best {
                Some(b) if self.compare(candidate, &candidates[b]) != Ordering::Greater => {}
                _ => best = Some(i),
            }
        }
        best
    }

    /// `exclude` 以外で最も良い候補の位置を返します。
    pub(crate) fn best_index_excluding(
        &self,
        candidates: &[Candidate],
        exclude: usize,
    ) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            if i == exclude {
                continue;
            }
            match best {
                Some(b) if self.compare(candidate, &candidates[b]) != Ordering::Greater => {}
                _ => best = Some(i),
            }
        }
        best
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Gold => write!(f, "Gold"),
            Self::Score => write!(f, "Score"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
