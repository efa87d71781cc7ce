//! 損失関数のモジュール。
//!
//! 候補の損失は参照文字列に対して候補集合ごとに1度だけ計算されます。
//! どの指標を使うかはタスクに依存するため、損失関数は差し替え可能です。

use std::fmt;
use std::sync::Arc;

use crate::candidate::Candidate;
use crate::utils::word_edit_distance;

/// 候補の損失を計算する関数。
#[derive(Clone, Default)]
pub enum LossFunction {
    /// 単語誤り率
    ///
    /// 参照文字列との単語単位の編集距離を参照のトークン数で割った値です。
    /// 参照が空の場合は候補のトークン数で割り、両方空なら0です。
    #[default]
    WordErrorRate,

    /// 生データが参照文字列と一致すれば0、そうでなければ1
    ZeroOne,

    /// 利用者定義の損失
    ///
    /// 引数は候補、参照文字列、参照のトークン数です。
    Custom(Arc<dyn Fn(&Candidate, &str, usize) -> f64 + Send + Sync>),
}

impl LossFunction {
    /// 候補の損失を計算します。
    ///
    /// # 引数
    ///
    /// * `candidate` - 対象の候補
    /// * `reference` - 参照文字列
    /// * `reference_token_count` - 参照のトークン数。0の場合は参照文字列から数えます。
    pub fn loss(&self, candidate: &Candidate, reference: &str, reference_token_count: usize) -> f64 {
        match self {
            Self::WordErrorRate => {
                let mut count = if reference_token_count == 0 {
                    reference.split_whitespace().count()
                } else {
                    reference_token_count
                };
                if count == 0 {
                    count = candidate.raw_data().split_whitespace().count();
                }
                if count == 0 {
                    return 0.0;
                }
                let errors = word_edit_distance(candidate.raw_data(), reference);
                errors as f64 / count as f64
            }
            Self::ZeroOne => {
                if candidate.raw_data().trim() == reference.trim() {
                    0.0
                } else {
                    1.0
                }
            }
            Self::Custom(f) => f(candidate, reference, reference_token_count),
        }
    }
}

impl fmt::Debug for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::WordErrorRate => write!(f, "WordErrorRate"),
            Self::ZeroOne => write!(f, "ZeroOne"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(raw: &str) -> Candidate {
        Candidate::new(0, raw)
    }

    #[test]
    fn test_word_error_rate() {
        let wer = LossFunction::WordErrorRate;
        assert_eq!(0.0, wer.loss(&candidate("the cat sat"), "the cat sat", 3));
        assert_eq!(0.25, wer.loss(&candidate("a cat sat down"), "the cat sat down", 4));
        // the token count is derived from the reference when missing
        assert_eq!(0.5, wer.loss(&candidate("the dog"), "the cat", 0));
        assert_eq!(1.0, wer.loss(&candidate("a b"), "", 0));
        assert_eq!(0.0, wer.loss(&candidate(""), "", 0));
    }

    #[test]
    fn test_zero_one() {
        let zo = LossFunction::ZeroOne;
        assert_eq!(0.0, zo.loss(&candidate("the cat"), "the cat", 2));
        assert_eq!(1.0, zo.loss(&candidate("the cats"), "the cat", 2));
    }

    #[test]
    fn test_custom() {
        let f = LossFunction::Custom(Arc::new(|c, _, _| c.raw_data().len() as f64));
        assert_eq!(3.0, f.loss(&candidate("abc"), "", 0));
    }
}
