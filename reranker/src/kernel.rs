//! カーネル関数のモジュール。
//!
//! 候補のスコアは素性ベクトルと重みベクトルの内積をカーネル関数に通した値です。

use std::fmt;
use std::sync::Arc;

use crate::feature_vector::FeatureVector;

/// 内積に適用される変換。
#[derive(Clone, Default)]
pub enum KernelFunction {
    /// 内積をそのまま使用します。
    #[default]
    DotProduct,

    /// 多項式カーネル `(gamma * x + coef0) ^ degree`
    Polynomial {
        /// 次数
        degree: i32,
        /// 内積に掛ける係数
        gamma: f64,
        /// 定数項
        coef0: f64,
    },

    /// 利用者定義の変換
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl KernelFunction {
    /// 内積に変換を適用します。
    #[inline]
    pub fn apply(&self, dot: f64) -> f64 {
        match self {
            Self::DotProduct => dot,
            Self::Polynomial {
                degree,
                gamma,
                coef0,
            } => (gamma * dot + coef0).powi(*degree),
            Self::Custom(f) => f(dot),
        }
    }

    /// 素性ベクトルと重みベクトルからスコアを計算します。
    #[inline]
    pub fn score(&self, features: &FeatureVector, weights: &FeatureVector) -> f64 {
        self.apply(features.dot(weights))
    }
}

impl fmt::Debug for KernelFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DotProduct => write!(f, "DotProduct"),
            Self::Polynomial {
                degree,
                gamma,
                coef0,
            } => f
                .debug_struct("Polynomial")
                .field("degree", degree)
                .field("gamma", gamma)
                .field("coef0", coef0)
                .finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply() {
        assert_eq!(3.0, KernelFunction::DotProduct.apply(3.0));
        let poly = KernelFunction::Polynomial {
            degree: 2,
            gamma: 0.5,
            coef0: 1.0,
        };
        assert_eq!(6.25, poly.apply(3.0));
        let custom = KernelFunction::Custom(Arc::new(|x| x.tanh()));
        assert_eq!(0.0, custom.apply(0.0));
    }

    #[test]
    fn test_score() {
        let features: FeatureVector = [(0, 1.0), (1, 2.0)].into_iter().collect();
        let weights: FeatureVector = [(1, 0.5), (2, 4.0)].into_iter().collect();
        assert_eq!(1.0, KernelFunction::DotProduct.score(&features, &weights));
    }
}
