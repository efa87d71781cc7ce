//! # Reranker
//!
//! 外部の生成器が出力した候補（仮説）の集合を並べ替える識別的リランカーです。
//!
//! ## 概要
//!
//! 候補には疎な記号素性が付与されており、このライブラリは正解の候補が
//! 他の候補より高いスコアを得るような線形モデルをオンライン学習で求めます。
//! 学習済みの重みは重みを変更しない純粋なスコアリングに使用できます。
//!
//! ## 主な機能
//!
//! - **シンボル表**: 素性名と密な整数インデックスの対応（専用または共有）
//! - **疎な素性ベクトル**: 内積、スケーリング、部分空間への加算
//! - **候補集合**: 正解と最高スコアの管理、比較関数、損失関数
//! - **オンライン学習**: パーセプトロンとMIRA、平均化、打ち切り判定
//! - **入出力**: 候補集合のテキスト形式、重みのテキスト形式、rkyvによるモデルの保存
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use reranker::{
//!     Candidate, CandidateSet, FeatureVector, Model, ModelConfig, Symbols, UpdateRule,
//! };
//!
//! let features = |name: &str, value: f64| -> FeatureVector<String> {
//!     [(name.to_string(), value)].into_iter().collect()
//! };
//!
//! let mut set = CandidateSet::new("utt-1").with_gold_index(0);
//! set.push(Candidate::new(0, "the cat sat").with_symbolic_features(features("x", 1.0)));
//! set.push(Candidate::new(1, "the cat sad").with_symbolic_features(features("x", -1.0)));
//! let mut corpus = vec![set];
//!
//! let mut model = Model::new("toy", UpdateRule::Perceptron);
//! model.configure(ModelConfig::new().max_epochs(1))?;
//! let report = model.train(&mut corpus)?;
//! assert_eq!(1, report.epochs_run);
//!
//! let index = model.symbols().get_index("x").unwrap();
//! assert_eq!(2.0, model.weights().weight(&index));
//!
//! model.score_candidates(&mut corpus[0])?;
//! assert_eq!(Some(0), corpus[0].best_scoring_index());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// 候補の表現と比較関数
pub mod candidate;

/// 候補集合とその入出力
pub mod candidate_set;

/// エラー型の定義
pub mod errors;

/// 疎な素性ベクトル
pub mod feature_vector;

/// カーネル関数
pub mod kernel;

/// 損失関数
pub mod loss;

/// モデルと学習ループ
pub mod model;

/// スコアリング戦略
pub mod scorer;

/// シンボル表
pub mod symbols;

/// 内部ユーティリティ関数
pub mod utils;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-exports
pub use candidate::{Candidate, Comparator};
pub use candidate_set::CandidateSet;
pub use candidate_set::reader::{CandidateSetReader, CandidateSetWriter};
pub use errors::{RerankerError, Result};
pub use feature_vector::FeatureVector;
pub use kernel::KernelFunction;
pub use loss::LossFunction;
pub use model::{Model, ModelConfig, StopReason, TrainingReport, UpdateRule};
pub use scorer::{CandidateSetScorer, RandomPairScorer};
pub use symbols::{LocalSymbolTable, SharedSymbolTable, SymbolTable, Symbols};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
