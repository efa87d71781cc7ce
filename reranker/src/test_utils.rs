//! テスト用ユーティリティ
//!
//! テストコードで使用する便利なマクロや関数を提供します。

use crate::candidate::Candidate;
use crate::candidate_set::CandidateSet;
use crate::feature_vector::FeatureVector;
use crate::utils::parse_feature_token;

macro_rules! hashmap {
    ( $($k:expr => $v:expr,)* ) => {
        {
            #[allow(unused_mut)]
            let mut h = hashbrown::HashMap::new();
            $(
                h.insert($k, $v);
            )*
            h
        }
    };
    ( $($k:expr => $v:expr),* ) => {
        hashmap![$( $k => $v, )*]
    };
}

pub(crate) use hashmap;

/// `(損失, 記号素性)` の組から候補集合を作成します。
///
/// 記号素性は `"x=1 y"` のような空白区切りの文字列で与えます。
/// 生データには候補の位置を使用します。
pub(crate) fn candidate_set(
    key: &str,
    gold_index: Option<usize>,
    candidates: &[(f64, &str)],
) -> CandidateSet {
    let mut set = CandidateSet::new(key);
    set.set_gold_index(gold_index);
    for (i, &(loss, features)) in candidates.iter().enumerate() {
        let features: FeatureVector<String> = features
            .split_whitespace()
            .map(|token| {
                let (name, value) = parse_feature_token(token).unwrap();
                (name.to_string(), value)
            })
            .collect();
        set.push(
            Candidate::new(i, format!("candidate {i}"))
                .with_loss(loss)
                .with_symbolic_features(features),
        );
    }
    set
}
