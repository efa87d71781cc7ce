//! ユーティリティ関数と型変換トレイトを提供するモジュール
//!
//! - `FromU32`: u32からの型変換トレイト
//! - 記号素性 `name=value` の解析と書き出し
//! - 単語単位の編集距離

use std::io::Write;

use crate::errors::{RerankerError, Result};

/// u32から他の型への変換を提供するトレイト
pub trait FromU32 {
    /// u32値から実装型を生成する
    fn from_u32(src: u32) -> Self;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl FromU32 for usize {
    #[inline(always)]
    fn from_u32(src: u32) -> Self {
        // Since the pointer width is guaranteed to be 32 or 64,
        // the following process always succeeds.
        unsafe { Self::try_from(src).unwrap_unchecked() }
    }
}

/// 記号素性のトークンを名前と値に分割する
///
/// `name=value` の形式であれば値を浮動小数点数として解析し、
/// `=` を含まない場合は値を `1.0` とみなします。
/// 名前自体に `=` が含まれていても良いように、最後の `=` で分割します。
///
/// # 引数
///
/// * `token` - 素性トークン
///
/// # 戻り値
///
/// 名前と値のペア
///
/// # エラー
///
/// 名前が空の場合や値が数値として解析できない場合、[`RerankerError`] が返されます。
///
/// # 例
///
/// ```
/// # use reranker::utils::parse_feature_token;
/// assert_eq!(("lm", 1.5), parse_feature_token("lm=1.5").unwrap());
/// assert_eq!(("a=b", 2.0), parse_feature_token("a=b=2").unwrap());
/// assert_eq!(("bias", 1.0), parse_feature_token("bias").unwrap());
/// ```
pub fn parse_feature_token(token: &str) -> Result<(&str, f64)> {
    let (name, value) = match token.rsplit_once('=') {
        Some((name, value)) => (name, value.parse::<f64>()?),
        None => (token, 1.0),
    };
    if name.is_empty() {
        return Err(RerankerError::invalid_format(
            "feature",
            format!("empty feature name in '{token}'"),
        ));
    }
    Ok((name, value))
}

/// 記号素性を `name=value` の形式で書き出す
pub fn write_feature_token<W>(mut wtr: W, name: &str, value: f64) -> std::io::Result<()>
where
    W: Write,
{
    if value == 1.0 && !name.contains('=') {
        write!(wtr, "{name}")
    } else {
        write!(wtr, "{name}={value}")
    }
}

/// 空白区切りトークン列同士の編集距離を計算する
///
/// 置換、挿入、削除をそれぞれコスト1とするレーベンシュタイン距離です。
pub fn word_edit_distance(hypothesis: &str, reference: &str) -> usize {
    let hyp: Vec<&str> = hypothesis.split_whitespace().collect();
    let reference: Vec<&str> = reference.split_whitespace().collect();

    let mut prev: Vec<usize> = (0..=reference.len()).collect();
    let mut curr = vec![0; reference.len() + 1];
    for (i, h) in hyp.iter().enumerate() {
        curr[0] = i + 1;
        for (j, r) in reference.iter().enumerate() {
            let substitution = prev[j] + usize::from(h != r);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[reference.len()]
}
