//! 疎な素性ベクトルのモジュール。
//!
//! 素性ベクトルは素性の識別子から `f64` の値への写像です。
//! 格納されていないキーの値は0とみなされます。
//!
//! コンパイル済みの素性はシンボル表のインデックス（`u32`）をキーとし、
//! 記号素性は素性名（`String`）をキーとします。

use std::fmt;
use std::hash::Hash;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;

use crate::errors::InstanceError;
use crate::symbols::Symbols;

/// 疎な素性ベクトル。
///
/// 値が0になってもキーは自動的には削除されません。
/// 不要な0要素は [`FeatureVector::prune_zeros`] で明示的に削除します。
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector<K = u32>
where
    K: Eq + Hash,
{
    features: HashMap<K, f64>,
}

impl<K> Default for FeatureVector<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            features: HashMap::new(),
        }
    }
}

impl<K> FeatureVector<K>
where
    K: Eq + Hash + Clone,
{
    /// 空の素性ベクトルを作成します。
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定した素性の値を返します。格納されていなければ `0.0` です。
    #[inline]
    pub fn weight(&self, key: &K) -> f64 {
        self.features.get(key).copied().unwrap_or(0.0)
    }

    /// 格納されている要素数を返します。
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// 要素が1つも格納されていなければ `true` を返します。
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// 指定した素性が格納されていれば `true` を返します。
    pub fn contains_key(&self, key: &K) -> bool {
        self.features.contains_key(key)
    }

    /// 素性と値のペアを任意の順序で返すイテレータ
    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> + '_ {
        self.features.iter().map(|(k, &v)| (k, v))
    }

    /// 格納されている素性の識別子を返すイテレータ
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.features.keys()
    }

    /// 2つのベクトルの内積を計算します。
    ///
    /// 要素数の少ない方のベクトルを走査し、多い方を検索するため、
    /// 計算量は `O(min(|self|, |other|))` です。
    pub fn dot(&self, other: &Self) -> f64 {
        let (small, large) = if self.len() < other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let mut dot_product = 0.0;
        for (key, value) in &small.features {
            if let Some(w) = large.features.get(key) {
                dot_product += value * w;
            }
        }
        dot_product
    }

    /// 値を上書きし、以前の値を返します。
    pub fn set(&mut self, key: K, value: f64) -> f64 {
        self.features.insert(key, value).unwrap_or(0.0)
    }

    /// 値に `delta` を加算し、新しい値を返します。
    ///
    /// キーが存在しなければ `delta` を値として作成します。
    pub fn increment(&mut self, key: K, delta: f64) -> f64 {
        match self.features.entry(key) {
            Entry::Occupied(mut e) => {
                *e.get_mut() += delta;
                *e.get()
            }
            Entry::Vacant(e) => *e.insert(delta),
        }
    }

    /// すべての値を `factor` 倍します。
    ///
    /// `factor` が1の場合は何もしません。0倍してもキーは残ります。
    pub fn scale(&mut self, factor: f64) -> &mut Self {
        if factor != 1.0 {
            for value in self.features.values_mut() {
                *value *= factor;
            }
        }
        self
    }

    /// `self += scalar * other` を計算します。
    pub fn add_scaled(&mut self, other: &Self, scalar: f64) -> &mut Self {
        for (key, &value) in &other.features {
            self.increment(key.clone(), scalar * value);
        }
        self
    }

    /// `other` を `keys` が張る部分空間へ射影し、`scalar` 倍して加算します。
    pub fn add_scaled_subvector<'a, I>(&mut self, keys: I, other: &Self, scalar: f64) -> &mut Self
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        for key in keys {
            self.increment(key.clone(), other.weight(key) * scalar);
        }
        self
    }

    /// ユークリッドノルムの2乗を返します。
    pub fn l2_norm_squared(&self) -> f64 {
        self.features.values().map(|v| v * v).sum()
    }

    /// 値が0の要素を削除します。
    pub fn prune_zeros(&mut self) -> &mut Self {
        self.features.retain(|_, v| *v != 0.0);
        self
    }

    /// すべての要素を削除します。
    pub fn clear(&mut self) {
        self.features.clear();
    }

    /// 要素の変換表に従ってキーを付け替えます。
    ///
    /// 変換表に含まれないキーは削除されます。
    pub fn remap_keys<F>(&mut self, mut f: F)
    where
        F: FnMut(&K) -> Option<K>,
    {
        let old = std::mem::take(&mut self.features);
        for (key, value) in old {
            if let Some(new_key) = f(&key) {
                self.set(new_key, value);
            }
        }
    }
}

impl<K> FeatureVector<K>
where
    K: Eq + Hash + Clone + Ord,
{
    /// 素性と値のペアをキーの昇順で返します。
    ///
    /// シリアライズの出力を再現可能にするために使用します。
    pub fn sorted_entries(&self) -> Vec<(K, f64)> {
        let mut entries: Vec<_> = self.features.iter().map(|(k, &v)| (k.clone(), v)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl FeatureVector<u32> {
    /// 格納されているインデックスの最大値を返します。
    pub fn max_key(&self) -> Option<u32> {
        self.features.keys().copied().max()
    }

    /// すべてのインデックスがシンボル表に登録済みで、値が有限であることを確認します。
    ///
    /// # 引数
    ///
    /// * `symbols` - 素性をコンパイルしたシンボル表
    /// * `key` - エラーメッセージ用の訓練キー
    /// * `candidate` - エラーメッセージ用の候補インデックス
    pub(crate) fn validate<S>(
        &self,
        symbols: &S,
        key: &str,
        candidate: usize,
    ) -> Result<(), InstanceError>
    where
        S: Symbols + ?Sized,
    {
        for (&index, &value) in &self.features {
            if !symbols.contains_index(index) {
                return Err(InstanceError::UnknownSymbol {
                    key: key.to_string(),
                    candidate,
                    index,
                });
            }
            if !value.is_finite() {
                return Err(InstanceError::NonFiniteValue {
                    key: key.to_string(),
                    candidate,
                });
            }
        }
        Ok(())
    }
}

impl<K> FromIterator<(K, f64)> for FeatureVector<K>
where
    K: Eq + Hash + Clone,
{
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut fv = Self::new();
        fv.extend(iter);
        fv
    }
}

impl<K> Extend<(K, f64)> for FeatureVector<K>
where
    K: Eq + Hash + Clone,
{
    /// 値は上書きではなく加算されます。
    fn extend<I: IntoIterator<Item = (K, f64)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.increment(k, v);
        }
    }
}

impl<K> fmt::Display for FeatureVector<K>
where
    K: Eq + Hash + Clone + Ord + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, (k, v)) in self.sorted_entries().into_iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::symbols::LocalSymbolTable;

    fn fv(entries: &[(u32, f64)]) -> FeatureVector {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_missing_key_is_zero() {
        let v = fv(&[(1, 2.0)]);
        assert_eq!(0.0, v.weight(&0));
        assert_eq!(2.0, v.weight(&1));
    }

    #[test]
    fn test_set_and_increment() {
        let mut v = FeatureVector::new();
        assert_eq!(0.0, v.set(3, 1.5));
        assert_eq!(1.5, v.set(3, -2.0));
        assert_eq!(-2.0, v.weight(&3));

        assert_eq!(0.5, v.increment(4, 0.5));
        assert_eq!(1.25, v.increment(4, 0.75));
        assert_eq!(0.0, v.increment(7, 0.0));
        assert!(v.contains_key(&7));
        assert_eq!(3, v.len());
    }

    #[test]
    fn test_dot_symmetric() {
        let a = fv(&[(0, 1.0), (1, 2.0), (5, -3.0)]);
        let b = fv(&[(1, 4.0), (5, 1.0), (6, 10.0), (7, 2.0)]);
        assert_eq!(5.0, a.dot(&b));
        assert_eq!(a.dot(&b), b.dot(&a));
        assert_eq!(0.0, a.dot(&FeatureVector::new()));
    }

    #[test]
    fn test_dot_bilinear() {
        let a = fv(&[(0, 1.5), (2, -2.0), (3, 0.25)]);
        let b = fv(&[(0, 2.0), (2, 1.0), (9, 4.0)]);
        for k in [0.0, 0.5, -3.0, 7.25] {
            let mut scaled = a.clone();
            scaled.scale(k);
            assert!((scaled.dot(&b) - k * a.dot(&b)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_scale_identity_and_zero() {
        let mut v = fv(&[(0, 1.5), (2, -2.0)]);
        let orig = v.clone();
        v.scale(1.0);
        assert_eq!(orig, v);

        v.scale(0.0);
        assert_eq!(2, v.len());
        assert_eq!(0.0, v.weight(&0));
        assert_eq!(0.0, v.weight(&2));

        v.prune_zeros();
        assert!(v.is_empty());
    }

    #[test]
    fn test_scale_empty() {
        let mut v = FeatureVector::<u32>::new();
        v.scale(3.0);
        assert!(v.is_empty());
    }

    #[test]
    fn test_add_scaled() {
        let mut w = fv(&[(0, 1.0)]);
        w.add_scaled(&fv(&[(0, 1.0), (1, 2.0)]), -0.5);
        assert_eq!(0.5, w.weight(&0));
        assert_eq!(-1.0, w.weight(&1));
    }

    #[test]
    fn test_add_scaled_subvector() {
        let mut w = FeatureVector::new();
        let other = fv(&[(0, 1.0), (1, 2.0), (2, 3.0)]);
        w.add_scaled_subvector(&[0, 2], &other, 2.0);
        assert_eq!(2.0, w.weight(&0));
        assert_eq!(0.0, w.weight(&1));
        assert_eq!(6.0, w.weight(&2));
        assert!(!w.contains_key(&1));
    }

    #[test]
    fn test_remap_keys() {
        let mut v = fv(&[(0, 1.0), (1, 2.0), (2, 3.0)]);
        v.remap_keys(|&k| if k == 1 { None } else { Some(k + 10) });
        assert_eq!(vec![(10, 1.0), (12, 3.0)], v.sorted_entries());
    }

    #[test]
    fn test_validate() {
        let mut table = LocalSymbolTable::new();
        for name in ["a", "b", "c", "d", "e"] {
            table.index_of(name);
        }
        let v = fv(&[(0, 1.0), (4, 2.0)]);
        assert!(v.validate(&table, "k", 0).is_ok());
        assert_eq!(
            Err(InstanceError::UnknownSymbol {
                key: "k".to_string(),
                candidate: 2,
                index: 5,
            }),
            fv(&[(5, 1.0)]).validate(&table, "k", 2)
        );
        let nan = fv(&[(0, f64::NAN)]);
        assert!(matches!(
            nan.validate(&table, "k", 0),
            Err(InstanceError::NonFiniteValue { .. })
        ));
    }

    #[test]
    fn test_validate_restored_table_with_holes() {
        let mut table = LocalSymbolTable::new();
        for (name, index) in [("a", 0), ("c", 2), ("d", 3)] {
            table.set_index(name, index).unwrap();
        }
        assert!(fv(&[(0, 1.0), (3, 1.0)]).validate(&table, "k", 0).is_ok());
        assert!(matches!(
            fv(&[(1, 1.0)]).validate(&table, "k", 0),
            Err(InstanceError::UnknownSymbol { index: 1, .. })
        ));
    }

    #[test]
    fn test_display() {
        let v = fv(&[(3, 0.5), (1, 2.0)]);
        assert_eq!("[1=2 3=0.5]", v.to_string());
        let s: FeatureVector<String> = [("lm".to_string(), 1.0)].into_iter().collect();
        assert_eq!("[lm=1]", s.to_string());
    }
}
