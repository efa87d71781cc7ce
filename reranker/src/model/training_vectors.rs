//! 学習中の重みベクトルの集合。
//!
//! 生の重みに加えて、平均化パーセプトロン用の平均重みを遅延評価で管理します。
//! 各素性について最後に平均を更新した時刻と重みの累積和を記録しておき、
//! 重みが変わる直前とエポックの終わりにだけ累積和を追いつかせます。

use hashbrown::HashMap;

use crate::feature_vector::FeatureVector;
use crate::model::time::Time;

/// 学習中の重みベクトルの集合。
#[derive(Clone, Debug, Default)]
pub struct TrainingVectorSet {
    weights: FeatureVector,
    average_weights: FeatureVector,
    weight_sums: FeatureVector,
    last_update_indices: HashMap<u32, u64>,
}

impl TrainingVectorSet {
    /// 空の集合を作成します。
    pub fn new() -> Self {
        Self::default()
    }

    /// 生の重み
    #[inline(always)]
    pub fn weights(&self) -> &FeatureVector {
        &self.weights
    }

    /// 平均重み
    #[inline(always)]
    pub fn average_weights(&self) -> &FeatureVector {
        &self.average_weights
    }

    /// `raw` が `true` なら生の重み、そうでなければ平均重みを返します。
    pub fn get(&self, raw: bool) -> &FeatureVector {
        if raw {
            &self.weights
        } else {
            &self.average_weights
        }
    }

    /// 重みに `scalar * delta` を加算します。
    ///
    /// 変化する素性の平均は、加算の前に `time` まで追いつかせます。
    pub fn update(&mut self, time: &Time, delta: &FeatureVector, scalar: f64) {
        for &uid in delta.keys() {
            self.update_average(time, uid);
        }
        self.weights.add_scaled(delta, scalar);
    }

    /// すべての素性の平均を `time` まで追いつかせます。
    ///
    /// 学習開始から1つもインスタンスを処理していなければ、平均重みは生の重みと同じです。
    pub fn update_all_averages(&mut self, time: &Time) {
        if time.absolute_index() == 0 {
            self.average_weights = self.weights.clone();
            return;
        }
        let uids: Vec<u32> = self
            .weights
            .keys()
            .chain(self.average_weights.keys())
            .copied()
            .collect();
        for uid in uids {
            self.update_average(time, uid);
        }
    }

    fn update_average(&mut self, time: &Time, uid: u32) {
        let now = time.absolute_index();
        let last = self.last_update_indices.get(&uid).copied().unwrap_or(0);
        if now <= last {
            return;
        }
        let add_to_sum = (now - last) as f64 * self.weights.weight(&uid);
        let sum = self.weight_sums.increment(uid, add_to_sum);
        self.average_weights.set(uid, sum / now as f64);
        self.last_update_indices.insert(uid, now);
    }

    /// 重みを置き換えます。平均の履歴は破棄され、平均重みも同じ値になります。
    pub fn reset_to(&mut self, weights: FeatureVector) {
        self.average_weights = weights.clone();
        self.weights = weights;
        self.weight_sums.clear();
        self.last_update_indices.clear();
    }

    /// 平均重みを直接設定します。モデルの復元に使用します。
    pub(crate) fn set_average_weights(&mut self, average_weights: FeatureVector) {
        self.average_weights = average_weights;
    }

    /// 素性のインデックスを付け替えます。変換表にない素性は削除されます。
    pub fn remap_feature_uids(&mut self, old_to_new: &HashMap<u32, u32>) {
        let remap = |uid: &u32| old_to_new.get(uid).copied();
        self.weights.remap_keys(remap);
        self.average_weights.remap_keys(remap);
        self.weight_sums.remap_keys(remap);
        self.last_update_indices = self
            .last_update_indices
            .iter()
            .filter_map(|(uid, &t)| Some((old_to_new.get(uid).copied()?, t)))
            .collect();
    }
}
