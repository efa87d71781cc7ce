//! 学習時刻の管理。

/// 学習中の時刻。
///
/// エポック番号、エポック内で処理したインスタンス数、
/// 学習開始から処理したインスタンスの総数を保持します。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    epoch: usize,
    index: usize,
    absolute_index: u64,
}

impl Time {
    /// 学習開始時点の時刻を作成します。
    pub fn new() -> Self {
        Self::default()
    }

    /// 開始済みのエポック数
    #[inline(always)]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// 現在のエポックで処理したインスタンス数
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    /// 学習開始から処理したインスタンスの総数
    #[inline(always)]
    pub fn absolute_index(&self) -> u64 {
        self.absolute_index
    }

    /// インスタンスを1つ処理したことを記録します。
    pub fn tick(&mut self) {
        self.index += 1;
        self.absolute_index += 1;
    }

    /// 新しいエポックを開始します。
    pub fn new_epoch(&mut self) {
        self.epoch += 1;
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_and_new_epoch() {
        let mut time = Time::new();
        time.new_epoch();
        time.tick();
        time.tick();
        assert_eq!((1, 2, 2), (time.epoch(), time.index(), time.absolute_index()));

        time.new_epoch();
        time.tick();
        assert_eq!((2, 1, 3), (time.epoch(), time.index(), time.absolute_index()));
    }
}
