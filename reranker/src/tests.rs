//! リランカーのテストモジュール群
//!
//! 学習ループ（収束、打ち切り、フック、更新則）と、
//! 学習済みモデルの保存・読み込みおよび推論の動作を検証するテストを含みます。

mod training;
