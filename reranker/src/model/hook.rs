//! エポック終了時に呼び出されるフック。

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::errors::Result;
use crate::model::{EpochStats, Model};

/// フックが学習ループに返す指示。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookAction {
    /// 学習を続けます。
    Continue,
    /// このエポックで学習を打ち切ります。
    Stop,
}

/// エポック終了時に呼び出されるフック。
///
/// フックはエポックの統計を受け取り、学習を続けるかを返します。
/// エラーを返すと学習はその時点で中断されます。
pub trait EndOfEpochHook: Send {
    /// エポック終了時に呼び出されます。
    ///
    /// # 引数
    ///
    /// * `model` - 学習中のモデル
    /// * `stats` - 終了したエポックの統計
    fn on_epoch_end(&mut self, model: &Model, stats: &EpochStats) -> Result<HookAction>;
}

impl<F> EndOfEpochHook for F
where
    F: FnMut(&Model, &EpochStats) -> Result<HookAction> + Send,
{
    fn on_epoch_end(&mut self, model: &Model, stats: &EpochStats) -> Result<HookAction> {
        self(model, stats)
    }
}

/// 最良のエポックが更新されるたびにモデルをファイルへ書き出すフック。
///
/// 同じディレクトリの一時ファイルに書き出してから置き換えるため、
/// 書き出し中に中断されても以前のモデルは壊れません。
#[derive(Debug)]
pub struct EndOfEpochModelWriter {
    path: PathBuf,
    last_written_epoch: Option<usize>,
}

impl EndOfEpochModelWriter {
    /// 新しいフックを作成します。
    ///
    /// # 引数
    ///
    /// * `path` - モデルの出力先
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            path: path.as_ref().to_path_buf(),
            last_written_epoch: None,
        }
    }

    /// 最後に書き出したモデルのエポック
    pub fn last_written_epoch(&self) -> Option<usize> {
        self.last_written_epoch
    }

    fn write(&self, model: &Model) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        model.write_model(tmp.as_file_mut())?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

impl EndOfEpochHook for EndOfEpochModelWriter {
    fn on_epoch_end(&mut self, model: &Model, _stats: &EpochStats) -> Result<HookAction> {
        let best_epoch = model.best_epoch();
        if best_epoch.is_some() && best_epoch != self.last_written_epoch {
            self.write(model)?;
            log::info!(
                "Wrote model of epoch {} to {}",
                best_epoch.unwrap_or_default(),
                self.path.display()
            );
            self.last_written_epoch = best_epoch;
        }
        Ok(HookAction::Continue)
    }
}
