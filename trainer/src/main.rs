//! リランカーのコマンドラインツール
//!
//! 候補集合のコーパスからモデルを学習する `train` と、学習済みモデルで
//! 候補集合を並べ替える `score` のサブコマンドを提供します。
//! ログの出力先は `RUST_LOG` 環境変数で調整できます。

mod score;
mod train;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::{score::ScoreError, train::TrainError};

/// コマンドライン引数の構造体
///
/// `clap`を使用してコマンドライン引数をパースします。
#[derive(Parser, Debug)]
#[clap(name = "rerank", version)]
struct Cli {
    /// 実行するサブコマンド
    #[clap(subcommand)]
    command: Command,
}

/// 利用可能なサブコマンド
#[derive(Parser, Debug)]
enum Command {
    /// 候補集合のコーパスからモデルを学習します
    ///
    /// パーセプトロンまたはMIRAでオンライン学習を行い、zstd圧縮したモデルを出力します。
    Train(train::Args),

    /// 学習済みモデルで候補集合をスコアリングします
    ///
    /// 各候補集合の最高スコアの候補を出力するか、スコア付きの候補集合を書き出します。
    Score(score::Args),
}

/// 実行中に発生する可能性のあるエラー
///
/// 各サブコマンドで発生したエラーをラップします。
#[derive(Debug, Error)]
pub enum RerankError {
    /// 学習中のエラー
    #[error(transparent)]
    TrainError(#[from] TrainError),
    /// スコアリング中のエラー
    #[error(transparent)]
    ScoreError(#[from] ScoreError),
}

/// 入力ファイルを開きます。拡張子が `.zst` の場合はzstdで展開しながら読み込みます。
pub(crate) fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "zst") {
        Ok(Box::new(zstd::Decoder::new(file)?))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// メイン関数
///
/// ログの出力先を設定し、コマンドライン引数をパースしてサブコマンドを実行します。
///
/// # エラー
///
/// 各サブコマンドの実行中にエラーが発生した場合、そのエラーが返されます。
fn main() -> Result<(), RerankError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => Ok(train::run(args)?),
        Command::Score(args) => Ok(score::run(args)?),
    }
}
