//! エラー型の定義
//!
//! このモジュールは、リランカーライブラリで使用されるすべてのエラー型を定義します。
//! 学習前に検出される設定エラーは致命的で、重みが更新される前に学習を中断します。
//! 1つの候補集合に起因するインスタンスエラーは回復可能で、学習ループ内では
//! スキップされて件数だけが集計されます。

use std::error::Error;
use std::fmt;

/// リランカー専用のResult型
///
/// エラー型としてデフォルトで[`RerankerError`]を使用します。
pub type Result<T, E = RerankerError> = std::result::Result<T, E>;

/// リランカーのエラー型
#[derive(Debug, thiserror::Error)]
pub enum RerankerError {
    /// 無効な引数エラー
    #[error(transparent)]
    InvalidArgument(InvalidArgumentError),

    /// 無効なフォーマットエラー
    #[error(transparent)]
    InvalidFormat(InvalidFormatError),

    /// 無効な状態エラー
    #[error(transparent)]
    InvalidState(InvalidStateError),

    /// 設定エラー
    ///
    /// 学習開始前に検出され、学習全体を中断します。
    #[error(transparent)]
    Configuration(ConfigurationError),

    /// 1つの候補集合に関するエラー
    ///
    /// 学習ループ内では回復可能として扱われます。
    #[error(transparent)]
    Instance(#[from] InstanceError),

    /// 整数変換エラー
    #[error(transparent)]
    TryFromInt(std::num::TryFromIntError),

    /// 浮動小数点数パースエラー
    #[error(transparent)]
    ParseFloat(std::num::ParseFloatError),

    /// 整数パースエラー
    #[error(transparent)]
    ParseInt(std::num::ParseIntError),

    /// I/Oエラー
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// rkyvシリアライゼーションエラー
    #[error(transparent)]
    RkyvError(#[from] rkyv::rancor::Error),

    /// 一時ファイルの永続化エラー
    #[error(transparent)]
    PathPersist(#[from] tempfile::PersistError),
}

impl RerankerError {
    /// 無効な引数エラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - 引数の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効なフォーマットエラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - フォーマット名
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_format<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効な状態エラーを生成します
    ///
    /// # 引数
    ///
    /// * `msg` - エラーメッセージ
    /// * `cause` - エラーの原因
    pub(crate) fn invalid_state<S, M>(msg: S, cause: M) -> Self
    where
        S: Into<String>,
        M: Into<String>,
    {
        Self::InvalidState(InvalidStateError {
            msg: msg.into(),
            cause: cause.into(),
        })
    }

    /// 設定エラーを生成します
    pub(crate) fn configuration<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Configuration(ConfigurationError { msg: msg.into() })
    }

    /// 設定エラーであれば `true` を返します。
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// 引数が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// 引数の名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

/// 入力フォーマットが無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidFormatError {
    /// フォーマットの名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidFormatError {}

/// 状態が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidStateError {
    /// エラーメッセージ
    pub(crate) msg: String,

    /// エラーの根本原因
    pub(crate) cause: String,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidStateError: {}: {}", self.msg, self.cause)
    }
}

impl Error for InvalidStateError {}

/// モデルの設定が不正な場合に使用されるエラー
#[derive(Debug)]
pub struct ConfigurationError {
    pub(crate) msg: String,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConfigurationError: {}", self.msg)
    }
}

impl Error for ConfigurationError {}

/// 1つの候補集合が学習や推論に使えない理由
///
/// 未登録のシンボルインデックスを参照する素性（数値エラー）もここに含まれ、
/// 値が0として黙って扱われることはありません。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstanceError {
    /// 候補が1つもない
    #[error("InstanceError: candidate set '{key}' is empty")]
    EmptySet {
        /// 訓練キー
        key: String,
    },

    /// 正解インデックスが範囲外
    #[error("InstanceError: candidate set '{key}' has gold index {gold} but only {len} candidates")]
    GoldOutOfRange {
        /// 訓練キー
        key: String,
        /// 正解インデックス
        gold: usize,
        /// 候補数
        len: usize,
    },

    /// シンボル表に登録されていないインデックスを参照している
    #[error(
        "InstanceError: candidate {candidate} of '{key}' refers to symbol index {index}, \
         which is not registered in the symbol table"
    )]
    UnknownSymbol {
        /// 訓練キー
        key: String,
        /// 候補のインデックス
        candidate: usize,
        /// 素性のインデックス
        index: u32,
    },

    /// 素性値が有限でない
    #[error("InstanceError: candidate {candidate} of '{key}' has a non-finite feature value")]
    NonFiniteValue {
        /// 訓練キー
        key: String,
        /// 候補のインデックス
        candidate: usize,
    },
}

impl From<std::num::TryFromIntError> for RerankerError {
    fn from(error: std::num::TryFromIntError) -> Self {
        Self::TryFromInt(error)
    }
}

impl From<std::num::ParseFloatError> for RerankerError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::ParseFloat(error)
    }
}

impl From<std::num::ParseIntError> for RerankerError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::ParseInt(error)
    }
}
