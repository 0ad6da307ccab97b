//! エラー型の定義
//!
//! モデル読み込み・画像前処理・推論の各段階で発生するエラーを型で区別します。
//! 表示文字列はそのままUI側のアラートに表示される想定です。

use thiserror::Error;

/// モデル読み込みエラー
#[derive(Error, Debug)]
pub enum LoadingError {
    /// リソースディレクトリにモデルファイルが存在しない
    #[error("Model not found")]
    ModelNotFound {
        /// モデルのベース名
        name: String,
        /// 探索したパス
        path: std::path::PathBuf,
    },

    /// ランタイムがモデルを読み込めなかった（破損、形式不一致など）
    #[error("{0:#}")]
    ModelLoadFailure(#[source] anyhow::Error),
}

/// 画像前処理エラー
#[derive(Error, Debug)]
pub enum ImageProcessingError {
    /// エンコード済み画像をデコードできない
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    /// 幅または高さが0の画像
    #[error("image has no pixels: {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    /// リサイズ先のサイズが不正
    #[error("invalid target size: {width}x{height}")]
    InvalidTargetSize { width: u32, height: u32 },

    /// バッチ内のテンソル形状が揃っていない
    #[error("tensor shape mismatch at index {index}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        index: usize,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// 正規化結果に NaN / Inf が含まれる
    #[error("non-finite value at offset {offset}")]
    NonFiniteValue { offset: usize },
}

/// 推論エラー
#[derive(Error, Debug)]
pub enum PredictionError {
    /// load() が成功する前に推論が呼ばれた
    #[error("Model not loaded")]
    NotLoaded,

    /// モデルが結果を返さなかった
    #[error("Empty prediction")]
    EmptyPrediction,

    /// 推論結果の数が入力画像数と一致しない
    #[error("Incorrect predictions count: {0}")]
    IncorrectPredictionsCount(usize),

    /// 変換後の結果数が入力画像数と一致しない
    #[error("Incorrect valid predictions count: {0}")]
    IncorrectValidPredictionsCount(usize),

    /// 1画像あたりのクラス数が2ではない
    #[error("Incorrect target classes count: {0}")]
    IncorrectTargetClassesCount(usize),

    /// 画像前処理の失敗（バッチ全体が失敗する）
    #[error("Image processing failed: {0}")]
    ImageProcessing(#[from] ImageProcessingError),

    /// ランタイム内部の失敗
    #[error("Inference failed: {0:#}")]
    Inference(#[source] anyhow::Error),
}
