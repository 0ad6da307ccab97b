//! ほくろ画像の悪性度判定コア
//!
//! モバイルアプリ本体（UI）からリンクされ、画像の前処理・バッチ推論・結果の検証を担当します。

mod error;
mod predictor;
mod types;

pub mod ml;
pub mod model;

pub use error::{ImageProcessingError, LoadingError, PredictionError};
pub use predictor::{map_predictions, MolePredictor};
pub use types::{PredictionResult, BENIGN_INDEX, CLASS_NAMES, DEFAULT_HIGH_RISK_THRESHOLD, MALIGNANT_INDEX, NUM_CLASSES};

/// ログ出力を初期化
///
/// `RUST_LOG` 環境変数でレベルを指定できます（例: `RUST_LOG=mole_detector_lib=debug`）。
/// すでに初期化済みの場合は何もしません。
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
