//! モデル推論機能
//!
//! バッチバッファをモデルランタイムに渡し、画像ごとの生の出力ベクトルを取得します。
//! 推論は呼び出し元をブロックしないよう、tokio のブロッキング用スレッドで実行します。

use std::sync::Arc;

use tokio::task;
use tracing::{debug, warn};

use crate::error::PredictionError;
use crate::ml::batch::BatchBuffer;
use crate::ml::runtime::ModelRuntime;

/// 推論アダプタ
#[derive(Clone)]
pub struct InferenceAdapter {
    runtime: Arc<dyn ModelRuntime>,
    apply_softmax: bool,
}

impl InferenceAdapter {
    /// # 引数
    /// - `runtime`: 読み込み済みのモデルランタイム
    /// - `apply_softmax`: モデル出力がロジットの場合 true（確率を出力するモデルなら false）
    pub fn new(runtime: Arc<dyn ModelRuntime>, apply_softmax: bool) -> Self {
        Self {
            runtime,
            apply_softmax,
        }
    }

    pub fn applies_softmax(&self) -> bool {
        self.apply_softmax
    }

    /// バッチ推論を実行
    ///
    /// バッチバッファはワーカースレッドへ移動し、推論の成否にかかわらずそこで解放されます。
    pub async fn infer(&self, batch: BatchBuffer) -> Result<Vec<Vec<f32>>, PredictionError> {
        let runtime = Arc::clone(&self.runtime);
        let image_count = batch.image_count();

        let result = task::spawn_blocking(move || runtime.predict_batch(&batch, image_count))
            .await
            .map_err(|e| PredictionError::Inference(anyhow::anyhow!("推論スレッドの異常終了: {}", e)))?
            .map_err(PredictionError::Inference)?;

        let outputs = match result {
            Some(outputs) if !outputs.is_empty() => outputs,
            _ => {
                warn!("[Inference] モデルが結果を返しませんでした ({}画像)", image_count);
                return Err(PredictionError::EmptyPrediction);
            }
        };

        debug!(
            "[Inference] 推論完了: {}画像 -> {}件の出力",
            image_count,
            outputs.len()
        );

        if self.apply_softmax {
            Ok(outputs.iter().map(|logits| softmax(logits)).collect())
        } else {
            Ok(outputs)
        }
    }
}

/// 数値的に安定な softmax
///
/// 最大値を引いてから指数を取るため、大きなロジットでもオーバーフローしません。
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}
