//! ほくろ画像の悪性度推論サービス
//!
//! 画像の正規化 → バッチ組み立て → 推論 → 出力の検証と変換 を順に行います。
//! 件数やクラス数が合わない場合は部分的な結果を返さずエラーにします。

use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::{LoadingError, PredictionError};
use crate::ml::batch::assemble;
use crate::ml::inference::InferenceAdapter;
use crate::ml::normalizer::{ImageNormalizer, NormalizedTensor};
use crate::ml::runtime::ModelRuntime;
use crate::model::config::AppConfig;
use crate::model::loader::{LoadState, ModelLoader};
use crate::types::{PredictionResult, NUM_CLASSES};

/// 推論サービス
pub struct MolePredictor {
    loader: ModelLoader,
    normalizer: ImageNormalizer,
    model_name: String,
    apply_softmax: bool,
    high_risk_threshold: f32,
}

impl MolePredictor {
    /// 任意のランタイムで初期化
    pub fn new(config: &AppConfig, runtime: Box<dyn ModelRuntime>) -> Self {
        Self {
            loader: ModelLoader::new(config.model.clone(), runtime),
            normalizer: ImageNormalizer::square(config.inference.input_size),
            model_name: config.model.model_name.clone(),
            apply_softmax: config.inference.apply_softmax,
            high_risk_threshold: config.inference.high_risk_threshold,
        }
    }

    /// 設定のデバイス種別に応じたBurnランタイムで初期化
    #[cfg(feature = "ml")]
    pub fn from_config(config: &AppConfig) -> Self {
        use crate::ml::runtime::{CpuModelRuntime, GpuModelRuntime};
        use crate::model::config::DeviceType;

        let runtime: Box<dyn ModelRuntime> = match config.device_type {
            DeviceType::Cpu => Box::new(CpuModelRuntime::default()),
            DeviceType::Wgpu => Box::new(GpuModelRuntime::default()),
        };
        debug!("[Predictor] 計算デバイス: {}", config.device_type);
        Self::new(config, runtime)
    }

    /// 設定済みのモデルを読み込む
    pub async fn load(&self) -> Result<(), LoadingError> {
        self.loader.load(&self.model_name).await
    }

    pub fn load_state(&self) -> LoadState {
        self.loader.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.loader.is_loaded()
    }

    /// 悪性確率が警告しきい値を超えているか
    pub fn is_high_risk(&self, malignant_probability: f32) -> bool {
        malignant_probability > self.high_risk_threshold
    }

    /// 1画像の悪性確率（0〜1）を返す
    pub async fn predict_malignant_probability(&self, image: &DynamicImage) -> Result<f32, PredictionError> {
        let predictions = self.predict(std::slice::from_ref(image)).await?;
        if predictions.len() != 1 {
            return Err(PredictionError::IncorrectPredictionsCount(predictions.len()));
        }
        Ok(predictions[0].malignant)
    }

    /// エンコード済み画像（PNG, JPEG など）の悪性確率を返す
    pub async fn predict_malignant_probability_from_bytes(&self, bytes: &[u8]) -> Result<f32, PredictionError> {
        let image = ImageNormalizer::decode(bytes)?;
        self.predict_malignant_probability(&image).await
    }

    /// 複数画像をバッチ推論
    ///
    /// 結果は入力順に並びます。1枚でも前処理に失敗した場合はバッチ全体が失敗します。
    /// 空の入力は読み込み済みなら推論せずに空の結果を返し、未読み込みなら `NotLoaded` です。
    pub async fn predict(&self, images: &[DynamicImage]) -> Result<Vec<PredictionResult>, PredictionError> {
        let handle = self.loader.handle()?;

        if images.is_empty() {
            return Ok(Vec::new());
        }

        let tensors = images
            .iter()
            .map(|image| self.normalizer.apply(image))
            .collect::<Result<Vec<NormalizedTensor>, _>>()?;
        let batch = assemble(tensors)?;
        debug!("[Predictor] バッチ組み立て完了: {:?}", batch.dims());

        let adapter = InferenceAdapter::new(handle.runtime(), self.apply_softmax);
        let raw_outputs = adapter.infer(batch).await?;

        map_predictions(images.len(), raw_outputs)
    }
}

/// 生の出力ベクトルを検証して (良性, 悪性) に変換
///
/// 検証順:
/// 1. 出力件数 == 画像数
/// 2. 各ベクトルの長さ == 2（最初に見つかった違反でバッチ全体を失敗させる）
/// 3. 変換後の件数 == 画像数
pub fn map_predictions(
    image_count: usize,
    raw_outputs: Vec<Vec<f32>>,
) -> Result<Vec<PredictionResult>, PredictionError> {
    if raw_outputs.len() != image_count {
        warn!(
            "[Predictor] 出力件数が不正です: {} (画像数: {})",
            raw_outputs.len(),
            image_count
        );
        return Err(PredictionError::IncorrectPredictionsCount(raw_outputs.len()));
    }

    let mut valid_predictions = Vec::with_capacity(raw_outputs.len());
    for output in &raw_outputs {
        match PredictionResult::from_class_vector(output) {
            Some(result) => valid_predictions.push(result),
            None => {
                warn!(
                    "[Predictor] クラス数が不正です: {} (期待: {})",
                    output.len(),
                    NUM_CLASSES
                );
                return Err(PredictionError::IncorrectTargetClassesCount(output.len()));
            }
        }
    }

    if valid_predictions.len() != image_count {
        return Err(PredictionError::IncorrectValidPredictionsCount(
            valid_predictions.len(),
        ));
    }

    Ok(valid_predictions)
}
