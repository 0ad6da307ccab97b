//! モデルランタイムの抽象化
//!
//! 推論コアから見たモデルは `load_file` と `predict_batch` の2操作だけを持つ
//! ブラックボックスです。`ml` フィーチャー有効時は Burn による実装を提供します。

use std::path::Path;

use anyhow::Result;

use crate::ml::batch::BatchBuffer;

/// モデル実行環境
///
/// `load_file` は読み込み前に1度だけ排他的に呼ばれ、
/// 読み込み後は `predict_batch` が複数スレッドから同時に呼ばれることがあります。
pub trait ModelRuntime: Send + Sync {
    /// モデルファイルを読み込む
    fn load_file(&mut self, path: &Path) -> Result<()>;

    /// バッチ推論
    ///
    /// 画像ごとの出力ベクトルを返します。結果が得られない場合は `None`。
    fn predict_batch(&self, batch: &BatchBuffer, image_count: usize) -> Result<Option<Vec<Vec<f32>>>>;
}

#[cfg(feature = "ml")]
pub use burn_runtime::{BurnModelRuntime, CpuModelRuntime, GpuModelRuntime};

#[cfg(feature = "ml")]
mod burn_runtime {
    use super::*;

    use std::sync::Mutex;

    use anyhow::{bail, Context};
    use burn::{
        backend::{NdArray, Wgpu},
        module::Module,
        record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
        tensor::{backend::Backend, Tensor},
    };
    use tracing::{debug, info};

    use crate::ml::ml_model::{ModelConfig, MoleClassifier};
    use crate::model::{load_model_artifact, ModelMetadata};

    /// CPU (NdArray) バックエンド
    pub type CpuModelRuntime = BurnModelRuntime<NdArray>;

    /// WGPU (GPU) バックエンド
    pub type GpuModelRuntime = BurnModelRuntime<Wgpu>;

    struct LoadedModel<B: Backend> {
        // 推論時は複製してからロックを外す
        model: Mutex<MoleClassifier<B>>,
        metadata: ModelMetadata,
    }

    /// Burn製の分類器を実行するランタイム
    pub struct BurnModelRuntime<B: Backend> {
        device: B::Device,
        loaded: Option<LoadedModel<B>>,
    }

    impl<B: Backend> Default for BurnModelRuntime<B> {
        fn default() -> Self {
            Self::new(Default::default())
        }
    }

    impl<B: Backend> BurnModelRuntime<B> {
        pub fn new(device: B::Device) -> Self {
            Self {
                device,
                loaded: None,
            }
        }

        /// 読み込み済みモデルのメタデータ
        pub fn metadata(&self) -> Option<&ModelMetadata> {
            self.loaded.as_ref().map(|l| &l.metadata)
        }
    }

    impl<B: Backend> ModelRuntime for BurnModelRuntime<B> {
        fn load_file(&mut self, path: &Path) -> Result<()> {
            let (metadata, model_binary) = load_model_artifact(path)?;
            metadata.validate()?;

            let model = ModelConfig::new(metadata.num_classes())
                .with_image_size(metadata.model_input_size as usize)
                .init::<B>(&self.device);

            // モデルの重みを復元
            let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
            let record = recorder
                .load(model_binary, &self.device)
                .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
            let model = model.load_record(record);

            info!(
                "[Runtime] モデル読み込み完了: {} (入力 {}x{}, クラス {})",
                path.display(),
                metadata.model_input_size,
                metadata.model_input_size,
                metadata.class_labels.join(", ")
            );

            self.loaded = Some(LoadedModel {
                model: Mutex::new(model),
                metadata,
            });
            Ok(())
        }

        fn predict_batch(&self, batch: &BatchBuffer, image_count: usize) -> Result<Option<Vec<Vec<f32>>>> {
            let loaded = self
                .loaded
                .as_ref()
                .context("モデルが読み込まれていません")?;

            if image_count != batch.image_count() {
                bail!(
                    "画像数が不正です: {} (バッファ: {})",
                    image_count,
                    batch.image_count()
                );
            }
            if image_count == 0 {
                return Ok(None);
            }

            let [n, c, h, w] = batch.dims();
            let size = loaded.metadata.model_input_size as usize;
            if h != size || w != size {
                bail!("入力サイズが不正です: {}x{} (期待: {}x{})", w, h, size, size);
            }

            let model = loaded
                .model
                .lock()
                .map_err(|_| anyhow::anyhow!("モデルのロックが破損しています"))?
                .clone();

            let tensor = Tensor::<B, 1>::from_floats(batch.as_slice(), &self.device).reshape([n, c, h, w]);
            let output = model.forward(tensor);

            let [rows, num_classes] = output.dims();
            let values = output
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;
            debug!("[Runtime] 推論完了: [{}, {}]", rows, num_classes);

            Ok(Some(values.chunks(num_classes).map(|chunk| chunk.to_vec()).collect()))
        }
    }

}
