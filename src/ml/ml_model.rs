//! 機械学習モデルの共通定義
//!
//! ほくろ画像分類用のCNNモデルと関連する設定を提供します。
//! 出力はクラスごとのロジット（softmax前）です。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use tracing::debug;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> MoleClassifier<B> {
        // stride 2, padding 1 の 3x3 Conv で1層ごとにサイズが半分（切り上げ）になる
        let after_conv1 = self.image_size.div_ceil(2);
        let after_conv2 = after_conv1.div_ceil(2);
        let after_conv3 = after_conv2.div_ceil(2);

        debug!("[Model] 入力サイズ: {}x{}", self.image_size, self.image_size);
        debug!("[Model] Conv1後: 16 x {}x{}", after_conv1, after_conv1);
        debug!("[Model] Conv2後: 32 x {}x{}", after_conv2, after_conv2);
        debug!("[Model] Conv3後: 64 x {}x{}", after_conv3, after_conv3);
        debug!("[Model] FC: 64 -> {}", self.num_classes);

        MoleClassifier {
            conv1: Conv2dConfig::new([3, 16], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv2: Conv2dConfig::new([16, 32], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv3: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(64, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// ほくろ画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (stride 2, padding 1) + ReLU} x 3層
/// - Global Average Pooling
/// - FC: 64 -> num_classes
#[derive(Module, Debug)]
pub struct MoleClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 16
    conv2: Conv2d<B>, // 16 -> 32
    conv3: Conv2d<B>, // 32 -> 64
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>, // 64 -> num_classes
    activation: Relu,
}

impl<B: Backend> MoleClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        // [batch, 64, 1, 1] -> [batch, 64]
        let x = self.pool.forward(x);
        let [_, c, _, _] = x.dims();
        let x = x.reshape([batch_size, c]);

        self.fc.forward(x)
    }
}
