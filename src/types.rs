use serde::{Deserialize, Serialize};

/// クラス数（良性, 悪性）
pub const NUM_CLASSES: usize = 2;

/// 良性クラスのインデックス
///
/// モデル学習時のラベル順に依存する、モデルファイルとの外部契約です。
pub const BENIGN_INDEX: usize = 0;

/// 悪性クラスのインデックス
pub const MALIGNANT_INDEX: usize = 1;

/// クラス名の定義（インデックス順）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["benign", "malignant"];

/// 画面で警告色にする悪性確率のしきい値
pub const DEFAULT_HIGH_RISK_THRESHOLD: f32 = 0.8;

/// 1画像分の推論結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub benign: f32,
    pub malignant: f32,
}

impl PredictionResult {
    /// 2クラスの出力ベクトルから変換
    ///
    /// 長さが2でない場合は `None`。
    pub fn from_class_vector(values: &[f32]) -> Option<Self> {
        if values.len() != NUM_CLASSES {
            return None;
        }
        Some(Self {
            benign: values[BENIGN_INDEX],
            malignant: values[MALIGNANT_INDEX],
        })
    }

    /// 悪性確率が既定のしきい値を超えているか
    pub fn is_high_risk(&self) -> bool {
        self.exceeds(DEFAULT_HIGH_RISK_THRESHOLD)
    }

    pub fn exceeds(&self, threshold: f32) -> bool {
        self.malignant > threshold
    }

    /// 確率の高い方のクラス名
    pub fn label(&self) -> &'static str {
        if self.malignant > self.benign {
            CLASS_NAMES[MALIGNANT_INDEX]
        } else {
            CLASS_NAMES[BENIGN_INDEX]
        }
    }
}
