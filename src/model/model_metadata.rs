//! モデルメタデータの定義
//!
//! tar.gz形式のモデルファイルに同梱され、モデルの入出力の約束事を記録します。

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{CLASS_NAMES, NUM_CLASSES};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力インデックス順のクラスラベル
    /// 例: ["benign", "malignant"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常224）
    pub model_input_size: u32,

    /// モデルの書き出し時刻（ISO8601形式）
    #[serde(default)]
    pub exported_at: String,
}

impl ModelMetadata {
    /// 良性/悪性の2クラス用メタデータを作成
    pub fn new(model_input_size: u32) -> Self {
        Self {
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            model_input_size,
            exported_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// 推論コアの前提（2クラス、インデックス順）と一致するか検証
    pub fn validate(&self) -> Result<()> {
        if self.num_classes() != NUM_CLASSES {
            bail!(
                "クラス数が不正です: {} (期待: {})",
                self.num_classes(),
                NUM_CLASSES
            );
        }
        for (index, (label, expected)) in self.class_labels.iter().zip(CLASS_NAMES).enumerate() {
            if label != expected {
                bail!(
                    "クラス {} のラベルが不正です: {} (期待: {})",
                    index,
                    label,
                    expected
                );
            }
        }
        if self.model_input_size == 0 {
            bail!("モデル入力サイズが0です");
        }
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
