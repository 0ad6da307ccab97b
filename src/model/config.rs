//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやモデルの配置場所、推論時の挙動をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ml::normalizer::IMAGE_SIZE;
use crate::types::DEFAULT_HIGH_RISK_THRESHOLD;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル配置設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルファイルを置くリソースディレクトリ
    pub resource_dir: PathBuf,
    /// モデルのベース名（拡張子なし）
    pub model_name: String,
    /// モデルファイルの拡張子
    pub extension: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("models"),
            model_name: "mobile_model".to_string(),
            extension: "tar.gz".to_string(),
        }
    }
}

impl ModelSettings {
    /// ベース名 + 拡張子からモデルファイルのパスを組み立てる
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.resource_dir
            .join(format!("{}.{}", model_name, self.extension))
    }
}

/// 推論設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// モデル入力サイズ（正方形）
    pub input_size: u32,
    /// モデル出力がロジットの場合 true（コア側で softmax を適用する）
    pub apply_softmax: bool,
    /// 警告表示にする悪性確率のしきい値
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: f32,
}

fn default_high_risk_threshold() -> f32 {
    DEFAULT_HIGH_RISK_THRESHOLD
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            input_size: IMAGE_SIZE,
            // 同梱のBurn製分類器はロジットを出力する
            apply_softmax: true,
            high_risk_threshold: DEFAULT_HIGH_RISK_THRESHOLD,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル配置設定
    #[serde(default)]
    pub model: ModelSettings,
    /// 推論設定
    #[serde(default)]
    pub inference: InferenceSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("[Config] 設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("[Config] 設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "[Config] 設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定されたモデルファイルのパス
    pub fn model_path(&self) -> PathBuf {
        self.model.model_path(&self.model.model_name)
    }
}
