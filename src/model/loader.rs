//! モデルの読み込み
//!
//! リソースディレクトリからベース名 + 拡張子でモデルファイルを解決し、
//! セッション中に1度だけ読み込みます。同時に呼ばれた `load` は非同期Mutexで直列化されます。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{LoadingError, PredictionError};
use crate::ml::runtime::ModelRuntime;
use crate::model::config::ModelSettings;

/// 読み込み状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    /// 失敗（再度 `load` を呼べばリトライできる）
    Failed,
}

/// 読み込み済みモデルへの参照
///
/// 読み込み後は読み取り専用なので、推論ごとに複製してロックなしで共有します。
#[derive(Clone)]
pub struct ModelHandle {
    runtime: Arc<dyn ModelRuntime>,
}

impl ModelHandle {
    pub fn runtime(&self) -> Arc<dyn ModelRuntime> {
        Arc::clone(&self.runtime)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

/// モデルローダー
pub struct ModelLoader {
    settings: ModelSettings,
    // 読み込み前のランタイム。失敗時はここに戻される
    pending: AsyncMutex<Option<Box<dyn ModelRuntime>>>,
    handle: OnceLock<ModelHandle>,
    state: Mutex<LoadState>,
}

impl ModelLoader {
    pub fn new(settings: ModelSettings, runtime: Box<dyn ModelRuntime>) -> Self {
        Self {
            settings,
            pending: AsyncMutex::new(Some(runtime)),
            handle: OnceLock::new(),
            state: Mutex::new(LoadState::Unloaded),
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn state(&self) -> LoadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.get().is_some()
    }

    /// 読み込み済みモデルを取得（未読み込みなら `NotLoaded`）
    pub fn handle(&self) -> Result<ModelHandle, PredictionError> {
        self.handle.get().cloned().ok_or(PredictionError::NotLoaded)
    }

    /// モデルを読み込む
    ///
    /// 読み込み済みの場合は何もしません。ファイル読み込みはブロッキング用スレッドで行います。
    pub async fn load(&self, model_name: &str) -> Result<(), LoadingError> {
        let mut pending = self.pending.lock().await;

        if self.is_loaded() {
            debug!("[Loader] 読み込み済みのためスキップ: {}", model_name);
            return Ok(());
        }

        self.set_state(LoadState::Loading);

        let path = self.settings.model_path(model_name);
        if !path.is_file() {
            warn!("[Loader] モデルファイルが見つかりません: {}", path.display());
            self.set_state(LoadState::Failed);
            return Err(LoadingError::ModelNotFound {
                name: model_name.to_string(),
                path,
            });
        }

        let Some(mut runtime) = pending.take() else {
            self.set_state(LoadState::Failed);
            return Err(LoadingError::ModelLoadFailure(anyhow::anyhow!(
                "モデルランタイムが利用できません"
            )));
        };

        info!("[Loader] モデル読み込み開始: {}", path.display());

        // パニックもスレッド内で捕捉し、ランタイムは必ず呼び出し側へ返す
        let joined = task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.load_file(&path)))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!(
                        "読み込み中に異常終了しました: {}",
                        panic_message(payload.as_ref())
                    ))
                });
            (runtime, result)
        })
        .await;

        let (runtime, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                // キャンセル時のみ到達。ランタイムは失われる
                self.set_state(LoadState::Failed);
                return Err(LoadingError::ModelLoadFailure(anyhow::anyhow!(
                    "読み込みスレッドの異常終了: {}",
                    e
                )));
            }
        };

        match result {
            Ok(()) => {
                let _ = self.handle.set(ModelHandle {
                    runtime: Arc::from(runtime),
                });
                self.set_state(LoadState::Loaded);
                info!("[Loader] モデル読み込み完了: {}", model_name);
                Ok(())
            }
            Err(e) => {
                warn!("[Loader] モデル読み込み失敗: {:#}", e);
                *pending = Some(runtime);
                self.set_state(LoadState::Failed);
                Err(LoadingError::ModelLoadFailure(e))
            }
        }
    }

    /// 設定のベース名でモデルが存在するか
    pub fn model_exists(&self, model_name: &str) -> bool {
        self.settings.model_path(model_name).is_file()
    }

    fn set_state(&self, state: LoadState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::batch::BatchBuffer;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRuntime {
        loads: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl ModelRuntime for CountingRuntime {
        fn load_file(&mut self, _path: &Path) -> anyhow::Result<()> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            if attempt < self.fail_first {
                anyhow::bail!("corrupt model file");
            }
            Ok(())
        }

        fn predict_batch(&self, _batch: &BatchBuffer, _image_count: usize) -> anyhow::Result<Option<Vec<Vec<f32>>>> {
            Ok(None)
        }
    }

    /// 最初の読み込みだけパニックするランタイム
    struct PanicOnceRuntime {
        loads: Arc<AtomicUsize>,
    }

    impl ModelRuntime for PanicOnceRuntime {
        fn load_file(&mut self, _path: &Path) -> anyhow::Result<()> {
            if self.loads.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("weights buffer overrun");
            }
            Ok(())
        }

        fn predict_batch(&self, _batch: &BatchBuffer, _image_count: usize) -> anyhow::Result<Option<Vec<Vec<f32>>>> {
            Ok(None)
        }
    }

    fn setup(fail_first: usize) -> (tempfile::TempDir, ModelLoader, Arc<AtomicUsize>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mobile_model.tar.gz"), b"weights").unwrap();

        let settings = ModelSettings {
            resource_dir: dir.path().to_path_buf(),
            ..ModelSettings::default()
        };
        let loads = Arc::new(AtomicUsize::new(0));
        let runtime = CountingRuntime {
            loads: loads.clone(),
            fail_first,
        };
        (dir, ModelLoader::new(settings, Box::new(runtime)), loads)
    }

    #[tokio::test]
    async fn test_load_success() {
        let (_dir, loader, loads) = setup(0);
        assert_eq!(loader.state(), LoadState::Unloaded);
        assert!(matches!(loader.handle(), Err(PredictionError::NotLoaded)));

        loader.load("mobile_model").await.unwrap();
        assert_eq!(loader.state(), LoadState::Loaded);
        assert!(loader.handle().is_ok());

        // 2回目は何もしない
        loader.load("mobile_model").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_not_found() {
        let (_dir, loader, loads) = setup(0);
        let err = loader.load("missing_model").await.unwrap_err();

        match err {
            LoadingError::ModelNotFound { name, path } => {
                assert_eq!(name, "missing_model");
                assert!(path.ends_with("missing_model.tar.gz"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(loader.state(), LoadState::Failed);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert!(!loader.model_exists("missing_model"));
        assert!(loader.model_exists("mobile_model"));
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let (_dir, loader, loads) = setup(1);

        let err = loader.load("mobile_model").await.unwrap_err();
        assert!(matches!(err, LoadingError::ModelLoadFailure(_)));
        assert_eq!(err.to_string(), "corrupt model file");
        assert_eq!(loader.state(), LoadState::Failed);
        assert!(!loader.is_loaded());

        loader.load("mobile_model").await.unwrap();
        assert_eq!(loader.state(), LoadState::Loaded);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_after_panic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mobile_model.tar.gz"), b"weights").unwrap();
        let settings = ModelSettings {
            resource_dir: dir.path().to_path_buf(),
            ..ModelSettings::default()
        };
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = ModelLoader::new(settings, Box::new(PanicOnceRuntime { loads: loads.clone() }));

        let err = loader.load("mobile_model").await.unwrap_err();
        assert!(matches!(err, LoadingError::ModelLoadFailure(_)));
        assert!(err.to_string().contains("weights buffer overrun"));
        assert_eq!(loader.state(), LoadState::Failed);
        assert!(matches!(loader.handle(), Err(PredictionError::NotLoaded)));

        // ランタイムは戻されているので再試行できる
        loader.load("mobile_model").await.unwrap();
        assert_eq!(loader.state(), LoadState::Loaded);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_are_serialized() {
        let (_dir, loader, loads) = setup(0);
        let loader = Arc::new(loader);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.load("mobile_model").await })
            })
            .collect();

        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.state(), LoadState::Loaded);
    }
}
