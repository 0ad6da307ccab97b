pub mod model_metadata;
pub mod model_storage;
pub mod loader;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_artifact, load_model_artifact};
pub use loader::{LoadState, ModelHandle, ModelLoader};
pub use config::{AppConfig, DeviceType, InferenceSettings, ModelSettings};
