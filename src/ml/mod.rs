pub mod normalizer;
pub mod batch;
pub mod inference;
pub mod runtime;
#[cfg(feature = "ml")]
pub mod ml_model;

pub use normalizer::{normalize, ImageNormalizer, NormalizedTensor, IMAGE_SIZE, IMAGENET_MEAN, IMAGENET_STD};
pub use batch::{assemble, BatchBuffer};
pub use inference::{softmax, InferenceAdapter};
pub use runtime::ModelRuntime;
#[cfg(feature = "ml")]
pub use runtime::{BurnModelRuntime, CpuModelRuntime, GpuModelRuntime};
#[cfg(feature = "ml")]
pub use ml_model::{ModelConfig, MoleClassifier};
