//! Data models: runtime configuration, model configs and artifact layout.

pub mod artifacts;
pub mod config;
pub mod model_config;

pub use artifacts::{ArtifactPaths, DefaultModel, Task};
pub use config::{
    DecodingConfig, ModelStoreConfig, QaConfig, RuntimeConfig, TokenClassificationConfig,
    TokenizationConfig, TranslationConfig, ZeroShotConfig,
};
pub use model_config::ModelConfig;
