//! Pipeline configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. `topt-native.toml` (or the file named by `TOPT_NATIVE_CONFIG`)
//! 3. `TOPT_NATIVE_*` and `CGO_*` environment variables
//! 4. Overrides supplied by the running binary

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{
    env_layer, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, CONFIG_FILE_NAME,
    CONFIG_PATH_ENV,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    CompressorSettings, FailurePolicy, FlagSettings, OutputSettings, OverlaySettings, PackageMode,
    PipelineSettings, SourceSettings,
};
