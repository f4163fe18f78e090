//! Effective configuration with provenance
//!
//! Records the merged configuration together with where each layer came
//! from, so the build summary can say exactly what a run was built with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::PipelineSettings;

/// Config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "topt-native.toml";

/// Variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "TOPT_NATIVE_CONFIG";

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Override,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Variables that contributed (env layer only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl ConfigSource {
    fn new(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
            keys: Vec::new(),
        }
    }
}

/// Merged configuration and its typed form
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,

    #[serde(skip)]
    pub settings: PipelineSettings,
}

impl EffectiveConfig {
    /// Merge every layer.
    ///
    /// `env` is a snapshot of the process environment; the config file is
    /// `TOPT_NATIVE_CONFIG` when set (and must then exist), otherwise
    /// `topt-native.toml` in `workdir` if present.
    pub fn build(
        workdir: &Path,
        env: &BTreeMap<String, String>,
        overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource::new(ConfigOrigin::Builtin)];

        let explicit = env
            .get(CONFIG_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .map(|p| crate::process::absolutize(workdir, Path::new(p)));
        let config_path = match explicit {
            Some(path) if !path.is_file() => return Err(ConfigError::MissingFile(path)),
            Some(path) => Some(path),
            None => Some(workdir.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        if let Some(path) = config_path {
            let (value, digest) = load_toml_file(&path)?;
            layers.push(value);
            sources.push(ConfigSource {
                path: Some(path.display().to_string()),
                digest: Some(digest),
                ..ConfigSource::new(ConfigOrigin::File)
            });
        }

        let (value, keys) = env_layer(env)?;
        if !keys.is_empty() {
            layers.push(value);
            sources.push(ConfigSource {
                keys,
                ..ConfigSource::new(ConfigOrigin::Env)
            });
        }

        if let Some(overrides) = overrides {
            layers.push(overrides);
            sources.push(ConfigSource::new(ConfigOrigin::Override));
        }

        let config = merge_layers(layers);
        let settings: PipelineSettings = serde_json::from_value(config.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if settings.source.branch.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.branch must not be empty".to_string(),
            ));
        }
        settings.target_keys()?;

        Ok(Self {
            created_at: Utc::now(),
            config,
            sources,
            settings,
        })
    }
}

/// Load a TOML file, returning its JSON form and the SHA-256 of its bytes
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let table: toml::Table = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
    let value = serde_json::to_value(table)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
    Ok((value, digest))
}

fn split_list(value: &str, separator: impl Fn(char) -> bool) -> Value {
    Value::Array(
        value
            .split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    )
}

fn set_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            root.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let child = root
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

/// Environment layer: the value to merge and the variables that contributed
pub fn env_layer(env: &BTreeMap<String, String>) -> Result<(Value, Vec<String>), ConfigError> {
    let mut root = Map::new();
    let mut keys = Vec::new();

    let mappings: [(&str, &[&str]); 4] = [
        ("TOPT_NATIVE_OUTPUT_DIR", &["output", "dir"]),
        ("TOPT_NATIVE_SOURCE_DIR", &["source", "checkout_dir"]),
        ("TOPT_NATIVE_SOURCE_BRANCH", &["source", "branch"]),
        ("TOPT_NATIVE_SOURCE_URL", &["source", "remote_url"]),
    ];
    for (var, path) in mappings {
        if let Some(value) = env.get(var).filter(|v| !v.trim().is_empty()) {
            set_path(&mut root, path, Value::String(value.trim().to_string()));
            keys.push(var.to_string());
        }
    }

    if let Some(value) = env.get("TOPT_NATIVE_TARGETS").filter(|v| !v.trim().is_empty()) {
        set_path(&mut root, &["targets"], split_list(value, |c| c == ','));
        keys.push("TOPT_NATIVE_TARGETS".to_string());
    }

    if let Some(value) = env.get("TOPT_NATIVE_FAILURE_POLICY").filter(|v| !v.trim().is_empty()) {
        let policy = value.trim().to_ascii_lowercase();
        if policy != "abort" && policy != "continue" {
            return Err(ConfigError::ValidationError(format!(
                "TOPT_NATIVE_FAILURE_POLICY must be abort or continue, got {}",
                value
            )));
        }
        set_path(&mut root, &["failure_policy"], Value::String(policy));
        keys.push("TOPT_NATIVE_FAILURE_POLICY".to_string());
    }

    if let Some(value) = env.get("TOPT_NATIVE_MODE").filter(|v| !v.trim().is_empty()) {
        let mode = value.trim().to_ascii_lowercase();
        if mode != "ci" && mode != "localdev" {
            return Err(ConfigError::ValidationError(format!(
                "TOPT_NATIVE_MODE must be ci or localdev, got {}",
                value
            )));
        }
        set_path(&mut root, &["output", "mode"], Value::String(mode));
        keys.push("TOPT_NATIVE_MODE".to_string());
    }

    for (var, field) in [("CGO_CFLAGS", "cflags"), ("CGO_LDFLAGS", "ldflags")] {
        if let Some(value) = env.get(var).filter(|v| !v.trim().is_empty()) {
            set_path(&mut root, &["flags", field], split_list(value, char::is_whitespace));
            keys.push(var.to_string());
        }
    }

    Ok((Value::Object(root), keys))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("config file {0} does not exist")]
    MissingFile(PathBuf),
}
