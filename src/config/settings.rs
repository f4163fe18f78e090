//! Typed view of the merged configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use topt_target::{Arch, Os, TargetKey, TargetMatrix};

use super::effective::ConfigError;

/// What happens to the remaining targets after one fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failed target
    #[default]
    Abort,
    /// Build every target and report all failures
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Continue => "continue",
        })
    }
}

/// Whether packaged directories are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageMode {
    /// Release build: a packaged directory is removed once its archive verifies
    #[default]
    Ci,
    /// Developer build: directories stay for direct linking
    Localdev,
}

impl PackageMode {
    pub fn keeps_directories(&self) -> bool {
        *self == PackageMode::Localdev
    }
}

impl fmt::Display for PackageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageMode::Ci => "ci",
            PackageMode::Localdev => "localdev",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub remote_url: String,
    pub branch: String,
    pub checkout_dir: String,
    pub native_subpath: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySettings {
    pub from: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub dir: String,
    pub mode: PackageMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressorSettings {
    pub version: String,
    pub url_template: String,

    /// Defaults to a per-user cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

/// Extra flags appended to every target's C compiler and linker flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSettings {
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub ldflags: Vec<String>,
}

/// Settings the pipeline runs with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub source: SourceSettings,
    pub overlay: OverlaySettings,
    pub output: OutputSettings,
    pub failure_policy: FailurePolicy,

    /// Target keys to build; empty means everything the host supports
    #[serde(default)]
    pub targets: Vec<String>,

    pub compressor: CompressorSettings,

    #[serde(default)]
    pub flags: FlagSettings,
}

impl PipelineSettings {
    /// Parsed target selection
    pub fn target_keys(&self) -> Result<Vec<TargetKey>, ConfigError> {
        self.targets
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| {
                t.parse::<TargetKey>()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))
            })
            .collect()
    }

    /// Targets for this run: the host matrix, narrowed to the configured keys.
    ///
    /// Local development builds only the host architecture, except on macOS
    /// where both architectures are needed for the universal binary.
    pub fn matrix(&self, host: Os, host_arch: Arch) -> Result<TargetMatrix, ConfigError> {
        let base = match self.output.mode {
            PackageMode::Ci => TargetMatrix::for_host(host),
            PackageMode::Localdev => TargetMatrix::local_dev(host, host_arch),
        };
        let keys = self.target_keys()?;
        if keys.is_empty() {
            return Ok(base);
        }
        if let Some(unsupported) = keys.iter().find(|k| !base.contains(k)) {
            return Err(ConfigError::ValidationError(format!(
                "target {} cannot be built on a {} host in {} mode",
                unsupported, host, self.output.mode
            )));
        }
        Ok(base.retain_keys(&keys))
    }

    pub fn output_root(&self, workdir: &Path) -> PathBuf {
        crate::process::absolutize(workdir, Path::new(&self.output.dir))
    }

    pub fn checkout_path(&self, workdir: &Path) -> PathBuf {
        crate::process::absolutize(workdir, Path::new(&self.source.checkout_dir))
    }

    pub fn overlay_path(&self, workdir: &Path) -> PathBuf {
        crate::process::absolutize(workdir, Path::new(&self.overlay.from))
    }

    /// Compressor cache directory, falling back to the user's cache location
    pub fn compressor_cache_dir(&self, workdir: &Path) -> PathBuf {
        if let Some(ref dir) = self.compressor.cache_dir {
            return crate::process::absolutize(workdir, Path::new(dir));
        }
        let user_cache = std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("LOCALAPPDATA").map(PathBuf::from))
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")));
        match user_cache {
            Some(dir) => dir.join("topt-native"),
            None => workdir.join(".cache").join("topt-native"),
        }
    }
}
