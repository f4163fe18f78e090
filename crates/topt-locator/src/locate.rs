//! Native library lookup as performed by the SDKs
//!
//! Order: explicit search path, then local development output, then the
//! packaged release asset.

use std::path::{Path, PathBuf};

use topt_target::{Arch, LinkMode, Os, TargetKey};

use crate::LocatorError;

/// Directory holding an extracted library, overriding every other lookup
pub const NATIVE_SEARCH_PATH_ENV: &str = "TEST_OPTIMIZATION_SDK_NATIVE_SEARCH_PATH";

/// Set to skip downloading the release asset
pub const SKIP_NATIVE_INSTALL_ENV: &str = "TEST_OPTIMIZATION_SDK_SKIP_NATIVE_INSTALL";

/// Set to resolve against the local build output instead of a release
pub const DEV_MODE_ENV: &str = "TEST_OPTIMIZATION_DEV_MODE";

/// Root of the local build output in development mode
pub const DEV_OUTPUT_DIR_ENV: &str = "TEST_OPTIMIZATION_DEV_OUTPUT_DIR";

/// Default root of the local build output
pub const DEFAULT_DEV_OUTPUT_DIR: &str = "output";

/// Release download prefix; the asset name is appended
pub const RELEASE_URL_PREFIX: &str =
    "https://github.com/DataDog/test-optimization-native/releases/download/v0.0.2-preview/";

/// File name of the library for an OS and link mode
pub fn library_file_name(os: Os, link_mode: LinkMode) -> String {
    let key = TargetKey::new(os, Arch::Amd64, link_mode);
    format!("{}.{}", key.output_name(), key.file_extension())
}

/// Release asset for a target (`linux-x64-libtestoptimization-static.zip`)
pub fn release_asset_name(key: &TargetKey) -> String {
    format!("{}.zip", key.logical_name())
}

/// Lookup-relevant environment, captured once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorEnv {
    pub search_path: Option<PathBuf>,
    pub dev_mode: bool,
    pub dev_output_dir: Option<PathBuf>,
    pub skip_install: bool,
}

impl LocatorEnv {
    /// Capture from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Capture from an arbitrary lookup (tests, build scripts with their own env)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            search_path: non_empty(NATIVE_SEARCH_PATH_ENV).map(PathBuf::from),
            dev_mode: non_empty(DEV_MODE_ENV).is_some_and(|v| is_truthy(&v)),
            dev_output_dir: non_empty(DEV_OUTPUT_DIR_ENV).map(PathBuf::from),
            skip_install: lookup(SKIP_NATIVE_INSTALL_ENV).is_some(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

/// Where the SDK should take the library from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeLocation {
    /// Extracted library found in the search path override
    SearchPath { dir: PathBuf, library: PathBuf },

    /// Release archive found in the search path override, needs extracting
    SearchPathArchive { dir: PathBuf, archive: PathBuf },

    /// Local build output directory (development mode)
    DevBuild { dir: PathBuf, library: PathBuf },

    /// Install explicitly skipped
    Skipped,

    /// Download the release asset
    Download { url: String, asset: String },
}

impl NativeLocation {
    /// Directory to hand to the linker or loader, if already on disk
    pub fn library_dir(&self) -> Option<&Path> {
        match self {
            NativeLocation::SearchPath { dir, .. } | NativeLocation::DevBuild { dir, .. } => {
                Some(dir)
            }
            _ => None,
        }
    }
}

/// Resolves the library location for one target
#[derive(Debug, Clone)]
pub struct Locator {
    key: TargetKey,
    release_url_prefix: String,
}

impl Locator {
    pub fn new(key: TargetKey) -> Self {
        Self {
            key,
            release_url_prefix: RELEASE_URL_PREFIX.to_string(),
        }
    }

    /// Locator for a Rust target triple (`aarch64-apple-darwin`)
    pub fn for_target_triple(triple: &str, link_mode: LinkMode) -> Result<Self, LocatorError> {
        let (os, arch) = parse_target_triple(triple)?;
        Ok(Self::new(TargetKey::new(os, arch, link_mode)))
    }

    pub fn with_release_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.release_url_prefix = prefix.into();
        self
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn library_file_name(&self) -> String {
        library_file_name(self.key.os, self.key.link_mode)
    }

    pub fn release_asset_name(&self) -> String {
        release_asset_name(&self.key)
    }

    pub fn release_url(&self) -> String {
        format!("{}{}", self.release_url_prefix, self.release_asset_name())
    }

    /// Local build output directory for this target under `output_root`
    pub fn dev_output_dir(&self, output_root: &Path) -> PathBuf {
        output_root.join(self.key.logical_name())
    }

    /// Decide where the library comes from
    pub fn resolve(&self, env: &LocatorEnv) -> NativeLocation {
        let library_name = self.library_file_name();

        if let Some(ref dir) = env.search_path {
            let library = dir.join(&library_name);
            if library.is_file() {
                return NativeLocation::SearchPath {
                    dir: dir.clone(),
                    library,
                };
            }
            let archive = dir.join(self.release_asset_name());
            if archive.is_file() {
                return NativeLocation::SearchPathArchive {
                    dir: dir.clone(),
                    archive,
                };
            }
        }

        if env.dev_mode {
            let root = env
                .dev_output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEV_OUTPUT_DIR));
            let dir = self.dev_output_dir(&root);
            let library = dir.join(&library_name);
            return NativeLocation::DevBuild { dir, library };
        }

        if env.skip_install {
            return NativeLocation::Skipped;
        }

        NativeLocation::Download {
            url: self.release_url(),
            asset: self.release_asset_name(),
        }
    }
}

/// Map a Rust target triple to the library's (os, arch)
pub fn parse_target_triple(triple: &str) -> Result<(Os, Arch), LocatorError> {
    let os = if triple.contains("apple-darwin") {
        Os::Macos
    } else if triple.contains("apple-ios") {
        Os::Ios
    } else if triple.contains("android") {
        Os::Android
    } else if triple.contains("windows") {
        Os::Windows
    } else if triple.contains("linux") {
        Os::Linux
    } else {
        return Err(LocatorError::UnsupportedTarget(triple.to_string()));
    };

    let arch = if triple.starts_with("aarch64") || triple.starts_with("arm64") {
        Arch::Arm64
    } else if triple.starts_with("x86_64") {
        Arch::Amd64
    } else {
        return Err(LocatorError::UnsupportedTarget(triple.to_string()));
    };

    Ok((os, arch))
}
