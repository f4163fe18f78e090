//! Toolchain resolution
//!
//! Locates every external tool the pipeline needs. Lookup order for each tool:
//! - An explicit environment override (`AR`, `OBJCOPY`, ...)
//! - Well-known installation directories for the host
//! - `PATH`
//!
//! Candidate names are tried in order within each stage, so `llvm-objcopy`
//! is preferred but `objcopy` is accepted when it is the only one present.

pub mod compressor;
pub mod platform;

use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use topt_target::Os;

pub use compressor::{CompressorCache, CompressorError, Fetch, HttpFetcher};
pub use platform::{
    for_host, ArchiveTools, CompilerSetup, LinuxToolchain, MacToolchain, PlatformToolchain,
    WindowsToolchain,
};

/// External tools the pipeline drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Go,
    CCompiler,
    Archiver,
    Ranlib,
    ObjCopy,
    Strip,
    Lipo,
    Compressor,
    Git,
    Xcrun,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Go => "go",
            Tool::CCompiler => "c compiler",
            Tool::Archiver => "archiver",
            Tool::Ranlib => "ranlib",
            Tool::ObjCopy => "objcopy",
            Tool::Strip => "strip",
            Tool::Lipo => "lipo",
            Tool::Compressor => "upx",
            Tool::Git => "git",
            Tool::Xcrun => "xcrun",
        }
    }

    /// Environment variable that names the tool explicitly
    pub fn env_override(&self) -> &'static str {
        match self {
            Tool::Go => "TOPT_NATIVE_GO",
            Tool::CCompiler => "CC",
            Tool::Archiver => "AR",
            Tool::Ranlib => "RANLIB",
            Tool::ObjCopy => "OBJCOPY",
            Tool::Strip => "STRIP",
            Tool::Lipo => "LIPO",
            Tool::Compressor => "UPX",
            Tool::Git => "TOPT_NATIVE_GIT",
            Tool::Xcrun => "TOPT_NATIVE_XCRUN",
        }
    }

    /// Executable names tried, most preferred first
    pub fn default_candidates(&self) -> &'static [&'static str] {
        match self {
            Tool::Go => &["go"],
            Tool::CCompiler => &["cc", "gcc", "clang"],
            Tool::Archiver => &["llvm-ar", "ar"],
            Tool::Ranlib => &["llvm-ranlib", "ranlib"],
            Tool::ObjCopy => &["llvm-objcopy", "objcopy", "x86_64-w64-mingw32-objcopy"],
            Tool::Strip => &["strip", "llvm-strip"],
            Tool::Lipo => &["lipo", "llvm-lipo"],
            Tool::Compressor => &["upx"],
            Tool::Git => &["git"],
            Tool::Xcrun => &["xcrun"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to look for when resolving a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool: Tool,

    /// Executable names, most preferred first
    pub candidates: Vec<String>,

    /// Override variables, checked in order
    pub env_vars: Vec<String>,

    /// Directories searched before the well-known ones (an NDK's bin dir)
    pub extra_dirs: Vec<PathBuf>,
}

impl ToolRequest {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            candidates: tool
                .default_candidates()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            env_vars: vec![tool.env_override().to_string()],
            extra_dirs: Vec::new(),
        }
    }

    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Check `name` before the existing override variables
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_vars.insert(0, name.into());
        self
    }

    pub fn with_extra_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_dirs.push(dir.into());
        self
    }
}

/// Where a resolved tool came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Environment,
    WellKnown,
    Path,
    Cache,
}

/// A tool found on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTool {
    pub tool: Tool,
    pub path: PathBuf,
    pub source: ToolSource,
}

/// Toolchain resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} not found (tried {}; searched {})", .candidates.join(", "), display_paths(.searched))]
    ToolNotFound {
        tool: Tool,
        candidates: Vec<String>,
        searched: Vec<PathBuf>,
    },

    #[error("{var}={value} does not name an executable for {tool}")]
    InvalidOverride {
        tool: Tool,
        var: String,
        value: String,
    },

    #[error("{tool} query failed: {message}")]
    Query { tool: Tool, message: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves tools against a snapshot of the environment.
///
/// The snapshot is taken once; later changes to the process environment are
/// not observed.
#[derive(Debug, Clone, Default)]
pub struct ToolResolver {
    env: BTreeMap<String, String>,
    well_known: Vec<PathBuf>,
    path_dirs: Vec<PathBuf>,
}

impl ToolResolver {
    /// Snapshot the process environment with the host's well-known directories
    pub fn for_host(host: Os) -> Self {
        let env: BTreeMap<String, String> = env::vars().collect();
        let path_dirs = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect())
            .unwrap_or_default();
        Self {
            env,
            well_known: well_known_dirs(host),
            path_dirs,
        }
    }

    /// A resolver that only sees `path_dirs` and no environment
    pub fn isolated(path_dirs: Vec<PathBuf>) -> Self {
        Self {
            env: BTreeMap::new(),
            well_known: Vec::new(),
            path_dirs,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_well_known(mut self, dirs: Vec<PathBuf>) -> Self {
        self.well_known = dirs;
        self
    }

    /// Value of a variable in the snapshot (empty counts as unset)
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve(&self, request: &ToolRequest) -> Result<ResolvedTool, ToolError> {
        let found = |path: PathBuf, source: ToolSource| ResolvedTool {
            tool: request.tool,
            path,
            source,
        };

        for var in &request.env_vars {
            let Some(value) = self.env_var(var) else {
                continue;
            };
            let named = Path::new(value);
            if named.components().count() > 1 {
                if named.is_file() {
                    return Ok(found(named.to_path_buf(), ToolSource::Environment));
                }
            } else if let Some(path) = self.find_anywhere(request, value) {
                return Ok(found(path, ToolSource::Environment));
            }
            return Err(ToolError::InvalidOverride {
                tool: request.tool,
                var: var.clone(),
                value: value.to_string(),
            });
        }

        let mut preferred = request.extra_dirs.clone();
        preferred.extend(self.well_known.iter().cloned());
        for candidate in &request.candidates {
            if let Some(path) = find_in(&preferred, candidate) {
                return Ok(found(path, ToolSource::WellKnown));
            }
        }

        for candidate in &request.candidates {
            if let Some(path) = find_in(&self.path_dirs, candidate) {
                return Ok(found(path, ToolSource::Path));
            }
        }

        let mut searched = preferred;
        searched.extend(self.path_dirs.iter().cloned());
        Err(ToolError::ToolNotFound {
            tool: request.tool,
            candidates: request.candidates.clone(),
            searched,
        })
    }

    /// Resolve with the tool's default candidates and override variable
    pub fn resolve_tool(&self, tool: Tool) -> Result<ResolvedTool, ToolError> {
        self.resolve(&ToolRequest::new(tool))
    }

    fn find_anywhere(&self, request: &ToolRequest, name: &str) -> Option<PathBuf> {
        find_in(&request.extra_dirs, name)
            .or_else(|| find_in(&self.well_known, name))
            .or_else(|| find_in(&self.path_dirs, name))
    }
}

fn find_in(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let first = dirs.first()?;
    let joined = env::join_paths(dirs).ok()?;
    which::which_in(name, Some(joined), first).ok()
}

/// Directories toolchains are commonly installed to, per host
pub fn well_known_dirs(host: Os) -> Vec<PathBuf> {
    let dirs: &[&str] = match host {
        Os::Macos => &[
            "/opt/homebrew/bin",
            "/opt/homebrew/opt/llvm/bin",
            "/usr/local/go/bin",
            "/usr/local/bin",
            "/Library/Developer/CommandLineTools/usr/bin",
        ],
        Os::Windows => &[
            r"C:\Program Files\Go\bin",
            r"C:\msys64\mingw64\bin",
            r"C:\Program Files\LLVM\bin",
            r"C:\ProgramData\chocolatey\bin",
        ],
        _ => &["/usr/local/go/bin", "/usr/lib/go/bin", "/usr/local/bin"],
    };
    dirs.iter().map(PathBuf::from).collect()
}
