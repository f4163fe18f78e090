//! Operating systems, architectures and link modes
//!
//! Each enum carries two spellings: the logical one used in output
//! directory and release asset names (`macos`, `x64`) and the one the Go
//! toolchain expects in `GOOS`/`GOARCH` (`darwin`, `amd64`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors for platform parsing and host detection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("unsupported operating system: {0}")]
    UnsupportedOs(String),

    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    #[error("unknown link mode: {0}")]
    UnknownLinkMode(String),

    #[error("invalid target key '{0}' (expected <os>-<arch>-<static|dynamic>)")]
    InvalidTargetKey(String),
}

/// Target operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Macos,
    Ios,
    Windows,
    Android,
}

impl Os {
    pub const ALL: [Os; 5] = [Os::Linux, Os::Macos, Os::Ios, Os::Windows, Os::Android];

    /// Logical name used in output directories and release assets
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Macos => "macos",
            Os::Ios => "ios",
            Os::Windows => "windows",
            Os::Android => "android",
        }
    }

    /// Value for `GOOS`
    pub fn go_os(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Macos => "darwin",
            Os::Ios => "ios",
            Os::Windows => "windows",
            Os::Android => "android",
        }
    }

    /// Detect the operating system this process runs on
    pub fn host() -> Result<Os, PlatformError> {
        Self::from_rust_os(std::env::consts::OS)
    }

    /// Map a Rust `target_os` value (as in `std::env::consts::OS`)
    pub fn from_rust_os(os: &str) -> Result<Os, PlatformError> {
        match os {
            "linux" => Ok(Os::Linux),
            "macos" => Ok(Os::Macos),
            "ios" => Ok(Os::Ios),
            "windows" => Ok(Os::Windows),
            "android" => Ok(Os::Android),
            other => Err(PlatformError::UnsupportedOs(other.to_string())),
        }
    }

    pub fn is_apple(&self) -> bool {
        matches!(self, Os::Macos | Os::Ios)
    }

    /// File name prefix for libraries (`lib` everywhere except Windows)
    pub fn library_prefix(&self) -> &'static str {
        match self {
            Os::Windows => "",
            _ => "lib",
        }
    }

    /// Extension of a static archive for this OS
    pub fn static_extension(&self) -> &'static str {
        match self {
            Os::Windows => "lib",
            _ => "a",
        }
    }

    /// Extension of a shared library for this OS
    pub fn dynamic_extension(&self) -> &'static str {
        match self {
            Os::Windows => "dll",
            Os::Macos | Os::Ios => "dylib",
            Os::Linux | Os::Android => "so",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Os {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "macos" | "darwin" | "osx" => Ok(Os::Macos),
            "ios" => Ok(Os::Ios),
            "windows" | "win" => Ok(Os::Windows),
            "android" => Ok(Os::Android),
            other => Err(PlatformError::UnsupportedOs(other.to_string())),
        }
    }
}

/// Target CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::Amd64, Arch::Arm64];

    /// Logical name used in output directories and release assets
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Value for `GOARCH`
    pub fn go_arch(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Value for clang's `-arch` flag
    pub fn clang_arch(&self) -> &'static str {
        match self {
            Arch::Amd64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }

    /// The other architecture (used to find fusion siblings)
    pub fn sibling(&self) -> Arch {
        match self {
            Arch::Amd64 => Arch::Arm64,
            Arch::Arm64 => Arch::Amd64,
        }
    }

    /// Detect the architecture this process runs on
    pub fn host() -> Result<Arch, PlatformError> {
        Self::from_rust_arch(std::env::consts::ARCH)
    }

    /// Map a Rust `target_arch` value (as in `std::env::consts::ARCH`)
    pub fn from_rust_arch(arch: &str) -> Result<Arch, PlatformError> {
        match arch {
            "x86_64" => Ok(Arch::Amd64),
            "aarch64" => Ok(Arch::Arm64),
            other => Err(PlatformError::UnsupportedArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x64" | "amd64" | "x86_64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(PlatformError::UnsupportedArch(other.to_string())),
        }
    }
}

/// How the consumer links the library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Archive linked into the consumer at build time
    Static,
    /// Shared library loaded at runtime
    Dynamic,
}

impl LinkMode {
    pub const ALL: [LinkMode; 2] = [LinkMode::Static, LinkMode::Dynamic];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMode::Static => "static",
            LinkMode::Dynamic => "dynamic",
        }
    }

    /// Value for `go build -buildmode=`
    pub fn go_buildmode(&self) -> &'static str {
        match self {
            LinkMode::Static => "c-archive",
            LinkMode::Dynamic => "c-shared",
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMode {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(LinkMode::Static),
            "dynamic" | "shared" => Ok(LinkMode::Dynamic),
            other => Err(PlatformError::UnknownLinkMode(other.to_string())),
        }
    }
}
