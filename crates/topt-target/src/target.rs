//! Build targets and the names derived from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::platform::{Arch, LinkMode, Os, PlatformError};

/// Base name of the library (`libtestoptimization.a`, `testoptimization.dll`)
pub const LIBRARY_NAME: &str = "testoptimization";

/// Name fragment shared by every logical output directory and release asset
pub const ARTIFACT_STEM: &str = "libtestoptimization";

/// Go build tag that selects the native-export code paths
pub const BUILD_TAG: &str = "civisibility_native";

/// Minimum macOS version passed to clang
pub const MACOS_MIN_VERSION: &str = "11.0";

/// Minimum iOS version passed to clang
pub const IOS_MIN_VERSION: &str = "13.0";

/// Identity of one (os, arch, link mode) combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub os: Os,
    pub arch: Arch,
    pub link_mode: LinkMode,
}

impl TargetKey {
    pub fn new(os: Os, arch: Arch, link_mode: LinkMode) -> Self {
        Self { os, arch, link_mode }
    }

    /// Whether this target's output is fused with its sibling architecture
    pub fn needs_fusion(&self) -> bool {
        self.os == Os::Macos
    }

    /// Name of the directory (and release asset) consumers see.
    ///
    /// Apple platforms ship one universal or single-architecture output per
    /// link mode, so their names carry no architecture.
    pub fn logical_name(&self) -> String {
        if self.os.is_apple() {
            format!("{}-{}-{}", self.os, ARTIFACT_STEM, self.link_mode)
        } else {
            format!("{}-{}-{}-{}", self.os, self.arch, ARTIFACT_STEM, self.link_mode)
        }
    }

    /// Directory the builder writes this target into.
    ///
    /// Same as the logical name except for targets that are fused later,
    /// which need one directory per architecture.
    pub fn output_dir_name(&self) -> String {
        if self.needs_fusion() {
            format!("{}-{}-{}-{}", self.os, self.arch, ARTIFACT_STEM, self.link_mode)
        } else {
            self.logical_name()
        }
    }

    /// Key of the same target on the other architecture
    pub fn sibling(&self) -> TargetKey {
        TargetKey::new(self.os, self.arch.sibling(), self.link_mode)
    }

    /// File name stem of the compiled library
    pub fn output_name(&self) -> String {
        format!("{}{}", self.os.library_prefix(), LIBRARY_NAME)
    }

    /// Extension of the compiled library
    pub fn file_extension(&self) -> &'static str {
        match self.link_mode {
            LinkMode::Static => self.os.static_extension(),
            LinkMode::Dynamic => self.os.dynamic_extension(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.os, self.arch, self.link_mode)
    }
}

impl FromStr for TargetKey {
    type Err = PlatformError;

    /// Parse `linux-x64-static`; `ios-static` is accepted since iOS is arm64 only
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlatformError::InvalidTargetKey(s.to_string());
        let parts: Vec<&str> = s.trim().split('-').collect();
        match parts.as_slice() {
            [os, arch, mode] => Ok(TargetKey::new(
                os.parse().map_err(|_| invalid())?,
                arch.parse().map_err(|_| invalid())?,
                mode.parse().map_err(|_| invalid())?,
            )),
            [os, mode] if os.eq_ignore_ascii_case("ios") => Ok(TargetKey::new(
                Os::Ios,
                Arch::Arm64,
                mode.parse().map_err(|_| invalid())?,
            )),
            _ => Err(invalid()),
        }
    }
}

/// One compiler invocation: everything needed to build a single target.
///
/// Created by the target matrix and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub os: Os,
    pub arch: Arch,
    pub link_mode: LinkMode,

    /// Library file stem (`libtestoptimization`, `testoptimization`)
    pub output_name: String,

    /// Arguments to `go` (starting with `build`)
    pub compile_flags: Vec<String>,

    /// Flags for the C compiler (`CGO_CFLAGS`)
    pub c_flags: Vec<String>,

    /// Flags for the C linker (`CGO_LDFLAGS`)
    pub link_flags: Vec<String>,

    /// Extension of the compiled library (`a`, `lib`, `so`, `dylib`, `dll`)
    pub file_extension: String,
}

impl BuildTarget {
    /// Define the target for a key with its platform flags
    pub fn new(key: TargetKey) -> Self {
        let compile_flags = vec![
            "build".to_string(),
            format!("-buildmode={}", key.link_mode.go_buildmode()),
            "-tags".to_string(),
            BUILD_TAG.to_string(),
            "-trimpath".to_string(),
            // Strip DWARF and the symbol table from the Go side
            "-ldflags".to_string(),
            "-s -w".to_string(),
            // Inlining can elide exported wrappers
            "-gcflags".to_string(),
            "all=-l".to_string(),
        ];

        let (c_flags, link_flags) = match key.os {
            Os::Macos => {
                let flags = vec![
                    "-arch".to_string(),
                    key.arch.clang_arch().to_string(),
                    format!("-mmacosx-version-min={}", MACOS_MIN_VERSION),
                ];
                let mut c_flags = vec!["-O2".to_string()];
                c_flags.extend(flags.iter().cloned());
                (c_flags, flags)
            }
            Os::Ios => {
                let flags = vec![
                    "-arch".to_string(),
                    key.arch.clang_arch().to_string(),
                    format!("-miphoneos-version-min={}", IOS_MIN_VERSION),
                ];
                let mut c_flags = vec!["-O2".to_string()];
                c_flags.extend(flags.iter().cloned());
                (c_flags, flags)
            }
            Os::Windows => (vec!["-O2".to_string()], vec!["-static-libgcc".to_string()]),
            Os::Linux | Os::Android => (vec!["-O2".to_string()], Vec::new()),
        };

        Self {
            os: key.os,
            arch: key.arch,
            link_mode: key.link_mode,
            output_name: key.output_name(),
            compile_flags,
            c_flags,
            link_flags,
            file_extension: key.file_extension().to_string(),
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.os, self.arch, self.link_mode)
    }

    /// `libtestoptimization.a`, `testoptimization.dll`, ...
    pub fn binary_file_name(&self) -> String {
        format!("{}.{}", self.output_name, self.file_extension)
    }

    /// Header generated next to the binary by the Go toolchain
    pub fn header_file_name(&self) -> String {
        format!("{}.h", self.output_name)
    }

    pub fn output_dir_name(&self) -> String {
        self.key().output_dir_name()
    }

    pub fn logical_name(&self) -> String {
        self.key().logical_name()
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key(), f)
    }
}
