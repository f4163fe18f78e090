//! Build outputs and their packaged form
//!
//! A [`BuildArtifact`] is one target's binary and header in its output
//! directory. Fusion turns two macOS artifacts into a [`UniversalArtifact`];
//! packaging turns any output directory into a [`PackagedArtifact`].

mod integrity;
mod package;

pub use integrity::{consume, verify_binary, BinaryKind, IntegrityError, Verified};
pub use package::{
    digest_line, read_digest_file, remove_stale_package, sha256_file, verify_package, Packager,
    PackagingError, DIGEST_EXTENSION, ZIP_EXTENSION,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use topt_target::{BuildTarget, LinkMode, Os, TargetKey};

/// Output of one successful target build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub target: BuildTarget,
    pub binary_path: PathBuf,
    pub header_path: PathBuf,
}

impl BuildArtifact {
    pub fn key(&self) -> TargetKey {
        self.target.key()
    }

    /// Directory holding the binary and header
    pub fn output_dir(&self) -> &Path {
        self.binary_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Fused multi-architecture library for one Apple link mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalArtifact {
    pub os: Os,
    pub link_mode: LinkMode,
    pub binary_path: PathBuf,
    pub header_path: PathBuf,
}

impl UniversalArtifact {
    pub fn output_dir(&self) -> &Path {
        self.binary_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Release archive and its digest file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedArtifact {
    /// Directory name the archive was made from (the logical output name)
    pub name: String,
    pub archive_path: PathBuf,
    pub digest_path: PathBuf,

    /// Hex SHA-256 of the archive
    pub sha256: String,
}
