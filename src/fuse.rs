//! Multi-architecture fusion (macOS)
//!
//! Two single-architecture outputs of the same link mode become one
//! universal binary in the logical output directory. The per-architecture
//! directories are removed only after the fused binary verifies and carries
//! a slice for each input.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use object::read::macho::{FatArch, MachOFatFile32, MachOFatFile64};
use object::{Architecture, FileKind};
use tracing::info;

use topt_target::{Arch, BuildTarget, TargetKey};

use crate::artifact::{
    consume, verify_binary, BinaryKind, BuildArtifact, IntegrityError, UniversalArtifact,
};
use crate::process::{CommandRunner, Invocation, ProcessError};

/// Fusion errors
#[derive(Debug, thiserror::Error)]
pub enum FuseError {
    #[error("cannot fuse {0} with {1}: expected one arm64 and one x64 build of the same OS and link mode")]
    Mismatched(TargetKey, TargetKey),

    #[error("headers differ between {0} and {1}")]
    HeaderMismatch(TargetKey, TargetKey),

    #[error("lipo failed: {0}")]
    Lipo(#[from] ProcessError),

    #[error("fused binary failed verification: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("fused binary {path} has no {missing} slice")]
    MissingSlice { path: PathBuf, missing: Arch },

    #[error("cannot read slices of {path}: {message}")]
    Slices { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

pub struct Fuser<'a> {
    runner: &'a dyn CommandRunner,
    lipo: PathBuf,
}

impl<'a> Fuser<'a> {
    pub fn new(runner: &'a dyn CommandRunner, lipo: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            lipo: lipo.into(),
        }
    }

    /// Fuse two sibling artifacts into `output_root/<logical name>`.
    pub fn fuse(
        &self,
        artifacts: [&BuildArtifact; 2],
        output_root: &Path,
    ) -> Result<UniversalArtifact, FuseError> {
        let [first, second] = artifacts;
        let (a, b) = (first.key(), second.key());
        if a.os != b.os || a.link_mode != b.link_mode || a.arch == b.arch || !a.needs_fusion() {
            return Err(FuseError::Mismatched(a, b));
        }
        if fs::read(&first.header_path)? != fs::read(&second.header_path)? {
            return Err(FuseError::HeaderMismatch(a, b));
        }

        let target: &BuildTarget = &first.target;
        let out_dir = output_root.join(a.logical_name());
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir)?;
        }
        fs::create_dir_all(&out_dir)?;
        let binary_path = out_dir.join(target.binary_file_name());
        let header_path = out_dir.join(target.header_file_name());

        self.runner.run(
            &Invocation::new(&self.lipo)
                .arg("-create")
                .arg(&first.binary_path)
                .arg(&second.binary_path)
                .arg("-output")
                .arg(&binary_path),
        )?;
        fs::copy(&first.header_path, &header_path)?;

        let verified = verify_binary(&binary_path, BinaryKind::universal())?;
        let slices = fs::read(&binary_path)
            .map_err(FuseError::from)
            .and_then(|data| {
                slice_architectures(&data).map_err(|e| FuseError::Slices {
                    path: binary_path.clone(),
                    message: e.to_string(),
                })
            })?;
        for arch in [a.arch, b.arch] {
            if !slices.contains(&object_architecture(arch)) {
                return Err(FuseError::MissingSlice {
                    path: binary_path,
                    missing: arch,
                });
            }
        }
        info!(
            output = %binary_path.display(),
            size = verified.size(),
            "fused {} and {}",
            a,
            b
        );
        consume(&verified, &[first.output_dir(), second.output_dir()])?;

        Ok(UniversalArtifact {
            os: a.os,
            link_mode: a.link_mode,
            binary_path,
            header_path,
        })
    }
}

fn object_architecture(arch: Arch) -> Architecture {
    match arch {
        Arch::Amd64 => Architecture::X86_64,
        Arch::Arm64 => Architecture::Aarch64,
    }
}

/// Architectures of the slices in a universal binary
fn slice_architectures(data: &[u8]) -> object::Result<Vec<Architecture>> {
    Ok(match FileKind::parse(data)? {
        FileKind::MachOFat64 => MachOFatFile64::parse(data)?
            .arches()
            .iter()
            .map(FatArch::architecture)
            .collect(),
        _ => MachOFatFile32::parse(data)?
            .arches()
            .iter()
            .map(FatArch::architecture)
            .collect(),
    })
}
