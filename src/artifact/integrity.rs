//! Binary integrity checks and source consumption
//!
//! Intermediate directories are only deleted through [`consume`], which
//! takes a [`Verified`] token that can only be produced by a successful
//! check of the derived artifact.

use object::FileKind;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use topt_target::{LinkMode, Os};

/// Smallest file `object` can classify
const MIN_CLASSIFIABLE_LEN: u64 = 16;

/// Kinds of binary the pipeline produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryKind {
    /// Unix `ar` archive (static libraries on every platform)
    Archive,
    Elf,
    MachO,
    /// Multi-architecture Mach-O
    MachOFat,
    Coff,
    Pe,
}

impl BinaryKind {
    /// Classify by magic bytes
    pub fn detect(data: &[u8]) -> Option<BinaryKind> {
        match FileKind::parse(data).ok()? {
            FileKind::Archive => Some(BinaryKind::Archive),
            FileKind::Elf32 | FileKind::Elf64 => Some(BinaryKind::Elf),
            FileKind::MachO32 | FileKind::MachO64 => Some(BinaryKind::MachO),
            FileKind::MachOFat32 | FileKind::MachOFat64 => Some(BinaryKind::MachOFat),
            FileKind::Coff | FileKind::CoffBig => Some(BinaryKind::Coff),
            FileKind::Pe32 | FileKind::Pe64 => Some(BinaryKind::Pe),
            _ => None,
        }
    }

    /// What a single-architecture build for `os` in `link_mode` must be
    pub fn expected_for(os: Os, link_mode: LinkMode) -> &'static [BinaryKind] {
        match (link_mode, os) {
            (LinkMode::Static, _) => &[BinaryKind::Archive],
            (LinkMode::Dynamic, Os::Linux | Os::Android) => &[BinaryKind::Elf],
            (LinkMode::Dynamic, Os::Macos | Os::Ios) => &[BinaryKind::MachO],
            (LinkMode::Dynamic, Os::Windows) => &[BinaryKind::Pe],
        }
    }

    /// What a fused macOS binary must be
    pub fn universal() -> &'static [BinaryKind] {
        &[BinaryKind::MachOFat]
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryKind::Archive => "ar archive",
            BinaryKind::Elf => "ELF",
            BinaryKind::MachO => "Mach-O",
            BinaryKind::MachOFat => "universal Mach-O",
            BinaryKind::Coff => "COFF object",
            BinaryKind::Pe => "PE image",
        })
    }
}

/// Integrity errors
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("{} is empty", .0.display())]
    Empty(PathBuf),

    #[error("{} is not a recognizable binary", .0.display())]
    Unrecognized(PathBuf),

    #[error("{} is a {found}, expected {}", .path.display(), display_kinds(.expected))]
    UnexpectedKind {
        path: PathBuf,
        found: BinaryKind,
        expected: Vec<BinaryKind>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

fn display_kinds(kinds: &[BinaryKind]) -> String {
    kinds
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Proof that a derived artifact passed its check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    path: PathBuf,
    size: u64,
    kind: Option<BinaryKind>,
}

impl Verified {
    pub(crate) fn new(path: PathBuf, size: u64, kind: Option<BinaryKind>) -> Self {
        Self { path, size, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Binary kind, when the artifact is a binary
    pub fn kind(&self) -> Option<BinaryKind> {
        self.kind
    }
}

/// Check that `path` is a non-empty binary of one of the `expected` kinds
pub fn verify_binary(path: &Path, expected: &[BinaryKind]) -> Result<Verified, IntegrityError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IntegrityError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.len() == 0 {
        return Err(IntegrityError::Empty(path.to_path_buf()));
    }
    if metadata.len() < MIN_CLASSIFIABLE_LEN {
        return Err(IntegrityError::Unrecognized(path.to_path_buf()));
    }

    let data = fs::read(path)?;
    let found = BinaryKind::detect(&data)
        .ok_or_else(|| IntegrityError::Unrecognized(path.to_path_buf()))?;
    if !expected.contains(&found) {
        return Err(IntegrityError::UnexpectedKind {
            path: path.to_path_buf(),
            found,
            expected: expected.to_vec(),
        });
    }
    Ok(Verified::new(path.to_path_buf(), metadata.len(), Some(found)))
}

/// Delete the directories a verified artifact was derived from
pub fn consume(derived: &Verified, sources: &[&Path]) -> io::Result<()> {
    for source in sources {
        if source.exists() {
            fs::remove_dir_all(source)?;
            info!(
                removed = %source.display(),
                derived = %derived.path().display(),
                "consumed intermediate output"
            );
        }
    }
    Ok(())
}
