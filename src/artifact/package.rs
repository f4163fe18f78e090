//! Release packaging
//!
//! Each output directory becomes `<name>.zip` plus `<name>.zip.sha256sum`
//! next to it. Entries are sorted and timestamps normalized so identical
//! inputs produce identical archives.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use tracing::{debug, info};

use super::integrity::{consume, Verified};
use super::PackagedArtifact;
use crate::config::PackageMode;

pub const ZIP_EXTENSION: &str = "zip";

/// Suffix of the digest file, appended to the archive name
pub const DIGEST_EXTENSION: &str = "sha256sum";

/// Packaging errors
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("artifact directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("artifact directory {} contains no files", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("digest {} already exists and is never overwritten", .0.display())]
    DigestExists(PathBuf),

    #[error("zip error for {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {} failed verification: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("digest mismatch for {}: recorded {expected}, computed {actual}", .archive.display())]
    DigestMismatch {
        archive: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("malformed digest file {}", .0.display())]
    MalformedDigest(PathBuf),

    #[error("walking artifact directory failed: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Streaming SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// One line in `sha256sum` format
pub fn digest_line(sha256: &str, file_name: &str) -> String {
    format!("{}  {}\n", sha256, file_name)
}

/// Parse a digest file into (hex digest, file name)
pub fn read_digest_file(path: &Path) -> Result<(String, String), PackagingError> {
    let contents = fs::read_to_string(path)?;
    let line = contents.lines().next().unwrap_or_default();
    let mut parts = line.splitn(2, char::is_whitespace);
    let digest = parts.next().unwrap_or_default().trim();
    let name = parts
        .next()
        .unwrap_or_default()
        .trim_start_matches([' ', '*'])
        .trim();
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) || name.is_empty() {
        return Err(PackagingError::MalformedDigest(path.to_path_buf()));
    }
    Ok((digest.to_ascii_lowercase(), name.to_string()))
}

fn archive_paths(parent: &Path, name: &str) -> (PathBuf, PathBuf) {
    let archive = parent.join(format!("{}.{}", name, ZIP_EXTENSION));
    let digest = parent.join(format!("{}.{}.{}", name, ZIP_EXTENSION, DIGEST_EXTENSION));
    (archive, digest)
}

/// Remove `<name>.zip` and its digest left by an earlier run
pub fn remove_stale_package(parent: &Path, name: &str) -> io::Result<()> {
    let (archive, digest) = archive_paths(parent, name);
    for path in [archive, digest] {
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed stale package file");
        }
    }
    Ok(())
}

/// Relative paths (with `/` separators) and absolute paths of every file, sorted
fn collect_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, PackagingError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Turns output directories into verified release archives
#[derive(Debug, Clone, Copy)]
pub struct Packager {
    mode: PackageMode,
}

impl Packager {
    pub fn new(mode: PackageMode) -> Self {
        Self { mode }
    }

    /// Archive `artifact_dir`, verify the archive, write its digest and, in
    /// CI mode, remove the directory.
    pub fn package(&self, artifact_dir: &Path) -> Result<PackagedArtifact, PackagingError> {
        if !artifact_dir.is_dir() {
            return Err(PackagingError::MissingDirectory(artifact_dir.to_path_buf()));
        }
        let name = artifact_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PackagingError::MissingDirectory(artifact_dir.to_path_buf()))?;
        let parent = artifact_dir.parent().unwrap_or_else(|| Path::new("."));
        let (archive_path, digest_path) = archive_paths(parent, &name);

        if digest_path.exists() {
            return Err(PackagingError::DigestExists(digest_path));
        }

        let files = collect_files(artifact_dir)?;
        if files.is_empty() {
            return Err(PackagingError::EmptyDirectory(artifact_dir.to_path_buf()));
        }

        let partial = parent.join(format!(".{}.{}.partial", name, ZIP_EXTENSION));
        write_zip(&partial, &files)?;
        fs::rename(&partial, &archive_path)?;

        let verified = verify_zip(&archive_path, &files)?;

        let sha256 = sha256_file(&archive_path)?;
        let archive_name = format!("{}.{}", name, ZIP_EXTENSION);
        let mut digest_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&digest_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => PackagingError::DigestExists(digest_path.clone()),
                _ => PackagingError::IoError(e),
            })?;
        digest_file.write_all(digest_line(&sha256, &archive_name).as_bytes())?;
        digest_file.sync_all()?;

        if !self.mode.keeps_directories() {
            consume(&verified, &[artifact_dir])?;
        }

        info!(archive = %archive_path.display(), sha256 = %sha256, "packaged");
        Ok(PackagedArtifact {
            name,
            archive_path,
            digest_path,
            sha256,
        })
    }
}

fn write_zip(path: &Path, files: &[(String, PathBuf)]) -> Result<(), PackagingError> {
    let zip_error = |source| PackagingError::Zip {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (name, source) in files {
        writer.start_file(name.as_str(), options).map_err(zip_error)?;
        let mut input = File::open(source)?;
        io::copy(&mut input, &mut writer)?;
    }
    let file = writer.finish().map_err(zip_error)?;
    file.sync_all()?;
    Ok(())
}

/// Re-open the archive, read every entry in full and compare the entry set
/// and contents against the source files
fn verify_zip(path: &Path, files: &[(String, PathBuf)]) -> Result<Verified, PackagingError> {
    let corrupt = |reason: String| PackagingError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let mut archive = ZipArchive::new(File::open(path)?).map_err(|e| corrupt(e.to_string()))?;
    let expected: BTreeSet<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
    let mut seen = BTreeSet::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| corrupt(e.to_string()))?;
        let name = entry.name().to_string();
        let Some((_, source)) = files.iter().find(|(n, _)| *n == name) else {
            return Err(corrupt(format!("unexpected entry {}", name)));
        };

        let mut packed = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let read = entry
                .read(&mut buf)
                .map_err(|e| corrupt(format!("{}: {}", name, e)))?;
            if read == 0 {
                break;
            }
            packed.update(&buf[..read]);
        }
        if hex::encode(packed.finalize()) != sha256_file(source)? {
            return Err(corrupt(format!("{} differs from its source", name)));
        }
        seen.insert(name);
    }

    let missing: Vec<&str> = expected
        .iter()
        .filter(|n| !seen.contains(**n))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(corrupt(format!("missing entries: {}", missing.join(", "))));
    }

    let size = fs::metadata(path)?.len();
    Ok(Verified::new(path.to_path_buf(), size, None))
}

/// Recompute the archive's SHA-256 and compare it with its digest file
pub fn verify_package(packaged: &PackagedArtifact) -> Result<(), PackagingError> {
    let (recorded, file_name) = read_digest_file(&packaged.digest_path)?;
    let expected_name = packaged
        .archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if file_name != expected_name {
        return Err(PackagingError::MalformedDigest(packaged.digest_path.clone()));
    }

    let actual = sha256_file(&packaged.archive_path)?;
    if actual != recorded {
        return Err(PackagingError::DigestMismatch {
            archive: packaged.archive_path.clone(),
            expected: recorded,
            actual,
        });
    }
    Ok(())
}
