//! Copies the native sources into the checkout

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use tracing::info;

use super::SyncError;

/// Files from a local directory that are copied over the checkout every run
#[derive(Debug, Clone)]
pub struct Overlay {
    source_dir: PathBuf,
    patterns: GlobSet,
    excluded: Vec<PathBuf>,
}

impl Overlay {
    pub fn new(source_dir: impl Into<PathBuf>, patterns: &[String]) -> Result<Self, SyncError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            source_dir: source_dir.into(),
            patterns: builder.build()?,
            excluded: Vec::new(),
        })
    }

    /// Skip a directory below the source (the checkout or output root when
    /// they are nested inside it)
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    /// Copy every matching file to `dest`, keeping relative paths and
    /// overwriting what is there. Returns the number of files copied.
    pub fn apply(&self, dest: &Path) -> Result<usize, SyncError> {
        if !self.source_dir.is_dir() {
            return Err(SyncError::MissingOverlay(self.source_dir.clone()));
        }
        fs::create_dir_all(dest)?;

        let excluded: Vec<PathBuf> = self
            .excluded
            .iter()
            .chain(std::iter::once(&dest.to_path_buf()))
            .filter_map(|p| fs::canonicalize(p).ok())
            .collect();

        let mut copied = 0;
        let walker = WalkDir::new(&self.source_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && fs::canonicalize(entry.path())
                        .map(|p| excluded.contains(&p))
                        .unwrap_or(false))
            });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.source_dir) else {
                continue;
            };
            if !self.patterns.is_match(relative) {
                continue;
            }
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }

        info!(files = copied, dest = %dest.display(), "overlaid native sources");
        Ok(copied)
    }
}
