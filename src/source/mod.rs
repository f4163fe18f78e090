//! External source synchronization
//!
//! Keeps a local clone of the tracer repository on the requested branch and
//! copies the native sources into it. An existing directory that is not a
//! git checkout is never repaired automatically.

mod overlay;

pub use overlay::Overlay;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::process::{CommandRunner, Invocation, ProcessError};

/// The local clone after synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSourceCheckout {
    pub local_path: PathBuf,
    pub remote_url: String,
    pub branch: String,

    /// Commit checked out after the pull
    pub revision: String,
}

/// Source synchronization errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("git clone of {url} failed: {source}")]
    Clone {
        url: String,
        #[source]
        source: ProcessError,
    },

    #[error("git fetch of branch {branch} failed: {source}")]
    Fetch {
        branch: String,
        #[source]
        source: ProcessError,
    },

    #[error("git checkout of branch {branch} failed: {source}")]
    Checkout {
        branch: String,
        #[source]
        source: ProcessError,
    },

    #[error("git pull of branch {branch} failed: {source}")]
    Pull {
        branch: String,
        #[source]
        source: ProcessError,
    },

    #[error("reading checkout state failed: {0}")]
    Inspect(#[source] ProcessError),

    #[error("{} exists but is not a git checkout; remove it manually and re-run", .path.display())]
    CorruptCheckout { path: PathBuf },

    #[error("overlay directory {0} does not exist")]
    MissingOverlay(PathBuf),

    #[error("invalid overlay pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("walking overlay directory failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Drives git against one local checkout location
pub struct SourceSync<'a> {
    runner: &'a dyn CommandRunner,
    git: PathBuf,
}

impl<'a> SourceSync<'a> {
    pub fn new(runner: &'a dyn CommandRunner, git: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            git: git.into(),
        }
    }

    fn git_in(&self, path: &Path) -> Invocation {
        Invocation::new(&self.git).arg("-C").arg(path)
    }

    /// Clone, switch branch or pull so `local_path` holds the tip of `branch`
    pub fn ensure_source(
        &self,
        local_path: &Path,
        remote_url: &str,
        branch: &str,
    ) -> Result<ExternalSourceCheckout, SyncError> {
        if !local_path.exists() {
            info!(url = %remote_url, branch = %branch, path = %local_path.display(), "cloning source");
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let clone = Invocation::new(&self.git)
                .args(["clone", "--branch", branch, remote_url])
                .arg(local_path);
            self.runner
                .run(&clone)
                .map_err(|source| SyncError::Clone {
                    url: remote_url.to_string(),
                    source,
                })?;
        } else {
            if !self.is_repository_root(local_path)? {
                return Err(SyncError::CorruptCheckout {
                    path: local_path.to_path_buf(),
                });
            }

            let current = self.current_branch(local_path)?;
            if current != branch {
                info!(from = %current, to = %branch, "switching source branch");
                let refspec = format!("{0}:refs/remotes/origin/{0}", branch);
                self.runner
                    .run(&self.git_in(local_path).args(["fetch", "origin", refspec.as_str()]))
                    .map_err(|source| SyncError::Fetch {
                        branch: branch.to_string(),
                        source,
                    })?;
                let tracking = format!("origin/{}", branch);
                self.runner
                    .run(&self.git_in(local_path).args(["checkout", "-B", branch, tracking.as_str()]))
                    .map_err(|source| SyncError::Checkout {
                        branch: branch.to_string(),
                        source,
                    })?;
            }

            info!(branch = %branch, "updating source");
            self.runner
                .run(&self.git_in(local_path).args(["pull", "--ff-only", "origin", branch]))
                .map_err(|source| SyncError::Pull {
                    branch: branch.to_string(),
                    source,
                })?;
        }

        let revision = self.head_revision(local_path)?;
        debug!(revision = %revision, "source at revision");
        Ok(ExternalSourceCheckout {
            local_path: local_path.to_path_buf(),
            remote_url: remote_url.to_string(),
            branch: branch.to_string(),
            revision,
        })
    }

    /// True only when `path` is the top level of a work tree, not a
    /// directory nested inside some other repository
    fn is_repository_root(&self, path: &Path) -> Result<bool, SyncError> {
        if !path.is_dir() {
            return Ok(false);
        }
        let output = self
            .runner
            .output(&self.git_in(path).args(["rev-parse", "--show-toplevel"]))
            .map_err(SyncError::Inspect)?;
        if !output.success() {
            return Ok(false);
        }
        let toplevel = PathBuf::from(output.stdout.trim());
        let same = match (fs::canonicalize(&toplevel), fs::canonicalize(path)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        Ok(same)
    }

    fn current_branch(&self, path: &Path) -> Result<String, SyncError> {
        let output = self
            .runner
            .run(&self.git_in(path).args(["rev-parse", "--abbrev-ref", "HEAD"]))
            .map_err(SyncError::Inspect)?;
        Ok(output.stdout.trim().to_string())
    }

    fn head_revision(&self, path: &Path) -> Result<String, SyncError> {
        let output = self
            .runner
            .run(&self.git_in(path).args(["rev-parse", "HEAD"]))
            .map_err(SyncError::Inspect)?;
        Ok(output.stdout.trim().to_string())
    }
}
