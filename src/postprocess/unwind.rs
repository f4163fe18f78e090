//! Unwind-table removal for Windows static archives
//!
//! The archive is unpacked into a scratch directory next to it, each member
//! has `.pdata`/`.xdata` removed, and the rebuilt archive replaces the
//! original only after it verifies. Any failure leaves the original as it was.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use tracing::{debug, info};

use super::inspect::{scan_archive, UNWIND_SECTIONS};
use super::PostProcessError;
use crate::process::{CommandRunner, Invocation};
use crate::toolchain::ArchiveTools;

/// What the step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwindOutcome {
    /// No member carried unwind sections
    AlreadyClean,
    /// Sections removed; counts of cleaned and total members
    Removed { cleaned: usize, members: usize },
}

pub fn remove_unwind_sections(
    runner: &dyn CommandRunner,
    tools: &ArchiveTools,
    archive: &Path,
) -> Result<UnwindOutcome, PostProcessError> {
    let before = scan_archive(archive)?;
    let dirty = before.unwind_members();
    if dirty.is_empty() {
        debug!(archive = %archive.display(), "no unwind sections");
        return Ok(UnwindOutcome::AlreadyClean);
    }
    let dirty_members: BTreeSet<&str> = dirty.iter().map(|(m, _)| m.as_str()).collect();

    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let file_name = archive
        .file_name()
        .ok_or_else(|| PostProcessError::Inspect {
            path: archive.to_path_buf(),
            message: "archive path has no file name".to_string(),
        })?;
    let scratch = tempfile::Builder::new()
        .prefix(".unwind-")
        .tempdir_in(parent)?;
    let objects_dir = scratch.path().join("objects");
    fs::create_dir_all(&objects_dir)?;

    runner.run(
        &Invocation::new(&tools.archiver.path)
            .arg("x")
            .arg(archive)
            .current_dir(&objects_dir),
    )?;

    let member_order: Vec<&str> = before.members.iter().map(|m| m.name.as_str()).collect();
    let objects = list_objects(&objects_dir, &member_order)?;
    if objects.is_empty() {
        return Err(PostProcessError::EmptyArchive(archive.to_path_buf()));
    }

    let to_clean = objects.iter().filter(|o| {
        o.file_name()
            .map(|n| dirty_members.contains(n.to_string_lossy().as_ref()))
            .unwrap_or(false)
    });
    for object in to_clean {
        let mut strip = Invocation::new(&tools.objcopy.path);
        for section in UNWIND_SECTIONS {
            strip = strip.arg(format!("--remove-section={}", section));
        }
        runner.run(&strip.arg(object).current_dir(&objects_dir))?;
    }

    let rebuilt = scratch.path().join(file_name);
    runner.run(
        &Invocation::new(&tools.archiver.path)
            .arg("rcs")
            .arg(&rebuilt)
            .args(&objects)
            .current_dir(&objects_dir),
    )?;
    let index = match &tools.ranlib {
        Some(ranlib) => Invocation::new(&ranlib.path).arg(&rebuilt),
        None => Invocation::new(&tools.archiver.path).arg("s").arg(&rebuilt),
    };
    runner.run(&index.current_dir(&objects_dir))?;

    let after = scan_archive(&rebuilt)?;
    let remaining = after.unwind_members();
    if !remaining.is_empty() {
        return Err(PostProcessError::UnwindRemains {
            members: remaining
                .into_iter()
                .map(|(m, s)| format!("{}:{}", m, s))
                .collect(),
        });
    }
    let lost: Vec<String> = before
        .exported_symbols()
        .difference(&after.exported_symbols())
        .cloned()
        .collect();
    if !lost.is_empty() {
        return Err(PostProcessError::SymbolsLost { symbols: lost });
    }

    fs::rename(&rebuilt, archive)?;
    info!(
        archive = %archive.display(),
        cleaned = dirty_members.len(),
        members = objects.len(),
        "removed unwind sections"
    );
    Ok(UnwindOutcome::Removed {
        cleaned: dirty_members.len(),
        members: objects.len(),
    })
}

/// Extracted member files in their original archive order; anything
/// extracted under an unexpected name follows, sorted by name
fn list_objects(dir: &Path, member_order: &[&str]) -> Result<Vec<PathBuf>, PostProcessError> {
    let mut extracted = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            extracted.push(entry.path().to_path_buf());
        }
    }

    let mut objects: Vec<PathBuf> = Vec::with_capacity(extracted.len());
    for name in member_order {
        let path = dir.join(name);
        if extracted.contains(&path) && !objects.contains(&path) {
            objects.push(path);
        }
    }
    for path in extracted {
        if !objects.contains(&path) {
            objects.push(path);
        }
    }
    Ok(objects)
}
