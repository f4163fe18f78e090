//! Executable compression

use std::path::Path;

use super::{rewrite_via_copy, PostProcessError};
use crate::process::{CommandRunner, Invocation, ProcessError};

/// Marker upx prints for input it has already packed
const ALREADY_PACKED: &str = "AlreadyPackedException";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressOutcome {
    Compressed,
    AlreadyCompressed,
}

/// Compress a copy of `binary` with `upx --best --lzma` and move it over the
/// original on success
pub fn compress_in_place(
    runner: &dyn CommandRunner,
    upx: &Path,
    binary: &Path,
) -> Result<CompressOutcome, PostProcessError> {
    rewrite_via_copy(binary, |copy| {
        let invocation = Invocation::new(upx)
            .args(["--best", "--lzma", "-q"])
            .arg(copy);
        let output = runner.output(&invocation)?;
        if output.success() {
            return Ok((CompressOutcome::Compressed, true));
        }
        if output.stderr.contains(ALREADY_PACKED) || output.stdout.contains(ALREADY_PACKED) {
            return Ok((CompressOutcome::AlreadyCompressed, false));
        }
        Err(ProcessError::failed(&invocation, &output).into())
    })
}
