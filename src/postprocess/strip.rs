//! Symbol stripping for shared libraries

use std::path::Path;

use topt_target::Os;

use super::{rewrite_via_copy, PostProcessError};
use crate::process::{CommandRunner, Invocation};

/// Flags for `strip` on each platform.
///
/// Apple's strip keeps the global symbols a dylib exports with `-x`; GNU
/// strip does the same with `--strip-unneeded`.
pub fn strip_args(os: Os) -> &'static [&'static str] {
    if os.is_apple() {
        &["-x"]
    } else {
        &["--strip-unneeded"]
    }
}

/// Strip a copy of `binary` and move it over the original on success
pub fn strip_in_place(
    runner: &dyn CommandRunner,
    strip: &Path,
    os: Os,
    binary: &Path,
) -> Result<(), PostProcessError> {
    rewrite_via_copy(binary, |copy| {
        runner.run(&Invocation::new(strip).args(strip_args(os)).arg(copy))?;
        Ok(((), true))
    })
}
