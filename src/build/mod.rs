//! Single-target builder
//!
//! Compiles the native package in the checkout for one target and checks
//! that the binary and its generated header came out.

mod env;

pub use env::BuildEnvironment;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use topt_target::BuildTarget;

use crate::artifact::BuildArtifact;
use crate::process::{CommandRunner, Invocation, ProcessError};
use crate::toolchain::ToolError;

/// Build errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("native package directory {} does not exist", .0.display())]
    MissingPackage(PathBuf),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("compiling {target} failed: {source}")]
    Compile {
        target: String,
        #[source]
        source: ProcessError,
    },

    #[error("compiler produced no {what} at {}", .path.display())]
    MissingOutput { what: &'static str, path: PathBuf },

    #[error("compiler produced an empty {what} at {}", .path.display())]
    EmptyOutput { what: &'static str, path: PathBuf },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Runs `go build` for one target at a time
pub struct Builder<'a> {
    runner: &'a dyn CommandRunner,
    go: PathBuf,
}

impl<'a> Builder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, go: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            go: go.into(),
        }
    }

    /// Build `target` from `package_dir` into a fresh directory under
    /// `output_root`.
    ///
    /// The target's directory is recreated, so a failed build never leaves
    /// a stale binary that looks current.
    pub fn build(
        &self,
        target: &BuildTarget,
        env: &BuildEnvironment,
        package_dir: &Path,
        output_root: &Path,
    ) -> Result<BuildArtifact, BuildError> {
        if !package_dir.is_dir() {
            return Err(BuildError::MissingPackage(package_dir.to_path_buf()));
        }

        let out_dir = output_root.join(target.output_dir_name());
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir)?;
        }
        fs::create_dir_all(&out_dir)?;

        let binary_path = out_dir.join(target.binary_file_name());
        let header_path = out_dir.join(target.header_file_name());

        let invocation = Invocation::new(&self.go)
            .args(&target.compile_flags)
            .arg("-o")
            .arg(&binary_path)
            .arg(".")
            .current_dir(package_dir)
            .envs(env.to_env());

        info!(target = %target, cc = %env.cc.display(), "compiling");
        self.runner
            .run(&invocation)
            .map_err(|source| BuildError::Compile {
                target: target.to_string(),
                source,
            })?;

        check_output("library", &binary_path)?;
        check_output("header", &header_path)?;
        info!(target = %target, binary = %binary_path.display(), "compiled");

        Ok(BuildArtifact {
            target: target.clone(),
            binary_path,
            header_path,
        })
    }
}

fn check_output(what: &'static str, path: &Path) -> Result<(), BuildError> {
    match fs::metadata(path) {
        Ok(m) if m.len() == 0 => Err(BuildError::EmptyOutput {
            what,
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BuildError::MissingOutput {
            what,
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlagSettings;
    use crate::process::CommandOutput;
    use crate::toolchain::{CompilerSetup, ResolvedTool, Tool, ToolSource};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes the files `go build -o <path>` would, or fails
    struct FakeGo {
        header: bool,
        fail: bool,
        seen: Mutex<Vec<Invocation>>,
    }

    impl FakeGo {
        fn new() -> Self {
            Self {
                header: true,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for FakeGo {
        fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
            self.seen.lock().unwrap().push(invocation.clone());
            if self.fail {
                return Ok(CommandOutput::failed(1, "undefined: topt_initialize"));
            }
            let args = invocation.args_lossy();
            let pos = args.iter().position(|a| a == "-o").unwrap();
            let binary = PathBuf::from(&args[pos + 1]);
            fs::write(&binary, b"!<arch>\nbinary-bytes").unwrap();
            if self.header {
                fs::write(binary.with_extension("h"), b"int topt_initialize(void);").unwrap();
            }
            Ok(CommandOutput::ok(""))
        }
    }

    fn env_for(target: &BuildTarget) -> BuildEnvironment {
        let cc = CompilerSetup {
            cc: ResolvedTool {
                tool: Tool::CCompiler,
                path: PathBuf::from("/usr/bin/gcc"),
                source: ToolSource::Path,
            },
            extra_flags: Vec::new(),
            extra_env: BTreeMap::new(),
        };
        BuildEnvironment::new(target, &cc, &FlagSettings::default())
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("checkout/internal/civisibility/native");
        fs::create_dir_all(&package).unwrap();
        let output = dir.path().join("output");
        (dir, package, output)
    }

    #[test]
    fn test_build_produces_artifact() {
        let (_dir, package, output) = setup();
        let target = BuildTarget::new("linux-x64-static".parse().unwrap());
        let go = FakeGo::new();

        let artifact = Builder::new(&go, "/usr/local/go/bin/go")
            .build(&target, &env_for(&target), &package, &output)
            .unwrap();

        assert_eq!(
            artifact.output_dir(),
            output.join("linux-x64-libtestoptimization-static")
        );
        assert!(artifact.binary_path.is_file());
        assert!(artifact.header_path.is_file());

        let seen = go.seen.lock().unwrap();
        let inv = &seen[0];
        assert_eq!(inv.cwd.as_deref(), Some(package.as_path()));
        assert_eq!(inv.env.get("GOOS").map(String::as_str), Some("linux"));
        assert_eq!(inv.args_lossy()[0], "build");
        assert_eq!(inv.args_lossy().last().map(String::as_str), Some("."));
    }

    #[test]
    fn test_stale_output_removed_before_build() {
        let (_dir, package, output) = setup();
        let target = BuildTarget::new("linux-x64-dynamic".parse().unwrap());
        let stale = output.join(target.output_dir_name()).join("leftover.txt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();

        Builder::new(&FakeGo::new(), "go")
            .build(&target, &env_for(&target), &package, &output)
            .unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_compile_failure() {
        let (_dir, package, output) = setup();
        let target = BuildTarget::new("linux-arm64-static".parse().unwrap());
        let go = FakeGo {
            fail: true,
            ..FakeGo::new()
        };

        let err = Builder::new(&go, "go")
            .build(&target, &env_for(&target), &package, &output)
            .unwrap_err();
        assert!(matches!(err, BuildError::Compile { .. }));
        assert!(err.to_string().contains("linux-arm64-static"));
    }

    #[test]
    fn test_missing_header() {
        let (_dir, package, output) = setup();
        let target = BuildTarget::new("linux-x64-static".parse().unwrap());
        let go = FakeGo {
            header: false,
            ..FakeGo::new()
        };

        let err = Builder::new(&go, "go")
            .build(&target, &env_for(&target), &package, &output)
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingOutput { what: "header", .. }));
    }

    #[test]
    fn test_missing_package_dir() {
        let (dir, _package, output) = setup();
        let target = BuildTarget::new("linux-x64-static".parse().unwrap());
        let err = Builder::new(&FakeGo::new(), "go")
            .build(&target, &env_for(&target), &dir.path().join("nope"), &output)
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingPackage(_)));
    }
}
