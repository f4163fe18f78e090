//! External command execution
//!
//! Every tool the pipeline drives (git, go, ar, objcopy, strip, lipo, upx,
//! xcrun) goes through [`CommandRunner`]. An [`Invocation`] carries its own
//! environment so nothing is ever written into this process's environment.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Lines of stderr kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// A fully described command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Program file name without directory or extension (`objcopy`, `go`)
    pub fn program_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Arguments as UTF-8 (lossy), for matching and display
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-like rendering for logs
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        for arg in self.args_lossy() {
            if arg.contains(' ') || arg.is_empty() {
                parts.push(format!("'{}'", arg));
            } else {
                parts.push(arg);
            }
        }
        parts.join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Command execution errors
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

impl ProcessError {
    pub fn failed(invocation: &Invocation, output: &CommandOutput) -> Self {
        ProcessError::Failed {
            command: invocation.display_command(),
            status: match output.code {
                Some(code) => format!("status {}", code),
                None => "a signal".to_string(),
            },
            stderr: tail_lines(&output.stderr, STDERR_TAIL_LINES),
        }
    }
}

/// Runs external commands
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output; a non-zero exit is not an error here
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError>;

    /// Run to completion and require a zero exit status
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        let output = self.output(invocation)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ProcessError::failed(invocation, &output))
        }
    }
}

/// [`CommandRunner`] backed by `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).envs(&invocation.env);
        if let Some(ref cwd) = invocation.cwd {
            command.current_dir(cwd);
        }
        command
    }

    /// Run with inherited stdio and return the exit code (1 when killed)
    pub fn run_inherited(&self, invocation: &Invocation) -> Result<i32, ProcessError> {
        debug!(command = %invocation.display_command(), "running (inherited stdio)");
        let status = Self::command(invocation)
            .status()
            .map_err(|source| ProcessError::Spawn {
                program: invocation.program.display().to_string(),
                source,
            })?;
        Ok(status.code().unwrap_or(1))
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        debug!(
            command = %invocation.display_command(),
            cwd = ?invocation.cwd,
            "running"
        );
        let output = Self::command(invocation)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProcessError::Spawn {
                program: invocation.program.display().to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Resolve `path` against `base` unless it is already absolute
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("/usr/bin/ar")
            .arg("rcs")
            .args(["lib.a", "a.o"])
            .current_dir("/tmp/work")
            .env("LANG", "C");

        assert_eq!(inv.program_name(), "ar");
        assert_eq!(inv.args_lossy(), vec!["rcs", "lib.a", "a.o"]);
        assert_eq!(inv.cwd, Some(PathBuf::from("/tmp/work")));
        assert_eq!(inv.env.get("LANG").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_display_quotes_spaces() {
        let inv = Invocation::new("go").args(["build", "-ldflags", "-s -w"]);
        assert_eq!(inv.display_command(), "go build -ldflags '-s -w'");
    }

    #[test]
    fn test_failed_error_keeps_stderr_tail() {
        let inv = Invocation::new("go").arg("build");
        let stderr: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let err = ProcessError::failed(&inv, &CommandOutput::failed(2, stderr));
        let message = err.to_string();
        assert!(message.contains("status 2"));
        assert!(message.contains("line 49"));
        assert!(!message.contains("line 10\n"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("output")),
            PathBuf::from("/work/output")
        );
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("/abs/out")),
            PathBuf::from("/abs/out")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner;
        let out = runner
            .output(&Invocation::new("sh").args(["-c", "echo hi; echo oops >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");

        let err = runner
            .run(&Invocation::new("sh").args(["-c", "exit 1"]))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Failed { .. }));
    }

    #[test]
    fn test_spawn_error() {
        let err = SystemRunner
            .output(&Invocation::new("/nonexistent/definitely-not-a-tool"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
