//! Per-target compiler environment

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use topt_target::BuildTarget;

use crate::config::FlagSettings;
use crate::toolchain::CompilerSetup;

/// Environment one `go build` runs with.
///
/// Built once per target and rendered into that target's invocation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildEnvironment {
    pub goos: String,
    pub goarch: String,
    pub cc: PathBuf,
    pub cgo_cflags: Vec<String>,
    pub cgo_ldflags: Vec<String>,

    /// Anything else the compiler needs (`SDKROOT`)
    pub extra: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn new(target: &BuildTarget, compiler: &CompilerSetup, overrides: &FlagSettings) -> Self {
        let mut cgo_cflags = target.c_flags.clone();
        cgo_cflags.extend(compiler.extra_flags.iter().cloned());
        cgo_cflags.extend(overrides.cflags.iter().cloned());

        let mut cgo_ldflags = target.link_flags.clone();
        cgo_ldflags.extend(compiler.extra_flags.iter().cloned());
        cgo_ldflags.extend(overrides.ldflags.iter().cloned());

        Self {
            goos: target.os.go_os().to_string(),
            goarch: target.arch.go_arch().to_string(),
            cc: compiler.cc.path.clone(),
            cgo_cflags,
            cgo_ldflags,
            extra: compiler.extra_env.clone(),
        }
    }

    /// Variables for the invocation
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = self.extra.clone();
        env.insert("GOOS".to_string(), self.goos.clone());
        env.insert("GOARCH".to_string(), self.goarch.clone());
        env.insert("CGO_ENABLED".to_string(), "1".to_string());
        env.insert("CC".to_string(), self.cc.display().to_string());
        env.insert("CGO_CFLAGS".to_string(), self.cgo_cflags.join(" "));
        env.insert("CGO_LDFLAGS".to_string(), self.cgo_ldflags.join(" "));
        env
    }
}
