//! Per-host toolchain selection
//!
//! A [`PlatformToolchain`] answers, for one host OS, which targets it can
//! build and which executables to use for each of them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use topt_target::{Arch, BuildTarget, LinkMode, Os, TargetKey};

use super::compressor::{CompressorCache, CompressorError};
use super::{ResolvedTool, Tool, ToolError, ToolRequest, ToolResolver};
use crate::process::{CommandRunner, Invocation};

/// Minimum Android API level the NDK compiler targets
pub const ANDROID_API_LEVEL: u32 = 21;

/// C compiler for one target plus anything it needs beyond the target flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSetup {
    pub cc: ResolvedTool,

    /// Extra C and linker flags (an SDK sysroot)
    pub extra_flags: Vec<String>,

    /// Extra environment for the compiler
    pub extra_env: BTreeMap<String, String>,
}

impl CompilerSetup {
    fn plain(cc: ResolvedTool) -> Self {
        Self {
            cc,
            extra_flags: Vec::new(),
            extra_env: BTreeMap::new(),
        }
    }
}

/// Tools used to rewrite a static archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTools {
    pub archiver: ResolvedTool,
    pub objcopy: ResolvedTool,

    /// When absent the index is rebuilt with `ar s`
    pub ranlib: Option<ResolvedTool>,
}

/// Host-specific toolchain
pub trait PlatformToolchain: Send + Sync {
    /// Host operating system this toolchain runs on
    fn host(&self) -> Os;

    /// Whether this host can produce `key`
    fn supports(&self, key: &TargetKey) -> bool;

    fn resolve_go(&self) -> Result<ResolvedTool, ToolError>;

    fn resolve_git(&self) -> Result<ResolvedTool, ToolError>;

    fn resolve_compiler(&self, target: &BuildTarget) -> Result<CompilerSetup, ToolError>;

    fn resolve_archiver(&self) -> Result<ArchiveTools, ToolError>;

    fn resolve_stripper(&self) -> Result<ResolvedTool, ToolError>;

    fn resolve_compressor(&self) -> Result<PathBuf, CompressorError>;

    /// Tool that fuses per-architecture binaries; None where fusion never happens
    fn resolve_fuser(&self) -> Option<Result<ResolvedTool, ToolError>> {
        None
    }
}

/// Variable naming a compiler for one target (`TOPT_NATIVE_CC_LINUX_ARM64`)
pub fn compiler_env_var(key: &TargetKey) -> String {
    format!(
        "TOPT_NATIVE_CC_{}_{}",
        key.os.as_str().to_uppercase(),
        key.arch.as_str().to_uppercase()
    )
}

fn resolve_archive_tools(resolver: &ToolResolver) -> Result<ArchiveTools, ToolError> {
    let archiver = resolver.resolve_tool(Tool::Archiver)?;
    let objcopy = resolver.resolve_tool(Tool::ObjCopy)?;
    let ranlib = match resolver.resolve_tool(Tool::Ranlib) {
        Ok(tool) => Some(tool),
        Err(ToolError::ToolNotFound { .. }) => None,
        Err(e) => return Err(e),
    };
    Ok(ArchiveTools {
        archiver,
        objcopy,
        ranlib,
    })
}

/// An installed upx (override, well-known dirs, PATH) wins over the cache
fn resolve_cached_compressor(
    resolver: &ToolResolver,
    cache: Option<&CompressorCache>,
    os: Os,
    arch: Arch,
) -> Result<PathBuf, CompressorError> {
    match resolver.resolve_tool(Tool::Compressor) {
        Ok(tool) => {
            debug!(
                upx = %tool.path.display(),
                source = ?tool.source,
                "using installed compressor"
            );
            return Ok(tool.path);
        }
        Err(ToolError::ToolNotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    match cache {
        Some(cache) => cache.resolve(),
        None => Err(CompressorError::UnsupportedHost { os, arch }),
    }
}

/// Linux hosts: native Linux, arm64 cross builds and Android via the NDK
pub struct LinuxToolchain {
    resolver: ToolResolver,
    host_arch: Arch,
    compressor: Option<CompressorCache>,
}

impl LinuxToolchain {
    pub fn new(resolver: ToolResolver, host_arch: Arch, compressor: Option<CompressorCache>) -> Self {
        Self {
            resolver,
            host_arch,
            compressor,
        }
    }

    fn ndk_bin_dir(&self) -> Option<PathBuf> {
        let ndk = self
            .resolver
            .env_var("ANDROID_NDK_HOME")
            .or_else(|| self.resolver.env_var("ANDROID_NDK_ROOT"))?;
        Some(
            PathBuf::from(ndk)
                .join("toolchains")
                .join("llvm")
                .join("prebuilt")
                .join("linux-x86_64")
                .join("bin"),
        )
    }
}

impl PlatformToolchain for LinuxToolchain {
    fn host(&self) -> Os {
        Os::Linux
    }

    fn supports(&self, key: &TargetKey) -> bool {
        match key.os {
            Os::Linux => true,
            Os::Android => key.arch == Arch::Arm64 && key.link_mode == LinkMode::Dynamic,
            _ => false,
        }
    }

    fn resolve_go(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Go)
    }

    fn resolve_git(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Git)
    }

    fn resolve_compiler(&self, target: &BuildTarget) -> Result<CompilerSetup, ToolError> {
        let key = target.key();
        let request = ToolRequest::new(Tool::CCompiler);
        let request = match (key.os, key.arch) {
            (Os::Android, _) => {
                let clang = format!("aarch64-linux-android{}-clang", ANDROID_API_LEVEL);
                let request = ToolRequest {
                    env_vars: Vec::new(),
                    ..request
                }
                .with_candidates([clang]);
                match self.ndk_bin_dir() {
                    Some(dir) => request.with_extra_dir(dir),
                    None => request,
                }
            }
            (_, arch) if arch == self.host_arch => request.with_candidates(["gcc", "cc", "clang"]),
            (_, Arch::Arm64) => ToolRequest {
                env_vars: Vec::new(),
                ..request
            }
            .with_candidates(["aarch64-linux-gnu-gcc"]),
            (_, Arch::Amd64) => ToolRequest {
                env_vars: Vec::new(),
                ..request
            }
            .with_candidates(["x86_64-linux-gnu-gcc"]),
        };
        let request = request.with_env_var(compiler_env_var(&key));
        let cc = self.resolver.resolve(&request)?;
        debug!(target = %key, cc = %cc.path.display(), "resolved compiler");
        Ok(CompilerSetup::plain(cc))
    }

    fn resolve_archiver(&self) -> Result<ArchiveTools, ToolError> {
        resolve_archive_tools(&self.resolver)
    }

    fn resolve_stripper(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Strip)
    }

    fn resolve_compressor(&self) -> Result<PathBuf, CompressorError> {
        resolve_cached_compressor(
            &self.resolver,
            self.compressor.as_ref(),
            Os::Linux,
            self.host_arch,
        )
    }
}

/// macOS hosts: both macOS architectures plus iOS
pub struct MacToolchain {
    resolver: ToolResolver,
    host_arch: Arch,
    runner: Arc<dyn CommandRunner>,
}

impl MacToolchain {
    pub fn new(resolver: ToolResolver, host_arch: Arch, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            resolver,
            host_arch,
            runner,
        }
    }

    fn sdk_path(&self, sdk: &str) -> Result<String, ToolError> {
        let xcrun = self.resolver.resolve_tool(Tool::Xcrun)?;
        let output = self
            .runner
            .run(&Invocation::new(&xcrun.path).args(["--sdk", sdk, "--show-sdk-path"]))
            .map_err(|e| ToolError::Query {
                tool: Tool::Xcrun,
                message: e.to_string(),
            })?;
        let path = output.stdout.trim().to_string();
        if path.is_empty() {
            return Err(ToolError::Query {
                tool: Tool::Xcrun,
                message: format!("no SDK path reported for {}", sdk),
            });
        }
        Ok(path)
    }
}

impl PlatformToolchain for MacToolchain {
    fn host(&self) -> Os {
        Os::Macos
    }

    fn supports(&self, key: &TargetKey) -> bool {
        match key.os {
            Os::Macos => true,
            Os::Ios => key.arch == Arch::Arm64 && key.link_mode == LinkMode::Static,
            _ => false,
        }
    }

    fn resolve_go(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Go)
    }

    fn resolve_git(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Git)
    }

    fn resolve_compiler(&self, target: &BuildTarget) -> Result<CompilerSetup, ToolError> {
        let key = target.key();
        let request = ToolRequest::new(Tool::CCompiler)
            .with_candidates(["clang"])
            .with_env_var(compiler_env_var(&key));
        let mut setup = CompilerSetup::plain(self.resolver.resolve(&request)?);

        if key.os == Os::Ios {
            let sdk = self.sdk_path("iphoneos")?;
            setup.extra_flags = vec!["-isysroot".to_string(), sdk.clone()];
            setup.extra_env.insert("SDKROOT".to_string(), sdk);
        }
        Ok(setup)
    }

    fn resolve_archiver(&self) -> Result<ArchiveTools, ToolError> {
        resolve_archive_tools(&self.resolver)
    }

    fn resolve_stripper(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Strip)
    }

    fn resolve_compressor(&self) -> Result<PathBuf, CompressorError> {
        resolve_cached_compressor(&self.resolver, None, Os::Macos, self.host_arch)
    }

    fn resolve_fuser(&self) -> Option<Result<ResolvedTool, ToolError>> {
        Some(self.resolver.resolve_tool(Tool::Lipo))
    }
}

/// Windows hosts: MinGW-based builds for x64
pub struct WindowsToolchain {
    resolver: ToolResolver,
    compressor: Option<CompressorCache>,
}

impl WindowsToolchain {
    pub fn new(resolver: ToolResolver, compressor: Option<CompressorCache>) -> Self {
        Self {
            resolver,
            compressor,
        }
    }
}

impl PlatformToolchain for WindowsToolchain {
    fn host(&self) -> Os {
        Os::Windows
    }

    fn supports(&self, key: &TargetKey) -> bool {
        key.os == Os::Windows && key.arch == Arch::Amd64
    }

    fn resolve_go(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Go)
    }

    fn resolve_git(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Git)
    }

    fn resolve_compiler(&self, target: &BuildTarget) -> Result<CompilerSetup, ToolError> {
        let request = ToolRequest::new(Tool::CCompiler)
            .with_candidates(["gcc", "x86_64-w64-mingw32-gcc", "clang"])
            .with_env_var(compiler_env_var(&target.key()));
        Ok(CompilerSetup::plain(self.resolver.resolve(&request)?))
    }

    fn resolve_archiver(&self) -> Result<ArchiveTools, ToolError> {
        resolve_archive_tools(&self.resolver)
    }

    fn resolve_stripper(&self) -> Result<ResolvedTool, ToolError> {
        self.resolver.resolve_tool(Tool::Strip)
    }

    fn resolve_compressor(&self) -> Result<PathBuf, CompressorError> {
        resolve_cached_compressor(
            &self.resolver,
            self.compressor.as_ref(),
            Os::Windows,
            Arch::Amd64,
        )
    }
}

/// Toolchain for the given host
pub fn for_host(
    host: Os,
    host_arch: Arch,
    resolver: ToolResolver,
    runner: Arc<dyn CommandRunner>,
    compressor: Option<CompressorCache>,
) -> Box<dyn PlatformToolchain> {
    match host {
        Os::Macos => Box::new(MacToolchain::new(resolver, host_arch, runner)),
        Os::Windows => Box::new(WindowsToolchain::new(resolver, compressor)),
        _ => Box::new(LinuxToolchain::new(resolver, host_arch, compressor)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fake_tool;
    use super::*;
    use crate::process::{CommandOutput, ProcessError};
    use crate::toolchain::Fetch;
    use tempfile::TempDir;

    struct Unreachable;

    impl Fetch for Unreachable {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, CompressorError> {
            Err(CompressorError::Download {
                url: url.to_string(),
                message: "network unreachable".to_string(),
            })
        }
    }

    struct XcrunStub;

    impl CommandRunner for XcrunStub {
        fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
            assert_eq!(
                invocation.args_lossy(),
                vec!["--sdk", "iphoneos", "--show-sdk-path"]
            );
            Ok(CommandOutput::ok("/sdk/iPhoneOS.sdk\n"))
        }
    }

    fn key(s: &str) -> TargetKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_linux_supports() {
        let tc = LinuxToolchain::new(ToolResolver::isolated(Vec::new()), Arch::Amd64, None);
        assert!(tc.supports(&key("linux-x64-static")));
        assert!(tc.supports(&key("linux-arm64-dynamic")));
        assert!(tc.supports(&key("android-arm64-dynamic")));
        assert!(!tc.supports(&key("android-arm64-static")));
        assert!(!tc.supports(&key("macos-arm64-static")));
        assert!(!tc.supports(&key("windows-x64-static")));
    }

    #[test]
    fn test_mac_and_windows_supports() {
        let mac = MacToolchain::new(ToolResolver::isolated(Vec::new()), Arch::Arm64, Arc::new(XcrunStub));
        assert!(mac.supports(&key("macos-x64-dynamic")));
        assert!(mac.supports(&key("ios-arm64-static")));
        assert!(!mac.supports(&key("ios-arm64-dynamic")));
        assert!(!mac.supports(&key("linux-x64-static")));

        let win = WindowsToolchain::new(ToolResolver::isolated(Vec::new()), None);
        assert!(win.supports(&key("windows-x64-static")));
        assert!(!win.supports(&key("windows-arm64-static")));
    }

    #[test]
    fn test_linux_cross_compiler() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "gcc");
        let cross = fake_tool(dir.path(), "aarch64-linux-gnu-gcc");

        let tc = LinuxToolchain::new(
            ToolResolver::isolated(vec![dir.path().to_path_buf()]),
            Arch::Amd64,
            None,
        );
        let setup = tc
            .resolve_compiler(&BuildTarget::new(key("linux-arm64-static")))
            .unwrap();
        assert_eq!(setup.cc.path, cross);

        let native = tc
            .resolve_compiler(&BuildTarget::new(key("linux-x64-static")))
            .unwrap();
        assert!(native.cc.path.ends_with("gcc"));
    }

    #[test]
    fn test_cross_compiler_missing() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "gcc");

        let tc = LinuxToolchain::new(
            ToolResolver::isolated(vec![dir.path().to_path_buf()]),
            Arch::Amd64,
            None,
        );
        let err = tc
            .resolve_compiler(&BuildTarget::new(key("linux-arm64-dynamic")))
            .unwrap_err();
        assert!(matches!(err, ToolError::ToolNotFound { .. }));
    }

    #[test]
    fn test_android_uses_ndk() {
        let ndk = TempDir::new().unwrap();
        let bin = ndk
            .path()
            .join("toolchains/llvm/prebuilt/linux-x86_64/bin");
        let clang = fake_tool(&bin, "aarch64-linux-android21-clang");

        let resolver = ToolResolver::isolated(Vec::new())
            .with_env("ANDROID_NDK_HOME", ndk.path().display().to_string());
        let tc = LinuxToolchain::new(resolver, Arch::Amd64, None);
        let setup = tc
            .resolve_compiler(&BuildTarget::new(key("android-arm64-dynamic")))
            .unwrap();
        assert_eq!(setup.cc.path, clang);
    }

    #[test]
    fn test_per_target_compiler_override() {
        let dir = TempDir::new().unwrap();
        let custom = fake_tool(dir.path(), "my-cross-gcc");

        let resolver = ToolResolver::isolated(vec![dir.path().to_path_buf()])
            .with_env("TOPT_NATIVE_CC_LINUX_ARM64", "my-cross-gcc");
        let tc = LinuxToolchain::new(resolver, Arch::Amd64, None);
        let setup = tc
            .resolve_compiler(&BuildTarget::new(key("linux-arm64-static")))
            .unwrap();
        assert_eq!(setup.cc.path, custom);
    }

    #[test]
    fn test_ios_sysroot() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "clang");
        fake_tool(dir.path(), "xcrun");

        let tc = MacToolchain::new(
            ToolResolver::isolated(vec![dir.path().to_path_buf()]),
            Arch::Arm64,
            Arc::new(XcrunStub),
        );
        let setup = tc
            .resolve_compiler(&BuildTarget::new(key("ios-arm64-static")))
            .unwrap();
        assert_eq!(setup.extra_flags, vec!["-isysroot", "/sdk/iPhoneOS.sdk"]);
        assert_eq!(
            setup.extra_env.get("SDKROOT").map(String::as_str),
            Some("/sdk/iPhoneOS.sdk")
        );
    }

    #[test]
    fn test_fuser_only_on_mac() {
        let linux = LinuxToolchain::new(ToolResolver::isolated(Vec::new()), Arch::Amd64, None);
        assert!(linux.resolve_fuser().is_none());

        let mac = MacToolchain::new(ToolResolver::isolated(Vec::new()), Arch::Arm64, Arc::new(XcrunStub));
        assert!(matches!(
            mac.resolve_fuser(),
            Some(Err(ToolError::ToolNotFound { .. }))
        ));
    }

    #[test]
    fn test_archive_tools_without_ranlib() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "ar");
        fake_tool(dir.path(), "objcopy");

        let tc = WindowsToolchain::new(ToolResolver::isolated(vec![dir.path().to_path_buf()]), None);
        let tools = tc.resolve_archiver().unwrap();
        assert!(tools.archiver.path.ends_with(if cfg!(windows) { "ar.exe" } else { "ar" }));
        assert!(tools.ranlib.is_none());
    }

    #[test]
    fn test_compressor_env_override() {
        let dir = TempDir::new().unwrap();
        let upx = fake_tool(dir.path(), "upx");

        let resolver = ToolResolver::isolated(Vec::new()).with_env("UPX", upx.display().to_string());
        let tc = WindowsToolchain::new(resolver, None);
        assert_eq!(tc.resolve_compressor().unwrap(), upx);
    }

    #[test]
    fn test_invalid_ranlib_override_is_reported() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "ar");
        fake_tool(dir.path(), "objcopy");
        fake_tool(dir.path(), "ranlib");

        let resolver = ToolResolver::isolated(vec![dir.path().to_path_buf()])
            .with_env("RANLIB", "/nonexistent/ranlib");
        let tc = WindowsToolchain::new(resolver, None);
        let err = tc.resolve_archiver().unwrap_err();
        assert!(matches!(err, ToolError::InvalidOverride { tool: Tool::Ranlib, .. }));
    }

    #[test]
    fn test_installed_compressor_preferred_over_download() {
        let bin = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let upx = fake_tool(bin.path(), "upx");

        let cache = CompressorCache::new(cache_dir.path(), "4.2.4", Os::Windows, Arch::Amd64)
            .with_fetcher(Box::new(Unreachable));
        let tc = WindowsToolchain::new(
            ToolResolver::isolated(vec![bin.path().to_path_buf()]),
            Some(cache),
        );
        assert_eq!(tc.resolve_compressor().unwrap(), upx);
        assert!(!cache_dir.path().join("upx-4.2.4-win64").exists());
    }

    #[test]
    fn test_compressor_in_well_known_dir() {
        let well_known = TempDir::new().unwrap();
        let upx = fake_tool(well_known.path(), "upx");

        let resolver = ToolResolver::isolated(Vec::new())
            .with_well_known(vec![well_known.path().to_path_buf()]);
        let tc = LinuxToolchain::new(resolver, Arch::Amd64, None);
        assert_eq!(tc.resolve_compressor().unwrap(), upx);
    }

    #[test]
    fn test_missing_compressor_falls_back_to_cache() {
        let cache_dir = TempDir::new().unwrap();
        let cache = CompressorCache::new(cache_dir.path(), "4.2.4", Os::Windows, Arch::Amd64)
            .with_fetcher(Box::new(Unreachable));
        let tc = WindowsToolchain::new(ToolResolver::isolated(Vec::new()), Some(cache));
        assert!(matches!(
            tc.resolve_compressor(),
            Err(CompressorError::Download { .. })
        ));
    }

    #[test]
    fn test_invalid_compressor_override_is_reported() {
        let resolver = ToolResolver::isolated(Vec::new()).with_env("UPX", "/nonexistent/upx");
        let tc = LinuxToolchain::new(resolver, Arch::Amd64, None);
        assert!(matches!(
            tc.resolve_compressor(),
            Err(CompressorError::Tool(ToolError::InvalidOverride { .. }))
        ));
    }
}
