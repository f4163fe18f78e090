//! Shared fixtures for the integration tests
//!
//! - `FakeRunner`: a `CommandRunner` that emulates git, go, ar, objcopy,
//!   ranlib, strip, lipo and upx closely enough for the pipeline to verify
//!   their results
//! - A GNU `ar` writer with a symbol index and a COFF object builder
//! - A `Harness` that lays out a working directory with tool stubs

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use object::write::{Object as WriteObject, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, Object, ObjectSection, ObjectSymbol, SectionKind,
    SymbolFlags, SymbolKind, SymbolScope,
};
use tempfile::TempDir;

use topt_native::config::EffectiveConfig;
use topt_native::process::{CommandOutput, CommandRunner, Invocation, ProcessError};
use topt_native::toolchain::{
    CompressorCache, CompressorError, Fetch, LinuxToolchain, MacToolchain, ToolResolver,
    WindowsToolchain,
};
use topt_native::{Arch, Os, Pipeline};

/// Header every fake compilation emits, identical across architectures
pub const HEADER: &str = "#include <stdint.h>\nextern unsigned char topt_initialize(char* language);\n";

/// Revision reported by the fake git
pub const REVISION: &str = "9f2c1e4b7a3d5c6e8f0a1b2c3d4e5f60718293a4";

/// Exported symbols of the fake Windows static archive
pub const EXPORTED: &[&str] = &["topt_initialize", "topt_shutdown", "_cgo_topt_initialize"];

// =============================================================================
// Binary builders
// =============================================================================

/// A COFF x86-64 object defining `symbols` in `.text`, with unwind tables
/// when `unwind` is set
pub fn coff_object(symbols: &[&str], unwind: bool) -> Vec<u8> {
    let mut obj = WriteObject::new(BinaryFormat::Coff, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    for name in symbols {
        let offset = obj.append_section_data(text, &[0xc3; 16], 16);
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: offset,
            size: 16,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }
    if unwind {
        for name in [".pdata", ".xdata"] {
            let section = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::ReadOnlyData);
            obj.append_section_data(section, &[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], 4);
        }
    }
    obj.write().unwrap()
}

/// Rebuild a COFF object without the `drop` sections, keeping every global
/// definition in the remaining ones
pub fn rebuild_coff(data: &[u8], drop: &[String]) -> Vec<u8> {
    let file = object::File::parse(data).unwrap();
    let mut out = WriteObject::new(BinaryFormat::Coff, Architecture::X86_64, Endianness::Little);
    let mut sections = HashMap::new();
    for section in file.sections() {
        let name = section.name().unwrap().to_string();
        if drop.contains(&name) {
            continue;
        }
        let id = out.add_section(Vec::new(), name.into_bytes(), section.kind());
        out.append_section_data(id, section.data().unwrap(), section.align().max(1));
        sections.insert(section.index(), id);
    }
    for symbol in file.symbols() {
        if !(symbol.is_global() && symbol.is_definition()) {
            continue;
        }
        let Some(&section) = symbol.section_index().and_then(|i| sections.get(&i)) else {
            continue;
        };
        out.add_symbol(Symbol {
            name: symbol.name_bytes().unwrap().to_vec(),
            value: symbol.address(),
            size: symbol.size(),
            kind: symbol.kind(),
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
    }
    out.write().unwrap()
}

fn defined_symbols(member: &[u8]) -> Vec<String> {
    match object::File::parse(member) {
        Ok(file) => file
            .symbols()
            .filter(|s| s.is_global() && s.is_definition())
            .filter_map(|s| s.name().ok().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn ar_header(name: &str, size: usize) -> Vec<u8> {
    let header = format!(
        "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
        name, 0, 0, 0, 644, size
    );
    assert_eq!(header.len(), 60);
    header.into_bytes()
}

/// GNU `ar` archive of `members` (names under 16 bytes) with a `/` symbol
/// index of every global definition
pub fn gnu_archive(members: &[(String, Vec<u8>)]) -> Vec<u8> {
    let symbols: Vec<(usize, String)> = members
        .iter()
        .enumerate()
        .flat_map(|(i, (_, data))| defined_symbols(data).into_iter().map(move |s| (i, s)))
        .collect();

    let mut out = b"!<arch>\n".to_vec();
    let mut index = Vec::new();
    if !symbols.is_empty() {
        let names_len: usize = symbols.iter().map(|(_, s)| s.len() + 1).sum();
        let table_len = 4 + 4 * symbols.len() + names_len;
        let mut offset = 8 + 60 + table_len + table_len % 2;
        let mut member_offsets = Vec::new();
        for (_, data) in members {
            member_offsets.push(offset);
            offset += 60 + data.len() + data.len() % 2;
        }

        index.extend_from_slice(&(symbols.len() as u32).to_be_bytes());
        for (member, _) in &symbols {
            index.extend_from_slice(&(member_offsets[*member] as u32).to_be_bytes());
        }
        for (_, name) in &symbols {
            index.extend_from_slice(name.as_bytes());
            index.push(0);
        }
        out.extend(ar_header("/", index.len()));
        out.extend_from_slice(&index);
        if index.len() % 2 == 1 {
            out.push(b'\n');
        }
    }

    for (name, data) in members {
        out.extend(ar_header(&format!("{}/", name), data.len()));
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

/// Members of an archive in order
pub fn archive_members(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let archive = object::read::archive::ArchiveFile::parse(data).unwrap();
    archive
        .members()
        .map(|m| {
            let m = m.unwrap();
            (
                String::from_utf8_lossy(m.name()).into_owned(),
                m.data(data).unwrap().to_vec(),
            )
        })
        .collect()
}

/// The static archive `go build -buildmode=c-archive` would leave for Windows
pub fn windows_archive() -> Vec<u8> {
    gnu_archive(&[
        ("go.o".to_string(), coff_object(&EXPORTED[..2], true)),
        ("_cgo_export.o".to_string(), coff_object(&EXPORTED[2..], true)),
        ("gcc_util.o".to_string(), coff_object(&["x_cgo_util"], false)),
    ])
}

fn padded(magic: &[u8], len: usize) -> Vec<u8> {
    let mut data = magic.to_vec();
    data.resize(len, 0);
    data
}

pub fn elf_shared() -> Vec<u8> {
    padded(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0], 256)
}

pub fn macho_thin() -> Vec<u8> {
    padded(&[0xcf, 0xfa, 0xed, 0xfe, 0x07, 0, 0, 0x01], 256)
}

/// Universal Mach-O header listing x86_64 and arm64 slices
pub fn macho_fat() -> Vec<u8> {
    let mut data = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 2];
    for cputype in [object::macho::CPU_TYPE_X86_64, object::macho::CPU_TYPE_ARM64] {
        data.extend_from_slice(&cputype.to_be_bytes());
        data.extend_from_slice(&[0; 16]);
    }
    data.resize(256, 0);
    data
}

/// DOS stub pointing at a PE32+ header, enough for magic detection
pub fn pe_image() -> Vec<u8> {
    let mut data = vec![0u8; 512];
    data[0] = b'M';
    data[1] = b'Z';
    data[0x3c] = 0x40;
    data[0x40..0x44].copy_from_slice(b"PE\0\0");
    data[0x44..0x46].copy_from_slice(&0x8664u16.to_le_bytes());
    // optional header follows the 20-byte file header
    data[0x58..0x5a].copy_from_slice(&0x020bu16.to_le_bytes());
    data
}

// =============================================================================
// Fake command runner
// =============================================================================

/// Emulates the external tools the pipeline drives
pub struct FakeRunner {
    log: Mutex<Vec<Invocation>>,
    failures: Mutex<BTreeMap<String, (i32, String)>>,
    branch: Mutex<String>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(BTreeMap::new()),
            branch: Mutex::new(String::new()),
        }
    }
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every invocation of `program` (or `program subcommand`) fail
    pub fn fail(&self, program: &str, code: i32, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(program.to_string(), (code, stderr.to_string()));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().unwrap().clone()
    }

    /// Invocations of `program`, rendered as argument lists
    pub fn calls(&self, program: &str) -> Vec<Vec<String>> {
        self.invocations()
            .iter()
            .filter(|i| i.program_name() == program)
            .map(|i| i.args_lossy())
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn configured_failure(&self, program: &str, args: &[String]) -> Option<CommandOutput> {
        let failures = self.failures.lock().unwrap();
        let with_sub = args
            .iter()
            .find(|a| !a.starts_with('-') && !a.contains('/'))
            .map(|sub| format!("{} {}", program, sub));
        with_sub
            .and_then(|k| failures.get(&k))
            .or_else(|| failures.get(program))
            .map(|(code, stderr)| CommandOutput::failed(*code, stderr.clone()))
    }

    fn git(&self, args: &[String]) -> CommandOutput {
        if args.first().map(String::as_str) == Some("clone") {
            let branch = args
                .iter()
                .position(|a| a == "--branch")
                .map(|p| args[p + 1].clone())
                .unwrap_or_else(|| "main".to_string());
            let dest = PathBuf::from(args.last().unwrap());
            fs::create_dir_all(dest.join(".git")).unwrap();
            *self.branch.lock().unwrap() = branch;
            return CommandOutput::ok("");
        }

        // git -C <path> <rest>
        let (path, rest) = match args {
            [c, path, rest @ ..] if c == "-C" => (PathBuf::from(path), rest),
            _ => return CommandOutput::failed(129, "usage: git"),
        };
        if !path.join(".git").is_dir() {
            return CommandOutput::failed(128, "fatal: not a git repository");
        }
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        match rest.as_slice() {
            ["rev-parse", "--show-toplevel"] => CommandOutput::ok(format!("{}\n", path.display())),
            ["rev-parse", "--abbrev-ref", "HEAD"] => {
                CommandOutput::ok(format!("{}\n", self.branch.lock().unwrap()))
            }
            ["rev-parse", "HEAD"] => CommandOutput::ok(format!("{}\n", REVISION)),
            ["checkout", "-B", branch, ..] => {
                *self.branch.lock().unwrap() = branch.to_string();
                CommandOutput::ok("")
            }
            _ => CommandOutput::ok(""),
        }
    }

    fn go(&self, invocation: &Invocation, args: &[String]) -> CommandOutput {
        let output = PathBuf::from(&args[args.iter().position(|a| a == "-o").unwrap() + 1]);
        let archive = args.iter().any(|a| a == "-buildmode=c-archive");
        let goos = invocation.env.get("GOOS").map(String::as_str).unwrap_or("linux");

        let binary = match (archive, goos) {
            (true, "windows") => windows_archive(),
            (true, _) => gnu_archive(&[("go.o".to_string(), b"go object file".to_vec())]),
            (false, "windows") => pe_image(),
            (false, "darwin") | (false, "ios") => macho_thin(),
            (false, _) => elf_shared(),
        };
        fs::write(&output, binary).unwrap();
        fs::write(output.with_extension("h"), HEADER).unwrap();
        CommandOutput::ok("")
    }

    fn ar(&self, invocation: &Invocation, args: &[String]) -> CommandOutput {
        let cwd = invocation.cwd.clone().unwrap_or_default();
        match args.first().map(String::as_str) {
            Some("x") => {
                let data = fs::read(&args[1]).unwrap();
                for (name, bytes) in archive_members(&data) {
                    fs::write(cwd.join(name), bytes).unwrap();
                }
            }
            Some("rcs") => {
                let members: Vec<(String, Vec<u8>)> = args[2..]
                    .iter()
                    .map(|p| {
                        let path = Path::new(p);
                        (
                            path.file_name().unwrap().to_string_lossy().into_owned(),
                            fs::read(path).unwrap(),
                        )
                    })
                    .collect();
                fs::write(&args[1], gnu_archive(&members)).unwrap();
            }
            Some("s") => {
                let data = fs::read(&args[1]).unwrap();
                fs::write(&args[1], gnu_archive(&archive_members(&data))).unwrap();
            }
            _ => return CommandOutput::failed(1, "ar: unsupported operation"),
        }
        CommandOutput::ok("")
    }

    fn objcopy(&self, args: &[String]) -> CommandOutput {
        let drop: Vec<String> = args
            .iter()
            .filter_map(|a| a.strip_prefix("--remove-section="))
            .map(str::to_string)
            .collect();
        let path = args.last().unwrap();
        let data = fs::read(path).unwrap();
        fs::write(path, rebuild_coff(&data, &drop)).unwrap();
        CommandOutput::ok("")
    }
}

impl CommandRunner for FakeRunner {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        self.log.lock().unwrap().push(invocation.clone());
        let program = invocation.program_name();
        let args = invocation.args_lossy();
        if let Some(failure) = self.configured_failure(&program, &args) {
            return Ok(failure);
        }

        let output = match program.as_str() {
            "git" => self.git(&args),
            "go" => self.go(invocation, &args),
            "ar" | "llvm-ar" => self.ar(invocation, &args),
            "objcopy" | "llvm-objcopy" | "x86_64-w64-mingw32-objcopy" => self.objcopy(&args),
            "lipo" => {
                let out = &args[args.iter().position(|a| a == "-output").unwrap() + 1];
                fs::write(out, macho_fat()).unwrap();
                CommandOutput::ok("")
            }
            "xcrun" => CommandOutput::ok("/Applications/Xcode.app/SDKs/iPhoneOS.sdk\n"),
            // ranlib, strip, upx: leave the file as it is
            _ => CommandOutput::ok(""),
        };
        Ok(output)
    }
}

/// A fetcher whose downloads always fail
pub struct OfflineFetch;

impl Fetch for OfflineFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, CompressorError> {
        Err(CompressorError::Download {
            url: url.to_string(),
            message: "network unreachable".to_string(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Create an executable stub named `name` in `dir`
pub fn fake_tool(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Working directory with native sources, tool stubs and a fake runner
pub struct Harness {
    pub dir: TempDir,
    pub bin: PathBuf,
    pub runner: Arc<FakeRunner>,
}

impl Harness {
    pub fn new(tools: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        for tool in tools {
            fake_tool(&bin, tool);
        }
        let native = dir.path().join("native");
        fs::create_dir_all(&native).unwrap();
        fs::write(native.join("go.mod"), "module native\n").unwrap();
        fs::write(native.join("exports.go"), "package main\n").unwrap();
        fs::write(native.join("README.md"), "not copied\n").unwrap();
        Self {
            dir,
            bin,
            runner: FakeRunner::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        self.dir.path()
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub fn checkout(&self) -> PathBuf {
        self.dir.path().join("dd-trace-go")
    }

    pub fn config(&self, env: &[(&str, &str)]) -> EffectiveConfig {
        let env: BTreeMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EffectiveConfig::build(self.dir.path(), &env, None).unwrap()
    }

    fn resolver(&self) -> ToolResolver {
        ToolResolver::isolated(vec![self.bin.clone()])
    }

    fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }

    pub fn linux(&self, env: &[(&str, &str)]) -> Pipeline {
        let toolchain = LinuxToolchain::new(self.resolver(), Arch::Amd64, None);
        Pipeline::new(&self.config(env), self.workdir(), Arch::Amd64, self.runner(), Box::new(toolchain))
    }

    pub fn windows(&self, env: &[(&str, &str)], fetch: Box<dyn Fetch>) -> Pipeline {
        let cache = CompressorCache::new(self.dir.path().join("cache"), "4.2.4", Os::Windows, Arch::Amd64)
            .with_fetcher(fetch);
        let toolchain = WindowsToolchain::new(self.resolver(), Some(cache));
        Pipeline::new(&self.config(env), self.workdir(), Arch::Amd64, self.runner(), Box::new(toolchain))
    }

    pub fn macos(&self, env: &[(&str, &str)]) -> Pipeline {
        let toolchain = MacToolchain::new(self.resolver(), Arch::Arm64, self.runner());
        Pipeline::new(&self.config(env), self.workdir(), Arch::Arm64, self.runner(), Box::new(toolchain))
    }
}

/// Section names of every member that still carries unwind tables
pub fn unwind_members(archive: &[u8]) -> BTreeSet<String> {
    archive_members(archive)
        .into_iter()
        .filter(|(_, data)| {
            object::File::parse(data.as_slice())
                .map(|f| {
                    f.sections()
                        .any(|s| matches!(s.name(), Ok(".pdata") | Ok(".xdata")))
                })
                .unwrap_or(false)
        })
        .map(|(name, _)| name)
        .collect()
}
