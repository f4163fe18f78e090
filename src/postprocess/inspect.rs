//! Static archive inspection

use object::read::archive::ArchiveFile;
use object::{Object, ObjectSection, ObjectSymbol};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use super::PostProcessError;

/// Sections holding Windows structured exception unwind tables
pub const UNWIND_SECTIONS: [&str; 2] = [".pdata", ".xdata"];

/// One archive member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberReport {
    pub name: String,
    pub sections: Vec<String>,

    /// Global symbols the member defines
    pub defined_symbols: BTreeSet<String>,
}

impl MemberReport {
    pub fn unwind_sections(&self) -> Vec<&str> {
        self.sections
            .iter()
            .map(String::as_str)
            .filter(|s| UNWIND_SECTIONS.contains(s))
            .collect()
    }
}

/// Everything the unwind step needs to know about an archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub members: Vec<MemberReport>,

    /// Names in the archive's symbol index
    pub symbol_index: BTreeSet<String>,
}

impl ArchiveReport {
    /// (member, section) pairs that still carry unwind tables
    pub fn unwind_members(&self) -> Vec<(String, String)> {
        self.members
            .iter()
            .flat_map(|m| {
                m.unwind_sections()
                    .into_iter()
                    .map(move |s| (m.name.clone(), s.to_string()))
            })
            .collect()
    }

    /// Symbols a consumer can link against: the index, or the members'
    /// global definitions when the archive has no index
    pub fn exported_symbols(&self) -> BTreeSet<String> {
        if !self.symbol_index.is_empty() {
            return self.symbol_index.clone();
        }
        self.members
            .iter()
            .flat_map(|m| m.defined_symbols.iter().cloned())
            .collect()
    }
}

/// Read an archive's index and every member's sections and symbols.
///
/// Members that are not object files (Go's `__.PKGDEF`) are reported with
/// no sections.
pub fn scan_archive(path: &Path) -> Result<ArchiveReport, PostProcessError> {
    let inspect = |message: String| PostProcessError::Inspect {
        path: path.to_path_buf(),
        message,
    };

    let data = fs::read(path)?;
    let archive = ArchiveFile::parse(&*data).map_err(|e| inspect(e.to_string()))?;

    let mut report = ArchiveReport::default();
    if let Some(symbols) = archive.symbols().map_err(|e| inspect(e.to_string()))? {
        for symbol in symbols {
            let symbol = symbol.map_err(|e| inspect(e.to_string()))?;
            report
                .symbol_index
                .insert(String::from_utf8_lossy(symbol.name()).into_owned());
        }
    }

    for member in archive.members() {
        let member = member.map_err(|e| inspect(e.to_string()))?;
        let name = String::from_utf8_lossy(member.name()).into_owned();
        let bytes = member.data(&*data).map_err(|e| inspect(e.to_string()))?;

        let (sections, defined_symbols) = match object::File::parse(bytes) {
            Ok(file) => (
                file.sections()
                    .filter_map(|s| s.name().ok().map(str::to_string))
                    .collect(),
                file.symbols()
                    .filter(|s| s.is_global() && s.is_definition())
                    .filter_map(|s| s.name().ok().map(str::to_string))
                    .collect(),
            ),
            Err(_) => (Vec::new(), BTreeSet::new()),
        };
        report.members.push(MemberReport {
            name,
            sections,
            defined_symbols,
        });
    }
    Ok(report)
}
