//! Linker directives for static consumers

use topt_target::{LinkMode, Os, LIBRARY_NAME};

/// Cargo directives a build script emits to link the library from `dir`.
///
/// The Go runtime inside the archive needs `resolv` on Unix and a few
/// frameworks on macOS.
pub fn cargo_link_directives(os: Os, link_mode: LinkMode, dir: &std::path::Path) -> Vec<String> {
    let kind = match link_mode {
        LinkMode::Static => "static",
        LinkMode::Dynamic => "dylib",
    };

    let mut directives = vec![
        format!("cargo:rustc-link-search=native={}", dir.display()),
        format!("cargo:rustc-link-lib={}={}", kind, LIBRARY_NAME),
    ];

    if os != Os::Windows {
        directives.push("cargo:rustc-link-lib=dylib=resolv".to_string());
    }

    if os.is_apple() {
        for framework in ["CoreFoundation", "IOKit", "Security"] {
            directives.push(format!("cargo:rustc-link-lib=framework={}", framework));
        }
    }

    directives
}
