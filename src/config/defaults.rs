//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

use crate::toolchain::compressor::{DEFAULT_UPX_VERSION, UPX_URL_TEMPLATE};

/// Files copied from the overlay directory into the checkout
pub const DEFAULT_OVERLAY_PATTERNS: &[&str] = &[
    "*.go",
    "*.c",
    "*.h",
    "go.mod",
    "go.sum",
    "Makefile",
    "Dockerfile*",
    "*.sh",
    "*.ps1",
];

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Tracer repository the native library is compiled from
    pub source_url: String,

    /// Branch kept checked out (default: "main")
    pub source_branch: String,

    /// Checkout location, relative to the working directory
    pub checkout_dir: String,

    /// Package directory inside the checkout that `go build` runs in
    pub native_subpath: String,

    /// Directory holding the native sources copied into the checkout
    pub overlay_from: String,

    pub overlay_patterns: Vec<String>,

    /// Output root (default: "output")
    pub output_dir: String,

    /// "ci" or "localdev"
    pub mode: String,

    /// "abort" or "continue"
    pub failure_policy: String,

    pub compressor_version: String,

    pub compressor_url_template: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            source_url: "https://github.com/DataDog/dd-trace-go.git".to_string(),
            source_branch: "main".to_string(),
            checkout_dir: "dd-trace-go".to_string(),
            native_subpath: "internal/civisibility/native".to_string(),
            overlay_from: "native".to_string(),
            overlay_patterns: DEFAULT_OVERLAY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            output_dir: "output".to_string(),
            mode: "ci".to_string(),
            failure_policy: "abort".to_string(),
            compressor_version: DEFAULT_UPX_VERSION.to_string(),
            compressor_url_template: UPX_URL_TEMPLATE.to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "source": {
                "remote_url": self.source_url,
                "branch": self.source_branch,
                "checkout_dir": self.checkout_dir,
                "native_subpath": self.native_subpath
            },
            "overlay": {
                "from": self.overlay_from,
                "patterns": self.overlay_patterns
            },
            "output": {
                "dir": self.output_dir,
                "mode": self.mode
            },
            "failure_policy": self.failure_policy,
            "targets": [],
            "compressor": {
                "version": self.compressor_version,
                "url_template": self.compressor_url_template
            },
            "flags": {
                "cflags": [],
                "ldflags": []
            }
        })
    }
}
