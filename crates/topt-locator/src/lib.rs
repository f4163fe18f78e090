//! SDK-side lookup of the libtestoptimization native library
//!
//! Language SDKs consume the packaged outputs of the native pipeline. This
//! crate encodes that contract: library file names, release asset names,
//! the search-path and development-mode overrides, and link directives.

mod link;
mod locate;

pub use link::cargo_link_directives;
pub use locate::{
    library_file_name, parse_target_triple, release_asset_name, Locator, LocatorEnv,
    NativeLocation, DEFAULT_DEV_OUTPUT_DIR, DEV_MODE_ENV, DEV_OUTPUT_DIR_ENV,
    NATIVE_SEARCH_PATH_ENV, RELEASE_URL_PREFIX, SKIP_NATIVE_INSTALL_ENV,
};

/// Locator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("unsupported target triple: {0}")]
    UnsupportedTarget(String),
}
