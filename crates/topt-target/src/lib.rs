//! Target model for the libtestoptimization native library
//!
//! Describes what gets built: operating systems, architectures, link modes,
//! the per-target compiler flags and the output names the SDKs depend on.
//! This crate does no I/O.

pub mod matrix;
pub mod platform;
pub mod target;

pub use matrix::{FusionGroup, TargetMatrix};
pub use platform::{Arch, LinkMode, Os, PlatformError};
pub use target::{
    BuildTarget, TargetKey, ARTIFACT_STEM, BUILD_TAG, IOS_MIN_VERSION, LIBRARY_NAME,
    MACOS_MIN_VERSION,
};
