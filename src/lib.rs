//! topt-native: build pipeline for the libtestoptimization native library
//!
//! Compiles the native test-optimization library from the tracer's Go
//! sources for every supported (OS, architecture, link mode), applies the
//! per-platform post-processing, fuses macOS architectures and packages each
//! logical output as a zip with a SHA-256 digest for the language SDKs.

pub mod app;
pub mod artifact;
pub mod build;
pub mod config;
pub mod fuse;
pub mod pipeline;
pub mod postprocess;
pub mod process;
pub mod source;
pub mod state;
pub mod summary;
pub mod toolchain;

pub use artifact::{BuildArtifact, PackagedArtifact, Packager, UniversalArtifact};
pub use config::{EffectiveConfig, PipelineSettings};
pub use pipeline::{Pipeline, PipelineError};
pub use process::{CommandRunner, Invocation, SystemRunner};
pub use summary::BuildSummary;
pub use topt_target::{Arch, BuildTarget, LinkMode, Os, TargetKey, TargetMatrix};
