#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Build-graph orchestration: resolve imports, run modules through their
//! rule's transformer chain, split the module graph into hashed chunks and
//! emit them atomically.

pub mod artifact;
pub mod build;
pub mod cancel;
pub mod chunks;
pub mod config;
pub mod emit;
pub mod env;
pub mod error;
pub mod graph;
pub mod imports;
pub mod resolve;
pub mod template;
pub mod transform;

pub use artifact::{Artifact, ArtifactKind};
pub use build::{Build, BuildReport, BuildState, BUILD_REPORT_SCHEMA_VERSION};
pub use cancel::CancellationToken;
pub use config::{BuildConfig, ConfigOverrides, Mode, SplitPolicy};
pub use error::{BuildError, ConfigError, TransformError};
pub use imports::scan_imports;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
