use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::transform::ContentKind;

/// Stable error codes, mirrored in `--json` output.
pub mod codes {
    pub const UNRESOLVED_IMPORT: &str = "BUILD_UNRESOLVED_IMPORT";
    pub const INCOMPATIBLE_TRANSFORM_CHAIN: &str = "BUILD_INCOMPATIBLE_TRANSFORM_CHAIN";
    pub const MODULE_TRANSFORM: &str = "BUILD_MODULE_TRANSFORM";
    pub const CYCLIC_DEPENDENCY: &str = "BUILD_CYCLIC_DEPENDENCY";
    pub const EMIT_IO: &str = "BUILD_EMIT_IO";
    pub const CONFIG: &str = "BUILD_CONFIG";
    pub const CANCELLED: &str = "BUILD_CANCELLED";
}

/// Error that aborts a build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot resolve '{specifier}' from {}: {reason}{}", .importer.display(), chain_suffix(.import_chain))]
    UnresolvedImport {
        specifier: String,
        importer: PathBuf,
        reason: String,
        /// Entry first, importer last.
        import_chain: Vec<PathBuf>,
    },

    #[error("rule #{rule}: transformer '{transformer}' at position {position} accepts {expected} but receives {found}")]
    IncompatibleTransformChain {
        rule: usize,
        position: usize,
        transformer: String,
        expected: String,
        found: ContentKind,
    },

    #[error("failed to transform {}: {source}{}", .module.display(), chain_suffix(.import_chain))]
    ModuleTransform {
        module: PathBuf,
        import_chain: Vec<PathBuf>,
        #[source]
        source: TransformError,
    },

    #[error("import cycle: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<PathBuf> },

    #[error("failed to write {}: {source}", .path.display())]
    EmitIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedImport { .. } => codes::UNRESOLVED_IMPORT,
            Self::IncompatibleTransformChain { .. } => codes::INCOMPATIBLE_TRANSFORM_CHAIN,
            Self::ModuleTransform { .. } => codes::MODULE_TRANSFORM,
            Self::CyclicDependency { .. } => codes::CYCLIC_DEPENDENCY,
            Self::EmitIo { .. } => codes::EMIT_IO,
            Self::Config(_) => codes::CONFIG,
            Self::Cancelled => codes::CANCELLED,
        }
    }

    /// Module or file the error is about, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::UnresolvedImport { importer, .. } => Some(importer),
            Self::ModuleTransform { module, .. } => Some(module),
            Self::EmitIo { path, .. } => Some(path),
            Self::CyclicDependency { cycle } => cycle.first().map(PathBuf::as_path),
            _ => None,
        }
    }

    pub(crate) fn emit_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::EmitIo {
            path: path.into(),
            source,
        }
    }
}

/// Error raised by a single transformer.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("no rule matches this module")]
    NoMatchingRule,

    #[error("failed to read source: {0}")]
    Read(#[from] std::io::Error),

    #[error("{transformer}: {message}")]
    Failed { transformer: String, message: String },

    #[error("invalid options for '{transformer}': {message}")]
    InvalidOptions { transformer: String, message: String },
}

impl TransformError {
    pub fn failed(transformer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            transformer: transformer.into(),
            message: message.into(),
        }
    }

    pub fn invalid_options(transformer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            transformer: transformer.into(),
            message: message.into(),
        }
    }
}

/// Error loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported config format: {0} (expected .json or .toml)")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no entries specified")]
    NoEntries,

    #[error("duplicate entry name '{0}'")]
    DuplicateEntry(String),

    #[error("rule #{rule}: invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        rule: usize,
        pattern: String,
        message: String,
    },

    #[error("rule #{rule}: unknown transformer '{name}'")]
    UnknownTransformer { rule: usize, name: String },

    #[error("rule #{rule}: empty transformer chain")]
    EmptyChain { rule: usize },

    #[error(transparent)]
    Transformer(#[from] TransformError),
}

fn chain_suffix(chain: &[PathBuf]) -> String {
    if chain.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = chain.iter().map(|p| p.display().to_string()).collect();
    format!(" (import chain: {})", parts.join(" -> "))
}

/// Render a cycle as `[a, b, a]`.
#[must_use]
pub fn format_cycle(cycle: &[PathBuf]) -> String {
    let parts: Vec<String> = cycle.iter().map(|p| p.display().to_string()).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(BuildError::Cancelled.code(), "BUILD_CANCELLED");
        let err = BuildError::CyclicDependency {
            cycle: vec![PathBuf::from("a.ts"), PathBuf::from("b.ts"), PathBuf::from("a.ts")],
        };
        assert_eq!(err.code(), "BUILD_CYCLIC_DEPENDENCY");
        assert_eq!(err.to_string(), "import cycle: [a.ts, b.ts, a.ts]");
    }

    #[test]
    fn test_unresolved_import_message_includes_chain() {
        let err = BuildError::UnresolvedImport {
            specifier: "./missing".to_string(),
            importer: PathBuf::from("/p/src/b.ts"),
            reason: "file not found".to_string(),
            import_chain: vec![PathBuf::from("/p/src/main.ts"), PathBuf::from("/p/src/b.ts")],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("cannot resolve './missing' from /p/src/b.ts"));
        assert!(msg.ends_with("(import chain: /p/src/main.ts -> /p/src/b.ts)"));
        assert_eq!(err.path(), Some(Path::new("/p/src/b.ts")));
    }
}
