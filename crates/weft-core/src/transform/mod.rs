//! Transformer capability interface.
//!
//! A transformer turns one content representation into another. Each
//! declares which [`ContentKind`]s it accepts and which it produces; rules
//! chain transformers and the [`Pipeline`] rejects chains whose adjacent
//! kinds do not line up before any module is read.
//!
//! ## Lifecycle
//!
//! 1. `configure` once per rule, with that rule's options
//! 2. `transform` once per matched module, possibly from several workers at once
//! 3. `finalize` once after the module graph is complete
//!
//! ## Example
//!
//! ```ignore
//! use weft_core::transform::{Content, ContentKind, TransformContext, Transformer};
//! use weft_core::error::TransformError;
//!
//! struct Upper;
//!
//! impl Transformer for Upper {
//!     fn name(&self) -> &str { "upper" }
//!     fn accepts(&self) -> &[ContentKind] { &[ContentKind::Script] }
//!     fn produces(&self) -> ContentKind { ContentKind::Script }
//!
//!     fn transform(&self, input: Content, _ctx: &mut TransformContext<'_>) -> Result<Content, TransformError> {
//!         Ok(Content::Script(input.into_text(self.name())?.to_uppercase()))
//!     }
//! }
//! ```

mod builtin;
mod pipeline;
mod registry;

pub use builtin::{
    CssTransformer, DefineTransformer, ExtractCssTransformer, FileTransformer, HtmlTransformer,
    JsonTransformer, ScriptTransformer,
};
pub(crate) use builtin::{is_ident_byte, string_end};
pub use pipeline::{Pipeline, TransformedModule};
pub use registry::TransformerRegistry;

use std::path::Path;

use serde::Serialize;

use crate::artifact::Artifact;
use crate::config::BuildConfig;
use crate::error::TransformError;
use crate::imports::{ImportKind, ImportRef};

/// Representation of module content between transformers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Raw file bytes.
    Source,
    /// JavaScript module text.
    Script,
    /// CSS text.
    Stylesheet,
    /// HTML text.
    Markup,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Script => "script",
            Self::Stylesheet => "stylesheet",
            Self::Markup => "markup",
        }
    }

    /// Kinds a chain may end with: modules must become something a chunk can hold.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Script | Self::Stylesheet)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module content tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Source(Vec<u8>),
    Script(String),
    Stylesheet(String),
    Markup(String),
}

impl Content {
    #[must_use]
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Source(_) => ContentKind::Source,
            Self::Script(_) => ContentKind::Script,
            Self::Stylesheet(_) => ContentKind::Stylesheet,
            Self::Markup(_) => ContentKind::Markup,
        }
    }

    /// Text of the content. Raw bytes must be valid UTF-8; a leading BOM is dropped.
    pub fn into_text(self, transformer: &str) -> Result<String, TransformError> {
        match self {
            Self::Source(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| {
                    TransformError::failed(
                        transformer,
                        format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()),
                    )
                })?;
                Ok(match text.strip_prefix('\u{feff}') {
                    Some(stripped) => stripped.to_string(),
                    None => text,
                })
            }
            Self::Script(s) | Self::Stylesheet(s) | Self::Markup(s) => Ok(s),
        }
    }

    /// Raw bytes of the content.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Source(bytes) => bytes,
            Self::Script(s) | Self::Stylesheet(s) | Self::Markup(s) => s.into_bytes(),
        }
    }
}

/// Per-module state handed to each transformer in a chain.
///
/// Transformers use it to declare imports that do not appear in script text,
/// to emit auxiliary files, and to hand stylesheet text to the chunk's
/// extracted stylesheet.
#[derive(Debug)]
pub struct TransformContext<'a> {
    /// Absolute module path.
    pub module: &'a Path,
    /// Project-relative module id, `/`-separated.
    pub id: &'a str,
    pub config: &'a BuildConfig,
    imports: Vec<ImportRef>,
    artifacts: Vec<Artifact>,
    styles: Vec<String>,
}

impl<'a> TransformContext<'a> {
    #[must_use]
    pub fn new(module: &'a Path, id: &'a str, config: &'a BuildConfig) -> Self {
        Self {
            module,
            id,
            config,
            imports: Vec::new(),
            artifacts: Vec::new(),
            styles: Vec::new(),
        }
    }

    /// Record a dependency on `specifier`, resolved relative to this module.
    pub fn declare_import(&mut self, specifier: impl Into<String>, line: u32) {
        self.imports
            .push(ImportRef::new(specifier, ImportKind::Declared, line));
    }

    /// Register a file for emission.
    pub fn emit_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Move stylesheet text into the owning chunk's extracted stylesheet.
    pub fn extract_style(&mut self, css: impl Into<String>) {
        self.styles.push(css.into());
    }

    /// File stem of the module, used for `[name]` in asset templates.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.module
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
    }

    pub(crate) fn into_parts(self) -> (Vec<ImportRef>, Vec<Artifact>, Vec<String>) {
        (self.imports, self.artifacts, self.styles)
    }
}

/// Output of [`Transformer::finalize`].
#[derive(Debug, Default)]
pub struct Finalized {
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<String>,
}

/// A content transformer.
pub trait Transformer: Send + Sync {
    /// Registry name, used in rule chains.
    fn name(&self) -> &str;

    /// Kinds this transformer can take as input.
    fn accepts(&self) -> &[ContentKind];

    /// Kind this transformer produces.
    fn produces(&self) -> ContentKind;

    /// Apply rule options. Called once before any module is transformed.
    fn configure(
        &mut self,
        _options: &serde_json::Value,
        _config: &BuildConfig,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    /// Transform one module's content.
    fn transform(
        &self,
        input: Content,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError>;

    /// Called once after every module has been transformed.
    fn finalize(&self) -> Result<Finalized, TransformError> {
        Ok(Finalized::default())
    }
}
