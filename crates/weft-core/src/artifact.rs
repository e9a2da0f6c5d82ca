//! Files pending emission.

use serde::Serialize;

/// Where an output file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Chunk script.
    Script,
    /// Stylesheet extracted from a chunk's modules.
    Stylesheet,
    /// File emitted by a transformer, such as an image.
    Asset,
    /// File copied verbatim from the project.
    Static,
    /// Generated HTML document.
    Document,
    /// `manifest.json`.
    Manifest,
}

/// A file the emitter will write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the output directory, `/`-separated.
    pub path: String,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, kind: ArtifactKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            kind,
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
