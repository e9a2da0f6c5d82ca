//! Output emission.
//!
//! Every file of a build is written into a staging directory next to the
//! output directory. Only once staging is complete is the previous
//! generation swapped out, so a failed or cancelled build leaves the last
//! good output in place.

use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use rustc_hash::FxHashSet as HashSet;
use serde::Serialize;
use walkdir::WalkDir;
use weft_util::fs::{copy_dir_all, remove_dir_if_exists, swap_dir, sibling_path, write_creating_dirs};

use crate::artifact::{Artifact, ArtifactKind};
use crate::cancel::CancellationToken;
use crate::chunks::ChunkSet;
use crate::config::BuildConfig;
use crate::error::BuildError;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title></title>
</head>
<body>
  <div id="root"></div>
</body>
</html>
"#;

/// A file written by the emitter.
#[derive(Debug, Clone, Serialize)]
pub struct EmittedFile {
    pub path: String,
    pub kind: ArtifactKind,
    pub size: usize,
}

/// Summary of one emission.
#[derive(Debug, Clone, Serialize)]
pub struct EmitReport {
    pub out_dir: PathBuf,
    /// Sorted by path.
    pub files: Vec<EmittedFile>,
    pub bytes: u64,
}

/// Writes artifacts into the output directory.
pub struct Emitter<'a> {
    config: &'a BuildConfig,
    cancel: CancellationToken,
}

impl<'a> Emitter<'a> {
    #[must_use]
    pub fn new(config: &'a BuildConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Stage `artifacts` and swap them into the output directory.
    ///
    /// When two artifacts share a path the later one wins.
    pub fn emit(&self, artifacts: Vec<Artifact>) -> Result<EmitReport, BuildError> {
        let out_dir = self.config.out_dir();
        let _span = tracing::info_span!("emit", out_dir = %out_dir.display()).entered();

        let artifacts = dedupe(artifacts);
        for artifact in &artifacts {
            if !is_safe_relative(&artifact.path) {
                return Err(BuildError::emit_io(
                    out_dir.join(&artifact.path),
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "artifact path escapes the output directory",
                    ),
                ));
            }
        }

        let staging = sibling_path(&out_dir, "staging");
        remove_dir_if_exists(&staging).map_err(|e| BuildError::emit_io(&staging, e))?;

        let result = self.stage(&out_dir, &staging, &artifacts).and_then(|()| {
            self.cancel.check()?;
            swap_dir(&staging, &out_dir).map_err(|e| BuildError::emit_io(&out_dir, e))
        });

        if let Err(err) = result {
            if let Err(e) = remove_dir_if_exists(&staging) {
                tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
            return Err(err);
        }

        let mut files: Vec<EmittedFile> = artifacts
            .iter()
            .map(|a| EmittedFile {
                path: a.path.clone(),
                kind: a.kind,
                size: a.size(),
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let bytes: u64 = files.iter().map(|f| f.size as u64).sum();

        tracing::info!(files = files.len(), bytes, "output written");
        Ok(EmitReport {
            out_dir,
            files,
            bytes,
        })
    }

    fn stage(&self, out_dir: &Path, staging: &Path, artifacts: &[Artifact]) -> Result<(), BuildError> {
        std::fs::create_dir_all(staging).map_err(|e| BuildError::emit_io(staging, e))?;

        if !self.config.output.clean && out_dir.is_dir() {
            let kept = copy_dir_all(out_dir, staging).map_err(|e| BuildError::emit_io(out_dir, e))?;
            tracing::debug!(kept, "seeded staging with previous output");
        }

        artifacts.par_iter().try_for_each(|artifact| {
            write_creating_dirs(&staging.join(&artifact.path), &artifact.bytes)
                .map_err(|e| BuildError::emit_io(out_dir.join(&artifact.path), e))
        })
    }
}

/// Keep the last artifact for each path, preserving first-seen order.
fn dedupe(artifacts: Vec<Artifact>) -> Vec<Artifact> {
    let mut seen = HashSet::default();
    let mut kept: Vec<Artifact> = artifacts
        .into_iter()
        .rev()
        .filter(|a| {
            let fresh = seen.insert(a.path.clone());
            if !fresh {
                tracing::warn!(path = %a.path, "two outputs share a path, keeping the later one");
            }
            fresh
        })
        .collect();
    kept.reverse();
    kept
}

fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Read the configured static copy patterns into artifacts.
///
/// A directory `from` is copied recursively under `to` (default: its own
/// name); a file lands at `to` (default: its file name).
pub fn static_copies(config: &BuildConfig) -> Result<Vec<Artifact>, BuildError> {
    let mut artifacts = Vec::new();

    for pattern in &config.copy {
        let from = config.root.join(&pattern.from);
        let default_to = from
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let to = match &pattern.to {
            Some(to) => to.to_string_lossy().replace('\\', "/"),
            None => default_to,
        };
        let to = to.trim_matches('/');

        if from.is_dir() {
            for entry in WalkDir::new(&from).sort_by_file_name() {
                let entry = entry.map_err(|e| BuildError::emit_io(&from, e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&from) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                let bytes =
                    std::fs::read(entry.path()).map_err(|e| BuildError::emit_io(entry.path(), e))?;
                let path = if to.is_empty() { rel } else { format!("{to}/{rel}") };
                artifacts.push(Artifact::new(path, ArtifactKind::Static, bytes));
            }
        } else {
            let bytes = std::fs::read(&from).map_err(|e| BuildError::emit_io(&from, e))?;
            artifacts.push(Artifact::new(to.to_string(), ArtifactKind::Static, bytes));
        }
    }

    Ok(artifacts)
}

/// Generate the HTML document referencing every entry's chunks.
///
/// Stylesheets are injected before `</head>` and scripts before `</body>`,
/// in load order. Returns `None` when HTML generation is disabled.
pub fn html_document(config: &BuildConfig, chunks: &ChunkSet) -> Result<Option<Artifact>, BuildError> {
    if !config.html.enabled {
        return Ok(None);
    }

    let template = match &config.html.template {
        Some(path) => {
            let path = config.root.join(path);
            weft_util::fs::read_to_string_lossy(&path).map_err(|e| BuildError::emit_io(&path, e))?
        }
        None => DEFAULT_TEMPLATE.replace(
            "<title></title>",
            &format!("<title>{}</title>", escape_html(&config.html.title)),
        ),
    };

    let public = &config.output.public_path;
    let mut links = String::new();
    let mut scripts = String::new();
    for chunk in chunks.document_order() {
        if let Some(css) = &chunk.css_file {
            links.push_str(&format!(
                "  <link rel=\"stylesheet\" href=\"{}\">\n",
                escape_html(&join_url(public, css))
            ));
        }
        scripts.push_str(&format!(
            "  <script src=\"{}\"></script>\n",
            escape_html(&join_url(public, &chunk.file))
        ));
    }

    let html = inject_before(&template, "</head>", &links);
    let html = inject_before(&html, "</body>", &scripts);
    Ok(Some(Artifact::new(
        config.html.filename.clone(),
        ArtifactKind::Document,
        html,
    )))
}

/// Insert `tags` before the last `marker` (ASCII case-insensitive), or
/// append them when the marker is missing.
pub fn inject_before(html: &str, marker: &str, tags: &str) -> String {
    if tags.is_empty() {
        return html.to_string();
    }
    let lower = html.to_ascii_lowercase();
    match lower.rfind(marker) {
        Some(at) => format!("{}{}{}", &html[..at], tags, &html[at..]),
        None => format!("{html}{tags}"),
    }
}

/// Join the public path prefix and an output-relative file.
#[must_use]
pub fn join_url(public_path: &str, file: &str) -> String {
    if public_path.is_empty() {
        return file.to_string();
    }
    format!("{}/{}", public_path.trim_end_matches('/'), file.trim_start_matches('/'))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyPattern;
    use std::fs;

    fn config(root: &Path) -> BuildConfig {
        BuildConfig::new(root)
    }

    #[test]
    fn test_emit_writes_into_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let report = Emitter::new(&config, CancellationToken::new())
            .emit(vec![
                Artifact::new("main.js", ArtifactKind::Script, "x"),
                Artifact::new("assets/logo.png", ArtifactKind::Asset, vec![1, 2, 3]),
            ])
            .unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.bytes, 4);
        assert_eq!(fs::read(dir.path().join("build/main.js")).unwrap(), b"x");
        assert!(dir.path().join("build/assets/logo.png").exists());
    }

    #[test]
    fn test_clean_replaces_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.js"), "old").unwrap();

        let config = config(dir.path());
        Emitter::new(&config, CancellationToken::new())
            .emit(vec![Artifact::new("main.js", ArtifactKind::Script, "new")])
            .unwrap();

        assert!(!out.join("stale.js").exists());
        assert_eq!(fs::read_to_string(out.join("main.js")).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_no_clean_keeps_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("keep.txt"), "kept").unwrap();

        let mut config = config(dir.path());
        config.output.clean = false;
        Emitter::new(&config, CancellationToken::new())
            .emit(vec![Artifact::new("main.js", ArtifactKind::Script, "new")])
            .unwrap();

        assert_eq!(fs::read_to_string(out.join("keep.txt")).unwrap(), "kept");
        assert!(out.join("main.js").exists());
    }

    #[test]
    fn test_cancelled_emit_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("main.js"), "old").unwrap();

        let config = config(dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let err = Emitter::new(&config, token)
            .emit(vec![Artifact::new("main.js", ArtifactKind::Script, "new")])
            .unwrap_err();

        assert!(matches!(err, BuildError::Cancelled));
        assert_eq!(fs::read_to_string(out.join("main.js")).unwrap(), "old");
        assert!(!sibling_path(&out, "staging").exists());
    }

    #[test]
    fn test_failed_write_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("old.js"), "old").unwrap();

        // `a` cannot be both a file and the directory holding `a/b.js`
        let config = config(dir.path());
        let err = Emitter::new(&config, CancellationToken::new())
            .emit(vec![
                Artifact::new("a", ArtifactKind::Static, "file"),
                Artifact::new("a/b.js", ArtifactKind::Script, "x"),
            ])
            .unwrap_err();

        assert_eq!(err.code(), "BUILD_EMIT_IO");
        let names: Vec<_> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["old.js".to_string()]);
        assert_eq!(fs::read_to_string(out.join("old.js")).unwrap(), "old");
        assert!(!sibling_path(&out, "staging").exists());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let err = Emitter::new(&config, CancellationToken::new())
            .emit(vec![Artifact::new("../evil.js", ArtifactKind::Script, "x")])
            .unwrap_err();
        assert_eq!(err.code(), "BUILD_EMIT_IO");
        assert!(!dir.path().join("evil.js").exists());
    }

    #[test]
    fn test_later_artifact_wins() {
        let kept = dedupe(vec![
            Artifact::new("a.js", ArtifactKind::Script, "1"),
            Artifact::new("b.js", ArtifactKind::Script, "2"),
            Artifact::new("a.js", ArtifactKind::Static, "3"),
        ]);
        let paths: Vec<_> = kept.iter().map(|a| (a.path.as_str(), a.bytes.clone())).collect();
        assert_eq!(paths, vec![("b.js", b"2".to_vec()), ("a.js", b"3".to_vec())]);
    }

    #[test]
    fn test_static_copies() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("public/img")).unwrap();
        fs::write(dir.path().join("public/robots.txt"), "User-agent: *").unwrap();
        fs::write(dir.path().join("public/img/a.png"), [0u8]).unwrap();

        let mut config = config(dir.path());
        config.copy = vec![
            CopyPattern {
                from: "public/robots.txt".into(),
                to: None,
            },
            CopyPattern {
                from: "public/img".into(),
                to: Some("static/img".into()),
            },
        ];
        let copies = static_copies(&config).unwrap();
        let paths: Vec<_> = copies.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["robots.txt", "static/img/a.png"]);
    }

    #[test]
    fn test_inject_before() {
        let html = "<html><HEAD></HEAD><body></body></html>";
        assert_eq!(
            inject_before(html, "</head>", "<link>"),
            "<html><HEAD><link></HEAD><body></body></html>"
        );
        assert_eq!(inject_before("<p>", "</body>", "<script>"), "<p><script>");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("/", "main.js"), "/main.js");
        assert_eq!(join_url("/app/", "main.js"), "/app/main.js");
        assert_eq!(join_url("https://cdn.example.com", "a.js"), "https://cdn.example.com/a.js");
        assert_eq!(join_url("", "a.js"), "a.js");
    }
}
