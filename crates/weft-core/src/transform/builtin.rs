//! Built-in transformers.
//!
//! These stand in for the external processors a real project plugs in
//! (transpilers, CSS toolchains, asset optimisers). They only move text
//! between representations and never parse the languages involved.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use weft_util::hash::blake3_bytes;

use super::{Content, ContentKind, Finalized, TransformContext, Transformer};
use crate::artifact::{Artifact, ArtifactKind};
use crate::config::BuildConfig;
use crate::env::js_string;
use crate::error::TransformError;
use crate::template::{render, NameVars};

/// `source → script`. Validates the text and passes it through.
pub struct ScriptTransformer;

impl Transformer for ScriptTransformer {
    fn name(&self) -> &str {
        "script"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Source]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Script
    }

    fn transform(
        &self,
        input: Content,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        Ok(Content::Script(input.into_text(self.name())?))
    }
}

/// `source → script`. Turns a JSON document into a module whose default
/// export is the parsed value.
pub struct JsonTransformer;

impl Transformer for JsonTransformer {
    fn name(&self) -> &str {
        "json"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Source]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Script
    }

    fn transform(
        &self,
        input: Content,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        let text = input.into_text(self.name())?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| TransformError::failed(self.name(), e.to_string()))?;
        Ok(Content::Script(format!("export default {value};\n")))
    }
}

/// `source | markup → script`. Exports the document as a string.
pub struct HtmlTransformer;

impl Transformer for HtmlTransformer {
    fn name(&self) -> &str {
        "html"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Source, ContentKind::Markup]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Script
    }

    fn transform(
        &self,
        input: Content,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        let text = input.into_text(self.name())?;
        Ok(Content::Script(format!("export default {};\n", js_string(&text))))
    }
}

/// `source | stylesheet → stylesheet`. Lifts local `@import` statements
/// out of the text and declares them as module dependencies.
pub struct CssTransformer;

impl Transformer for CssTransformer {
    fn name(&self) -> &str {
        "css"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Source, ContentKind::Stylesheet]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Stylesheet
    }

    fn transform(
        &self,
        input: Content,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        let text = input.into_text(self.name())?;
        let (css, imports) = lift_css_imports(&text);
        for (specifier, line) in imports {
            ctx.declare_import(specifier, line);
        }
        Ok(Content::Stylesheet(css))
    }
}

/// Remove `@import` statements that name local files. Remote URLs stay.
fn lift_css_imports(css: &str) -> (String, Vec<(String, u32)>) {
    let mut out = String::with_capacity(css.len());
    let mut imports = Vec::new();
    let mut rest = css;
    let mut line = 1u32;

    loop {
        let comment = rest.find("/*");
        let at = rest.find("@import");
        match (comment, at) {
            (Some(c), Some(a)) if c < a => {
                let end = rest[c + 2..].find("*/").map_or(rest.len(), |e| c + 2 + e + 2);
                line += count_lines(&rest[..end]);
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            }
            (_, Some(a)) => {
                line += count_lines(&rest[..a]);
                out.push_str(&rest[..a]);
                let stmt_end = rest[a..].find(';').map_or(rest.len(), |e| a + e + 1);
                let stmt = &rest[a..stmt_end];
                match css_import_target(stmt) {
                    Some(target) if !is_remote(&target) => {
                        imports.push((target, line));
                        line += count_lines(stmt);
                        let after = &rest[stmt_end..];
                        rest = match after.strip_prefix('\n') {
                            Some(r) => {
                                line += 1;
                                r
                            }
                            None => after,
                        };
                    }
                    _ => {
                        line += count_lines(stmt);
                        out.push_str(stmt);
                        rest = &rest[stmt_end..];
                    }
                }
            }
            _ => {
                out.push_str(rest);
                return (out, imports);
            }
        }
    }
}

fn css_import_target(stmt: &str) -> Option<String> {
    let body = stmt.strip_prefix("@import")?.trim_start();
    let body = body
        .strip_prefix("url(")
        .map_or(body, str::trim_start);
    let quote = body.chars().next()?;
    if quote == '"' || quote == '\'' {
        let inner = &body[1..];
        return inner.find(quote).map(|end| inner[..end].to_string());
    }
    // Unquoted url(...)
    let end = body.find(|c: char| c == ')' || c.is_whitespace() || c == ';')?;
    Some(body[..end].to_string()).filter(|s| !s.is_empty())
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//")
}

fn count_lines(s: &str) -> u32 {
    u32::try_from(s.matches('\n').count()).unwrap_or(u32::MAX)
}

/// `stylesheet → script`. Moves the stylesheet into the chunk's extracted
/// CSS file and leaves an empty module behind.
pub struct ExtractCssTransformer;

impl Transformer for ExtractCssTransformer {
    fn name(&self) -> &str {
        "extract-css"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Stylesheet]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Script
    }

    fn transform(
        &self,
        input: Content,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        ctx.extract_style(input.into_text(self.name())?);
        Ok(Content::Script("export {};\n".to_string()))
    }
}

/// `source → script`. Emits the file as an asset under a hashed name and
/// exports its public URL.
///
/// Options: `name` (template, default `[name].[hash:10].[ext]`, where
/// `[hash]` is the hash of the file bytes), `output_path` (directory inside
/// the output, default none) and `public_path` (defaults to
/// `output.public_path`).
pub struct FileTransformer {
    name_template: String,
    output_path: String,
    public_path: String,
}

impl Default for FileTransformer {
    fn default() -> Self {
        Self {
            name_template: "[name].[hash:10].[ext]".to_string(),
            output_path: String::new(),
            public_path: "/".to_string(),
        }
    }
}

impl Transformer for FileTransformer {
    fn name(&self) -> &str {
        "file"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Source]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Script
    }

    fn configure(
        &mut self,
        options: &serde_json::Value,
        config: &BuildConfig,
    ) -> Result<(), TransformError> {
        self.public_path = config.output.public_path.clone();

        let map = match options {
            serde_json::Value::Null => return Ok(()),
            serde_json::Value::Object(map) => map,
            _ => return Err(TransformError::invalid_options("file", "expected an object")),
        };

        for (key, value) in map {
            let Some(s) = value.as_str() else {
                return Err(TransformError::invalid_options(
                    "file",
                    format!("'{key}' must be a string"),
                ));
            };
            match key.as_str() {
                "name" => self.name_template = s.to_string(),
                "output_path" => {
                    let trimmed = s.trim_matches('/');
                    self.output_path = if trimmed.is_empty() {
                        String::new()
                    } else {
                        format!("{trimmed}/")
                    };
                }
                "public_path" => self.public_path = s.to_string(),
                other => {
                    return Err(TransformError::invalid_options(
                        "file",
                        format!("unknown option '{other}'"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn transform(
        &self,
        input: Content,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        let bytes = input.into_bytes();
        let hash = blake3_bytes(&bytes);
        let ext = ctx
            .module
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let file_name = render(
            &self.name_template,
            &NameVars {
                name: ctx.stem(),
                id: ctx.id,
                ext,
                hash: &hash,
                chunkhash: &hash,
                contenthash: &hash,
            },
        );
        let rel = format!("{}{file_name}", self.output_path);

        let mut url = self.public_path.clone();
        if !url.is_empty() && !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(&rel);

        ctx.emit_artifact(Artifact::new(rel, ArtifactKind::Asset, bytes));
        Ok(Content::Script(format!("export default {};\n", js_string(&url))))
    }
}

/// `script → script`. Replaces free expressions such as
/// `process.env.NODE_ENV` with configured replacement text.
///
/// Matches respect identifier boundaries and skip strings and comments.
/// Longer keys win, so `process.env.API_URL` is replaced before a `process`
/// key could match. Options are a `{ "expr": replacement }` object;
/// non-string replacements are inserted as JSON.
#[derive(Default)]
pub struct DefineTransformer {
    /// Longest key first.
    table: Vec<(String, String)>,
    hits: Vec<AtomicUsize>,
    warn_unused: BTreeSet<String>,
}

impl DefineTransformer {
    #[must_use]
    pub fn new(table: BTreeMap<String, String>) -> Self {
        let mut define = Self::default();
        define.set_table(table);
        define
    }

    /// Keys reported by `finalize` when no module used them.
    #[must_use]
    pub fn warn_unused<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.warn_unused.extend(keys.into_iter().map(Into::into));
        self
    }

    fn set_table(&mut self, table: BTreeMap<String, String>) {
        let mut entries: Vec<(String, String)> = table.into_iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        self.hits = entries.iter().map(|_| AtomicUsize::new(0)).collect();
        self.table = entries;
    }

    fn replace(&self, code: &str) -> String {
        let mut out = String::with_capacity(code.len());
        let bytes = code.as_bytes();
        let mut i = 0;

        while i < code.len() {
            let c = bytes[i];

            // Comments
            if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
                let end = code[i..].find('\n').map_or(code.len(), |e| i + e);
                out.push_str(&code[i..end]);
                i = end;
                continue;
            }
            if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
                let end = code[i + 2..].find("*/").map_or(code.len(), |e| i + 2 + e + 2);
                out.push_str(&code[i..end]);
                i = end;
                continue;
            }

            // Strings
            if matches!(c, b'"' | b'\'' | b'`') {
                let end = string_end(bytes, i);
                out.push_str(&code[i..end]);
                i = end;
                continue;
            }

            let at_boundary = i == 0 || (!is_ident_byte(bytes[i - 1]) && bytes[i - 1] != b'.');
            if at_boundary {
                if let Some((idx, key_len)) = self.match_at(code, i) {
                    self.hits[idx].fetch_add(1, Ordering::Relaxed);
                    out.push_str(&self.table[idx].1);
                    i += key_len;
                    continue;
                }
            }

            let ch_len = code[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&code[i..i + ch_len]);
            i += ch_len;
        }

        out
    }

    fn match_at(&self, code: &str, i: usize) -> Option<(usize, usize)> {
        let rest = &code[i..];
        self.table.iter().enumerate().find_map(|(idx, (key, _))| {
            if !rest.starts_with(key.as_str()) {
                return None;
            }
            let next = rest.as_bytes().get(key.len()).copied();
            if next.is_some_and(is_ident_byte) {
                return None;
            }
            Some((idx, key.len()))
        })
    }
}

pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Byte index just past the string literal starting at `start`.
pub(crate) fn string_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

impl Transformer for DefineTransformer {
    fn name(&self) -> &str {
        "define"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Script]
    }

    fn produces(&self) -> ContentKind {
        ContentKind::Script
    }

    fn configure(
        &mut self,
        options: &serde_json::Value,
        _config: &BuildConfig,
    ) -> Result<(), TransformError> {
        let map = match options {
            serde_json::Value::Null => return Ok(()),
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(TransformError::invalid_options(
                    "define",
                    "expected an object of expression to replacement",
                ))
            }
        };

        let mut table: BTreeMap<String, String> = self.table.drain(..).collect();
        for (key, value) in map {
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            table.insert(key.clone(), replacement);
            self.warn_unused.insert(key.clone());
        }
        self.set_table(table);
        Ok(())
    }

    fn transform(
        &self,
        input: Content,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Content, TransformError> {
        let code = input.into_text(self.name())?;
        if self.table.is_empty() {
            return Ok(Content::Script(code));
        }
        Ok(Content::Script(self.replace(&code)))
    }

    fn finalize(&self) -> Result<Finalized, TransformError> {
        let warnings = self
            .table
            .iter()
            .zip(&self.hits)
            .filter(|((key, _), hits)| {
                self.warn_unused.contains(key) && hits.load(Ordering::Relaxed) == 0
            })
            .map(|((key, _), _)| format!("define '{key}' was never used"))
            .collect();
        Ok(Finalized {
            artifacts: Vec::new(),
            warnings,
        })
    }
}
