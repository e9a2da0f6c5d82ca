//! Import specifier scanner.
//!
//! Finds the modules a script depends on without parsing it: ES `import`
//! statements, `export ... from` re-exports, `require("...")` calls and
//! dynamic `import("...")` expressions. Comments and string literals are
//! skipped so specifiers mentioned in prose are not picked up.

use rustc_hash::FxHashMap;

/// How a module refers to one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// `import x from "..."` or `import "..."`.
    Static,
    /// `export { x } from "..."`.
    ReExport,
    /// `require("...")`.
    Require,
    /// `import("...")`. Marks a split point for the `async` policy.
    Dynamic,
    /// Declared by a transformer rather than found in script text.
    Declared,
}

impl ImportKind {
    /// Whether the importer needs this dependency before it can run.
    #[must_use]
    pub fn is_static(self) -> bool {
        !matches!(self, Self::Dynamic)
    }
}

/// Import specifier found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Specifier exactly as written.
    pub specifier: String,
    pub kind: ImportKind,
    /// Line number (1-indexed, best-effort).
    pub line: u32,
}

impl ImportRef {
    #[must_use]
    pub fn new(specifier: impl Into<String>, kind: ImportKind, line: u32) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
            line,
        }
    }
}

/// Scan script text for import specifiers.
///
/// Results are in first-appearance order and deduplicated by specifier. A
/// specifier that is imported both statically and dynamically is reported as
/// static, because the importer cannot run without it.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportRef> {
    let mut scanner = Scanner::new(source);
    let mut found = Vec::new();

    while let Some(c) = scanner.peek() {
        match c {
            '\n' => scanner.bump(),
            '/' if scanner.peek_at(1) == Some('/') => scanner.skip_line_comment(),
            '/' if scanner.peek_at(1) == Some('*') => scanner.skip_block_comment(),
            '"' | '\'' | '`' => {
                scanner.read_string();
            }
            _ if scanner.at_keyword("import") => {
                let line = scanner.line;
                scanner.advance(6);
                if let Some((spec, kind)) = scanner.import_clause() {
                    found.push(ImportRef::new(spec, kind, line));
                }
            }
            _ if scanner.at_keyword("export") => {
                let line = scanner.line;
                scanner.advance(6);
                if let Some(spec) = scanner.export_from() {
                    found.push(ImportRef::new(spec, ImportKind::ReExport, line));
                }
            }
            _ if scanner.at_keyword("require") => {
                let line = scanner.line;
                scanner.advance(7);
                if let Some(spec) = scanner.call_argument() {
                    found.push(ImportRef::new(spec, ImportKind::Require, line));
                }
            }
            _ => scanner.bump(),
        }
    }

    dedupe(found)
}

/// Merge repeated specifiers, keeping the first position and upgrading a
/// dynamic reference to static when both appear.
pub(crate) fn dedupe(refs: Vec<ImportRef>) -> Vec<ImportRef> {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut out: Vec<ImportRef> = Vec::with_capacity(refs.len());

    for r in refs {
        if r.specifier.is_empty() {
            continue;
        }
        if let Some(&at) = index.get(&r.specifier) {
            if out[at].kind == ImportKind::Dynamic && r.kind.is_static() {
                out[at].kind = r.kind;
            }
            continue;
        }
        index.insert(r.specifier.clone(), out.len());
        out.push(r);
    }

    out
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if self.peek() == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_line_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.advance(2);
        while let Some(c) = self.peek() {
            if c == '*' && self.peek_at(1) == Some('/') {
                self.advance(2);
                return;
            }
            self.bump();
        }
    }

    fn is_ident(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '$'
    }

    /// Keyword at the cursor with identifier boundaries on both sides.
    /// Member accesses such as `foo.import` do not count.
    fn at_keyword(&self, keyword: &str) -> bool {
        if self.pos > 0 {
            let prev = self.chars[self.pos - 1];
            if Self::is_ident(prev) || prev == '.' {
                return false;
            }
        }
        let mut n = 0;
        for k in keyword.chars() {
            if self.peek_at(n) != Some(k) {
                return false;
            }
            n += 1;
        }
        !self.peek_at(n).is_some_and(Self::is_ident)
    }

    /// Read a quoted string at the cursor, returning its contents.
    fn read_string(&mut self) -> Option<String> {
        let quote = self.peek()?;
        if !matches!(quote, '"' | '\'' | '`') {
            return None;
        }
        self.bump();
        let mut value = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                if let Some(escaped) = self.peek() {
                    value.push(escaped);
                    self.bump();
                }
                continue;
            }
            if c == quote {
                self.bump();
                return Some(value);
            }
            if c == '\n' && quote != '`' {
                return None;
            }
            value.push(c);
            self.bump();
        }
        None
    }

    /// `( "spec" )` following `require` or `import`.
    fn call_argument(&mut self) -> Option<String> {
        self.skip_ws();
        if self.peek() != Some('(') {
            return None;
        }
        self.bump();
        self.skip_ws();
        let spec = self.read_string()?;
        // Template literals with substitutions are not static specifiers.
        if spec.contains("${") {
            return None;
        }
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
        }
        Some(spec)
    }

    /// Everything after the `import` keyword.
    fn import_clause(&mut self) -> Option<(String, ImportKind)> {
        self.skip_ws();
        match self.peek()? {
            '(' => self.call_argument().map(|s| (s, ImportKind::Dynamic)),
            // `import.meta`
            '.' => None,
            '"' | '\'' => self.read_string().map(|s| (s, ImportKind::Static)),
            _ => self.from_clause(1000).map(|s| (s, ImportKind::Static)),
        }
    }

    /// Everything after the `export` keyword. Only re-exports carry a specifier.
    fn export_from(&mut self) -> Option<String> {
        self.skip_ws();
        match self.peek()? {
            '{' | '*' => self.from_clause(500),
            _ => None,
        }
    }

    /// Scan forward to `from "spec"`, giving up at `;` or after `limit` chars.
    fn from_clause(&mut self, limit: usize) -> Option<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ';' || self.pos - start > limit {
                return None;
            }
            if self.at_keyword("from") {
                self.advance(4);
                self.skip_ws();
                return self.read_string();
            }
            if matches!(c, '"' | '\'' | '`') {
                // A string before `from` means this is not an import clause.
                return None;
            }
            self.bump();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(source: &str) -> Vec<(String, ImportKind)> {
        scan_imports(source)
            .into_iter()
            .map(|r| (r.specifier, r.kind))
            .collect()
    }

    #[test]
    fn test_static_imports() {
        let source = r#"
import foo from "./foo";
import { a, b } from './ab';
import * as ns from "./ns";
import "./side-effect.css";
"#;
        assert_eq!(
            specs(source),
            vec![
                ("./foo".to_string(), ImportKind::Static),
                ("./ab".to_string(), ImportKind::Static),
                ("./ns".to_string(), ImportKind::Static),
                ("./side-effect.css".to_string(), ImportKind::Static),
            ]
        );
    }

    #[test]
    fn test_multiline_import() {
        let source = "import {\n  one,\n  two,\n} from './many';\n";
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].specifier, "./many");
        assert_eq!(imports[0].line, 1);
    }

    #[test]
    fn test_dynamic_import() {
        let source = r#"const page = await import("./pages/about");"#;
        assert_eq!(
            specs(source),
            vec![("./pages/about".to_string(), ImportKind::Dynamic)]
        );
    }

    #[test]
    fn test_dynamic_template_with_substitution_is_skipped() {
        let source = "const page = import(`./pages/${name}`);";
        assert!(scan_imports(source).is_empty());
    }

    #[test]
    fn test_reexport_and_require() {
        let source = r#"
export { x } from "./x";
export * from './star';
export const y = 1;
const z = require("./z");
"#;
        assert_eq!(
            specs(source),
            vec![
                ("./x".to_string(), ImportKind::ReExport),
                ("./star".to_string(), ImportKind::ReExport),
                ("./z".to_string(), ImportKind::Require),
            ]
        );
    }

    #[test]
    fn test_comments_and_strings_ignored() {
        let source = r#"
// import a from "./commented";
/* import b from "./blocked"; */
const s = "import c from './quoted'";
import real from "./real";
"#;
        assert_eq!(specs(source), vec![("./real".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_keyword_boundaries() {
        let source = r#"
const reimport = 1;
obj.import("./member");
myrequire("./nope");
import.meta.url;
"#;
        assert!(scan_imports(source).is_empty());
    }

    #[test]
    fn test_static_wins_over_dynamic() {
        let source = r#"
const lazy = import("./shared");
import shared from "./shared";
"#;
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::Static);
        assert_eq!(imports[0].line, 2);
    }

    #[test]
    fn test_line_numbers() {
        let source = "\n\nimport a from './a';\n\nimport b from './b';";
        let imports = scan_imports(source);
        assert_eq!(imports[0].line, 3);
        assert_eq!(imports[1].line, 5);
    }
}
