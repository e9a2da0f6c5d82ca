//! Module code rewriting for the chunk runtime.
//!
//! A chunk registers each module as a factory taking
//! `(module, exports, require)`. ES `import` and `export` statements become
//! `require` calls and `exports` assignments, and every specifier is
//! replaced with the id of the module it resolved to. `import()` goes
//! through `__weft_import__`, which loads the target's chunks first.
//!
//! Statements are recognised per line, the way they are written in
//! practice; multi-line `import { ... }` and `export { ... }` lists are
//! joined until their braces balance.

use rustc_hash::FxHashMap as HashMap;

use crate::env::js_string;
use crate::transform::{is_ident_byte, string_end};

/// Specifier as written → id of the module it resolved to.
pub(crate) type Links<'a> = HashMap<&'a str, &'a str>;

/// Rewrite one module's code for registration in a chunk.
pub(crate) fn rewrite_module(code: &str, links: &Links<'_>) -> String {
    let code = rewrite_calls(code, links);
    rewrite_statements(&code, links)
}

/// Replace `require("spec")` and `import("spec")` with module ids.
fn rewrite_calls(code: &str, links: &Links<'_>) -> String {
    let bytes = code.as_bytes();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;

    'scan: while i < bytes.len() {
        let c = bytes[i];

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
        if matches!(c, b'"' | b'\'' | b'`') {
            let end = string_end(bytes, i);
            out.push_str(&code[i..end]);
            i = end;
            continue;
        }

        let at_boundary = i == 0 || (!is_ident_byte(bytes[i - 1]) && bytes[i - 1] != b'.');
        if at_boundary {
            for (keyword, callee) in [("require", "require"), ("import", "__weft_import__")] {
                let Some((spec, end)) = call_at(code, i, keyword) else {
                    continue;
                };
                if let Some(id) = links.get(spec) {
                    out.push_str(callee);
                    out.push('(');
                    out.push_str(&js_string(id));
                    out.push(')');
                    i = end;
                    continue 'scan;
                }
            }
        }

        let ch_len = code[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&code[i..i + ch_len]);
        i += ch_len;
    }

    out
}

/// `keyword ( "spec" )` at byte `i`: the specifier and the index past `)`.
fn call_at<'c>(code: &'c str, i: usize, keyword: &str) -> Option<(&'c str, usize)> {
    let bytes = code.as_bytes();
    if !code[i..].starts_with(keyword) {
        return None;
    }
    let mut j = i + keyword.len();
    if bytes.get(j).copied().is_some_and(is_ident_byte) {
        return None;
    }
    let skip_ws = |mut j: usize| {
        while bytes.get(j).is_some_and(u8::is_ascii_whitespace) {
            j += 1;
        }
        j
    };

    j = skip_ws(j);
    if bytes.get(j) != Some(&b'(') {
        return None;
    }
    j = skip_ws(j + 1);
    let quote = *bytes.get(j)?;
    if !matches!(quote, b'"' | b'\'' | b'`') {
        return None;
    }
    let len = code[j + 1..].find(quote as char)?;
    let spec = &code[j + 1..j + 1 + len];
    if spec.contains('\\') || spec.contains("${") {
        return None;
    }
    j = skip_ws(j + 1 + len + 1);
    if bytes.get(j) != Some(&b')') {
        return None;
    }
    Some((spec, j + 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement {
    Import,
    /// `export { ... }`, optionally `from`.
    ExportList,
    /// `export * from` and `export * as ns from`.
    ExportStar,
    ExportDefault,
    /// `export const`, `export function`, `export class`, ...
    ExportDecl,
}

fn statement_kind(line: &str) -> Option<Statement> {
    let after_keyword = |keyword: &str| {
        let rest = line.strip_prefix(keyword)?;
        match rest.chars().next() {
            Some(c) if c.is_whitespace() || matches!(c, '{' | '*' | '"' | '\'') => {
                Some(rest.trim_start())
            }
            _ => None,
        }
    };

    if after_keyword("import").is_some() {
        return Some(Statement::Import);
    }
    let rest = after_keyword("export")?;
    Some(if rest.starts_with('{') {
        Statement::ExportList
    } else if rest.starts_with('*') {
        Statement::ExportStar
    } else if rest.strip_prefix("default").is_some_and(|r| {
        !r.as_bytes().first().copied().is_some_and(is_ident_byte)
    }) {
        Statement::ExportDefault
    } else {
        Statement::ExportDecl
    })
}

fn rewrite_statements(code: &str, links: &Links<'_>) -> String {
    let mut out = String::with_capacity(code.len() + 64);
    let mut pending: Vec<String> = Vec::new();
    let mut temps = 0usize;
    let mut is_esm = false;
    let mut in_comment = false;
    let mut lines = code.lines();

    while let Some(line) = lines.next() {
        if in_comment {
            in_comment = !line.contains("*/");
            push_line(&mut out, line);
            continue;
        }
        if opens_block_comment(line) {
            in_comment = true;
            push_line(&mut out, line);
            continue;
        }

        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let Some(kind) = statement_kind(trimmed) else {
            push_line(&mut out, line);
            continue;
        };

        let mut statement = trimmed.to_string();
        if matches!(kind, Statement::Import | Statement::ExportList) {
            while brace_depth(&statement) > 0 {
                let Some(next) = lines.next() else {
                    break;
                };
                statement.push('\n');
                statement.push_str(next);
            }
        }

        let rewritten = match kind {
            Statement::Import => rewrite_import(&statement, links, &mut temps),
            Statement::ExportList => rewrite_export_list(&statement, links, &mut temps, &mut pending),
            Statement::ExportStar => rewrite_export_star(&statement, links),
            Statement::ExportDefault => statement
                .strip_prefix("export")
                .map(|r| format!("exports.default = {}", r.trim_start()["default".len()..].trim_start())),
            Statement::ExportDecl => Some(rewrite_declaration(&statement, &mut pending)),
        };

        match rewritten {
            Some(rewritten) => {
                is_esm = true;
                out.push_str(indent);
                push_line(&mut out, &rewritten);
            }
            // Not a form we understand; leave it for the host to reject.
            None => push_line(&mut out, &format!("{indent}{statement}")),
        }
    }

    for export in &pending {
        push_line(&mut out, export);
    }

    if is_esm {
        out.insert_str(0, "Object.defineProperty(exports, \"__esModule\", { value: true });\n");
    }
    out
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn opens_block_comment(line: &str) -> bool {
    line.rfind("/*").is_some_and(|at| !line[at + 2..].contains("*/"))
}

fn brace_depth(s: &str) -> i64 {
    let open = s.matches('{').count();
    let close = s.matches('}').count();
    i64::try_from(open).unwrap_or(i64::MAX) - i64::try_from(close).unwrap_or(0)
}

/// Strip `;` and surrounding whitespace from a statement body.
fn body<'s>(statement: &'s str, keyword: &str) -> Option<&'s str> {
    Some(
        statement
            .strip_prefix(keyword)?
            .trim()
            .trim_end_matches(';')
            .trim_end(),
    )
}

/// Contents of a string literal that makes up all of `s`.
fn quoted(s: &str) -> Option<&str> {
    let quote = s.chars().next()?;
    if !matches!(quote, '"' | '\'') {
        return None;
    }
    s[1..].strip_suffix(quote)
}

/// Split `clause from "spec"` at its last `from`.
fn split_from(body: &str) -> Option<(&str, &str)> {
    let bytes = body.as_bytes();
    let mut search = body.len();
    while let Some(at) = body[..search].rfind("from") {
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let spec = body[at + 4..].trim();
        if before_ok {
            if let Some(spec) = quoted(spec) {
                return Some((body[..at].trim_end(), spec));
            }
        }
        search = at;
    }
    None
}

fn require(spec: &str, links: &Links<'_>) -> String {
    let id = links.get(spec).copied().unwrap_or(spec);
    format!("require({})", js_string(id))
}

fn next_temp(temps: &mut usize) -> String {
    *temps += 1;
    format!("__weft_m{temps}__")
}

/// `{ a as b, c }` → `{ a: b, c }`.
fn destructure(list: &str) -> String {
    list.split(',')
        .map(|part| match part.split_once(" as ") {
            Some((name, local)) => format!("{}: {}", name.trim_end(), local.trim_start()),
            None => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn rewrite_import(statement: &str, links: &Links<'_>, temps: &mut usize) -> Option<String> {
    let body = body(statement, "import")?;
    if let Some(spec) = quoted(body) {
        return Some(format!("{};", require(spec, links)));
    }

    let (clause, spec) = split_from(body)?;
    let source = require(spec, links);

    let (default, rest) = if clause.starts_with('{') || clause.starts_with('*') {
        (None, Some(clause))
    } else {
        match clause.split_once(',') {
            Some((default, rest)) => (Some(default.trim()), Some(rest.trim())),
            None => (Some(clause.trim()), None),
        }
    };

    let bind_rest = |from: &str, rest: &str| -> Option<String> {
        if let Some(ns) = rest.strip_prefix('*') {
            let ns = ns.trim_start().strip_prefix("as")?.trim();
            Some(format!("const {ns} = {from};"))
        } else if rest.starts_with('{') {
            Some(format!("const {} = {from};", destructure(rest)))
        } else {
            None
        }
    };

    match (default, rest) {
        (Some(default), None) => Some(format!("const {default} = __weft_default__({source});")),
        (None, Some(rest)) => bind_rest(&source, rest),
        (Some(default), Some(rest)) => {
            let temp = next_temp(temps);
            Some(format!(
                "const {temp} = {source}; const {default} = __weft_default__({temp}); {}",
                bind_rest(&temp, rest)?
            ))
        }
        (None, None) => None,
    }
}

/// `(local, exported)` pairs of an `{ a, b as c }` list.
fn export_pairs(list: &str) -> Option<Vec<(&str, &str)>> {
    let inner = list.trim().strip_prefix('{')?.strip_suffix('}')?;
    Some(
        inner
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once(" as ") {
                Some((local, exported)) => (local.trim(), exported.trim()),
                None => (p, p),
            })
            .collect(),
    )
}

fn rewrite_export_list(
    statement: &str,
    links: &Links<'_>,
    temps: &mut usize,
    pending: &mut Vec<String>,
) -> Option<String> {
    let body = body(statement, "export")?;
    match split_from(body) {
        Some((list, spec)) => {
            let pairs = export_pairs(list)?;
            let temp = next_temp(temps);
            let mut out = format!("const {temp} = {};", require(spec, links));
            for (local, exported) in pairs {
                out.push_str(&format!(" exports.{exported} = {temp}.{local};"));
            }
            Some(out)
        }
        None => {
            for (local, exported) in export_pairs(body)? {
                pending.push(format!("exports.{exported} = {local};"));
            }
            Some(String::new())
        }
    }
}

fn rewrite_export_star(statement: &str, links: &Links<'_>) -> Option<String> {
    let body = body(statement, "export")?;
    let (clause, spec) = split_from(body)?;
    let source = require(spec, links);
    match clause.trim().strip_prefix('*')?.trim() {
        "" => Some(format!("__weft_export_star__(exports, {source});")),
        alias => {
            let ns = alias.strip_prefix("as")?.trim();
            Some(format!("exports.{ns} = {source};"))
        }
    }
}

/// Drop `export` from a declaration and export its name at the end.
fn rewrite_declaration(statement: &str, pending: &mut Vec<String>) -> String {
    let declaration = statement["export".len()..].trim_start();
    if let Some(name) = declared_name(declaration) {
        pending.push(format!("exports.{name} = {name};"));
    }
    declaration.to_string()
}

fn declared_name(declaration: &str) -> Option<&str> {
    let mut words = declaration.split_whitespace();
    let mut word = words.next()?;
    if word == "async" {
        word = words.next()?;
    }
    let name_part = match word {
        "const" | "let" | "var" | "class" => words.next()?,
        "function" => {
            let next = words.next()?;
            // `function* gen`
            if next == "*" {
                words.next()?
            } else {
                next.trim_start_matches('*')
            }
        }
        "function*" => words.next()?,
        _ => return None,
    };
    let end = name_part
        .bytes()
        .position(|b| !is_ident_byte(b))
        .unwrap_or(name_part.len());
    let name = &name_part[..end];
    (!name.is_empty()).then_some(name)
}
