//! Environment variables for inlining into build output.
//!
//! Values come from `.env`, `.env.local`, `.env.[mode]` and
//! `.env.[mode].local`, later files overriding earlier ones. The process
//! environment snapshot wins over every file.

use std::collections::BTreeMap;
use std::path::Path;

use weft_util::fs::read_to_string_lossy;

use crate::config::BuildConfig;

/// Parse a `.env` file into key-value pairs.
///
/// Accepts `KEY=value`, `KEY="value"` with escapes, `KEY='literal'`, an
/// optional `export ` prefix, `#` comments and inline ` #` comments after
/// unquoted values.
#[must_use]
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, raw) = line.split_once('=')?;
            let key = key.trim();
            let key = key.strip_prefix("export ").unwrap_or(key).trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), parse_value(raw.trim())))
        })
        .collect()
}

fn parse_value(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => break,
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(other @ ('\\' | '"')) => out.push(other),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                _ => out.push(c),
            }
        }
        return out;
    }

    if let Some(inner) = raw.strip_prefix('\'') {
        return inner.split('\'').next().unwrap_or_default().to_string();
    }

    match raw.find(" #") {
        Some(pos) => raw[..pos].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Load `.env` files for `mode` and overlay the process environment.
#[must_use]
pub fn load_env(
    root: &Path,
    mode: &str,
    process_env: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let files = [
        ".env".to_string(),
        ".env.local".to_string(),
        format!(".env.{mode}"),
        format!(".env.{mode}.local"),
    ];

    let mut env = BTreeMap::new();
    for name in &files {
        let path = root.join(name);
        if let Ok(content) = read_to_string_lossy(&path) {
            tracing::debug!(file = %name, "loaded env file");
            env.extend(parse_env_file(&content));
        }
    }

    env.extend(process_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Expression → replacement table for the `define` pass.
///
/// `process.env.NODE_ENV` always maps to the build mode, and user `define`
/// entries always apply. When env inlining is on, the table also maps
/// `process.env.NAME` for every listed or prefix-matched variable. User
/// entries win over generated ones.
#[must_use]
pub fn define_table(
    config: &BuildConfig,
    env: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut table = BTreeMap::new();
    table.insert(
        "process.env.NODE_ENV".to_string(),
        js_string(config.mode().as_str()),
    );

    if config.inline_env() {
        for (key, value) in env {
            let listed = config.env.vars.iter().any(|v| v == key);
            let prefixed = config
                .env
                .prefix
                .as_deref()
                .is_some_and(|p| !p.is_empty() && key.starts_with(p));
            if listed || prefixed {
                table.insert(format!("process.env.{key}"), js_string(value));
            }
        }
    }

    for (key, value) in &config.define {
        table.insert(key.clone(), value.clone());
    }

    table
}

/// Quote a value as a JavaScript string literal.
#[must_use]
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_forms() {
        let content = r#"
# comment
PLAIN=value
export EXPORTED=yes
DOUBLE="line\nbreak"
SINGLE='no \n escape'
INLINE=keep # dropped
=nokey
"#;
        let env = parse_env_file(content);
        assert_eq!(env["PLAIN"], "value");
        assert_eq!(env["EXPORTED"], "yes");
        assert_eq!(env["DOUBLE"], "line\nbreak");
        assert_eq!(env["SINGLE"], "no \\n escape");
        assert_eq!(env["INLINE"], "keep");
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn test_load_env_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), "A=base\nB=base\nC=base").unwrap();
        fs::write(dir.path().join(".env.production"), "B=prod").unwrap();
        fs::write(dir.path().join(".env.development"), "B=dev").unwrap();

        let mut process = BTreeMap::new();
        process.insert("C".to_string(), "process".to_string());

        let env = load_env(dir.path(), "production", &process);
        assert_eq!(env["A"], "base");
        assert_eq!(env["B"], "prod");
        assert_eq!(env["C"], "process");
    }

    #[test]
    fn test_define_table_production() {
        let mut config = BuildConfig::default().with_mode(Mode::Production);
        config.env.vars = vec!["API_URL".to_string()];
        config.env.prefix = Some("PUBLIC_".to_string());
        config
            .define
            .insert("__VERSION__".to_string(), "\"1.0\"".to_string());

        let mut env = BTreeMap::new();
        env.insert("API_URL".to_string(), "https://api".to_string());
        env.insert("PUBLIC_NAME".to_string(), "say \"hi\"".to_string());
        env.insert("SECRET".to_string(), "hidden".to_string());

        let table = define_table(&config, &env);
        assert_eq!(table["process.env.NODE_ENV"], "\"production\"");
        assert_eq!(table["process.env.API_URL"], "\"https://api\"");
        assert_eq!(table["process.env.PUBLIC_NAME"], r#""say \"hi\"""#);
        assert_eq!(table["__VERSION__"], "\"1.0\"");
        assert!(!table.contains_key("process.env.SECRET"));
    }

    #[test]
    fn test_define_table_development_keeps_node_env_only() {
        let mut config = BuildConfig::default().with_mode(Mode::Development);
        config.env.vars = vec!["API_URL".to_string()];
        let mut env = BTreeMap::new();
        env.insert("API_URL".to_string(), "x".to_string());

        let table = define_table(&config, &env);
        assert_eq!(table.len(), 1);
        assert_eq!(table["process.env.NODE_ENV"], "\"development\"");
        assert!(!table.contains_key("process.env.API_URL"));
    }
}
