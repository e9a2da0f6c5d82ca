//! Output filename templates.
//!
//! Placeholders are `[name]`, `[id]`, `[ext]`, `[hash]`, `[chunkhash]` and
//! `[contenthash]`. Hash placeholders take an optional length, e.g.
//! `[contenthash:8]`. Unknown placeholders are left untouched.

/// Values substituted into a filename template.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameVars<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub ext: &'a str,
    /// Build-wide hash.
    pub hash: &'a str,
    pub chunkhash: &'a str,
    pub contenthash: &'a str,
}

/// Instantiate `template` with `vars`.
#[must_use]
pub fn render(template: &str, vars: &NameVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let token = &after[..close];
        let (key, len) = match token.split_once(':') {
            Some((k, n)) => (k, n.parse::<usize>().ok()),
            None => (token, None),
        };

        let value = match key {
            "name" => Some(vars.name),
            "id" => Some(vars.id),
            "ext" => Some(vars.ext),
            "hash" => Some(vars.hash),
            "chunkhash" => Some(vars.chunkhash),
            "contenthash" => Some(vars.contenthash),
            _ => None,
        };

        match value {
            Some(v) => match len {
                Some(n) => out.push_str(weft_util::hash::short(v, n)),
                None => out.push_str(v),
            },
            None => {
                out.push('[');
                out.push_str(token);
                out.push(']');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}
