//! Import specifier resolution.
//!
//! Maps a specifier written in a module to the absolute path of the module it
//! names.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Aliased: `@/components/Button` with `alias = { "@" = "./src" }`
//! - Bare: `lodash`, `@scope/pkg`, `pkg/sub/path`
//!
//! An exact file match wins over extension probing; extensions are tried in
//! the configured order; directories fall back to `index` plus each extension.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::config::BuildConfig;

/// Error during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub specifier: String,
    pub from: PathBuf,
    pub message: String,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cannot resolve '{}' from '{}': {}",
            self.specifier,
            self.from.display(),
            self.message
        )
    }
}

impl std::error::Error for ResolveError {}

/// Import resolver for one build.
///
/// Resolutions are memoised per `(directory, specifier)`, so a module
/// imported from many files in the same directory hits the filesystem once.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    extensions: Vec<String>,
    /// Longest prefix first.
    aliases: Vec<(String, String)>,
    main_fields: Vec<String>,
    cache: RwLock<FxHashMap<(PathBuf, String), PathBuf>>,
}

impl Resolver {
    /// Create a resolver from the build configuration.
    #[must_use]
    pub fn new(config: &BuildConfig) -> Self {
        let mut aliases: Vec<(String, String)> = config
            .resolve
            .alias
            .iter()
            .map(|(k, v)| (k.trim_end_matches('/').to_string(), v.clone()))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            root: config.root.clone(),
            extensions: config
                .resolve
                .extensions
                .iter()
                .map(|e| {
                    if e.starts_with('.') {
                        e.clone()
                    } else {
                        format!(".{e}")
                    }
                })
                .collect(),
            aliases,
            main_fields: config.resolve.main_fields.clone(),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Resolve `specifier` as written in the module at `importer`.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf, ResolveError> {
        let dir = importer.parent().unwrap_or(&self.root);
        self.resolve_in(specifier, dir, importer)
    }

    /// Resolve an entry specifier against the project root.
    pub fn resolve_entry(&self, specifier: &str) -> Result<PathBuf, ResolveError> {
        self.resolve_in(specifier, &self.root, &self.root)
    }

    fn resolve_in(
        &self,
        specifier: &str,
        dir: &Path,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let key = (dir.to_path_buf(), specifier.to_string());
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(specifier, dir).map_err(|message| ResolveError {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
            message,
        })?;

        tracing::trace!(specifier, resolved = %resolved.display(), "resolved");
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&self, specifier: &str, dir: &Path) -> Result<PathBuf, String> {
        if specifier.is_empty() {
            return Err("empty specifier".to_string());
        }

        if let Some(aliased) = self.apply_alias(specifier) {
            return match aliased {
                Aliased::Path(path) => self.resolve_path(&path),
                Aliased::Bare(bare) => self.resolve_bare(&bare, dir),
            };
        }

        if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." {
            return self.resolve_path(&dir.join(specifier));
        }

        if Path::new(specifier).is_absolute() {
            return self.resolve_path(Path::new(specifier));
        }

        self.resolve_bare(specifier, dir)
    }

    /// Redirect `specifier` through the longest matching alias.
    fn apply_alias(&self, specifier: &str) -> Option<Aliased> {
        for (prefix, target) in &self.aliases {
            let rest = if specifier == prefix {
                ""
            } else if let Some(rest) = specifier
                .strip_prefix(prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                rest
            } else {
                continue;
            };

            let target = target.trim_end_matches('/');
            let joined = if rest.is_empty() {
                target.to_string()
            } else {
                format!("{target}/{rest}")
            };

            return Some(
                if target.starts_with("./") || target.starts_with("../") || target == "." {
                    Aliased::Path(self.root.join(joined))
                } else if Path::new(target).is_absolute() {
                    Aliased::Path(PathBuf::from(joined))
                } else {
                    Aliased::Bare(joined)
                },
            );
        }
        None
    }

    /// Resolve a filesystem path that might need an extension or index file.
    fn resolve_path(&self, target: &Path) -> Result<PathBuf, String> {
        self.locate(target)
            .ok_or_else(|| "file not found".to_string())
    }

    fn locate(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return canonical(target);
        }

        for ext in &self.extensions {
            let with_ext = PathBuf::from(format!("{}{ext}", target.display()));
            if with_ext.is_file() {
                return canonical(&with_ext);
            }
        }

        if target.is_dir() {
            for ext in &self.extensions {
                let index = target.join(format!("index{ext}"));
                if index.is_file() {
                    return canonical(&index);
                }
            }
        }

        None
    }

    /// Look up a bare specifier in `node_modules`, walking up from `dir` to
    /// the project root.
    fn resolve_bare(&self, specifier: &str, dir: &Path) -> Result<PathBuf, String> {
        let (pkg_name, subpath) = split_bare(specifier);

        let mut current = Some(dir);
        while let Some(d) = current {
            let pkg_dir = d.join("node_modules").join(pkg_name);
            if pkg_dir.is_dir() {
                let found = match subpath {
                    Some(sub) => self.locate(&pkg_dir.join(sub)),
                    None => self.package_entry(&pkg_dir),
                };
                if let Some(found) = found {
                    return Ok(found);
                }
            }

            if d == self.root {
                break;
            }
            current = d.parent();
        }

        Err(format!("cannot find package '{pkg_name}' in node_modules"))
    }

    /// Entry file of a package directory: configured `package.json` fields in
    /// order, then `index` files.
    fn package_entry(&self, pkg_dir: &Path) -> Option<PathBuf> {
        let manifest = std::fs::read_to_string(pkg_dir.join("package.json"))
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());

        if let Some(json) = manifest {
            for field in &self.main_fields {
                if let Some(entry) = json.get(field).and_then(|v| v.as_str()) {
                    if let Some(found) = self.locate(&pkg_dir.join(entry)) {
                        return Some(found);
                    }
                }
            }
        }

        self.locate(pkg_dir)
    }
}

enum Aliased {
    Path(PathBuf),
    Bare(String),
}

/// Split `@scope/pkg/sub` into `("@scope/pkg", Some("sub"))`.
fn split_bare(specifier: &str) -> (&str, Option<&str>) {
    let name_end = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map_or(specifier.len(), |(i, _)| i)
    } else {
        specifier.find('/').unwrap_or(specifier.len())
    };

    let (name, rest) = specifier.split_at(name_end);
    let sub = rest.strip_prefix('/').filter(|s| !s.is_empty());
    (name, sub)
}

fn canonical(path: &Path) -> Option<PathBuf> {
    dunce::canonicalize(path).ok()
}
