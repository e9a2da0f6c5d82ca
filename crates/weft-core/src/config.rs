//! Build configuration.
//!
//! A single immutable [`BuildConfig`] is loaded once per invocation and
//! threaded by reference through every build stage. Sources are layered,
//! lowest priority first:
//!
//! 1. built-in defaults
//! 2. `weft.config.json` / `weft.config.toml` in the project root (or `--config`)
//! 3. `WEFT_*` environment variables (`__` separates nested keys)
//! 4. command-line overrides
//!
//! The build mode is resolved last: explicit (`--mode` or `mode`), then
//! `NODE_ENV`, then `development`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format as _, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Config file names probed in the project root, in order.
pub const CONFIG_FILES: &[&str] = &["weft.config.json", "weft.config.toml"];

/// Build mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// Parse a mode name, accepting the common short forms.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the module graph is partitioned into chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPolicy {
    /// Everything in one chunk.
    None,
    /// One chunk per entry plus shared chunks for modules reached by several roots.
    All,
    /// Split only at dynamic `import()` boundaries.
    #[default]
    Async,
}

impl SplitPolicy {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "all" => Some(Self::All),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

/// What to do when the module graph contains an import cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    /// Report the cycle and keep building.
    #[default]
    Warn,
    /// Fail the build with `CyclicDependency`.
    Error,
}

/// Entry points, either a list of specifiers or a name → specifier table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entries {
    List(Vec<String>),
    Named(BTreeMap<String, String>),
}

impl Default for Entries {
    fn default() -> Self {
        Self::List(vec!["./src/index".to_string()])
    }
}

/// A named entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub specifier: String,
}

/// Output location and filename templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory, relative to the project root.
    pub path: PathBuf,
    /// URL prefix for emitted files referenced from HTML and assets.
    pub public_path: String,
    /// Template for entry chunks.
    pub filename: String,
    /// Template for shared and async chunks.
    pub chunk_filename: String,
    /// Template for extracted stylesheets.
    pub css_filename: String,
    /// Remove files from the previous build that this build does not produce.
    pub clean: bool,
    /// Write `manifest.json` describing the chunks.
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("build"),
            public_path: "/".to_string(),
            filename: "[name].[contenthash:10].js".to_string(),
            chunk_filename: "[name].[chunkhash:10].chunk.js".to_string(),
            css_filename: "[name].[contenthash:10].css".to_string(),
            clean: true,
            manifest: true,
        }
    }
}

/// Module resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Extensions probed, in order, when a specifier has no exact match.
    pub extensions: Vec<String>,
    /// Specifier prefix → replacement root.
    pub alias: BTreeMap<String, String>,
    /// `package.json` fields consulted for bare specifiers.
    pub main_fields: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: [".ts", ".tsx", ".js", ".jsx"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            alias: BTreeMap::new(),
            main_fields: vec!["module".to_string(), "main".to_string()],
        }
    }
}

/// One transformer reference inside a rule, with optional options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseEntry {
    Name(String),
    WithOptions {
        name: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl UseEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::WithOptions { name, .. } => name,
        }
    }

    #[must_use]
    pub fn options(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        match self {
            Self::Name(_) => &NULL,
            Self::WithOptions { options, .. } => options,
        }
    }
}

/// A transform rule: modules whose identity matches `test` (and not
/// `exclude`) run through the `use` chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub test: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(rename = "use")]
    pub chain: Vec<UseEntry>,
}

impl RuleConfig {
    pub fn new<I, S>(test: impl Into<String>, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            test: test.into(),
            exclude: None,
            chain: chain
                .into_iter()
                .map(|s| UseEntry::Name(s.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }
}

/// Environment variable inlining.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Force inlining on or off. Defaults to on in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<bool>,
    /// Variables exposed as `process.env.NAME`, besides `NODE_ENV`.
    pub vars: Vec<String>,
    /// Prefix that exposes every matching variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Generated HTML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlConfig {
    pub enabled: bool,
    /// Template file, relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    pub filename: String,
    pub title: String,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template: None,
            filename: "index.html".to_string(),
            title: "weft app".to_string(),
        }
    }
}

/// Static file or directory copied verbatim into the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPattern {
    pub from: PathBuf,
    /// Destination relative to the output directory. Defaults to the source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PathBuf>,
}

/// Development server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    pub host: String,
    pub port: u16,
    /// Serve the generated HTML for routes that are not files.
    pub history_api_fallback: bool,
    /// Push reload messages to connected browsers after each rebuild.
    pub hot: bool,
    /// Debounce window for file change events, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            history_api_fallback: true,
            hot: true,
            debounce_ms: 100,
        }
    }
}

/// Complete build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Project root. Set by the loader, never read from a file.
    #[serde(skip)]
    pub root: PathBuf,
    pub entries: Entries,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    pub rules: Vec<RuleConfig>,
    pub splitting: SplitPolicy,
    /// Non-entry chunks smaller than this many bytes are merged (production only).
    pub min_chunk_size: u64,
    pub cycles: CyclePolicy,
    /// Worker threads for module processing. Defaults to available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Expression → replacement text inlined into scripts.
    pub define: BTreeMap<String, String>,
    pub env: EnvConfig,
    pub html: HtmlConfig,
    pub copy: Vec<CopyPattern>,
    pub dev: DevConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entries: Entries::default(),
            mode: None,
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            rules: default_rules(),
            splitting: SplitPolicy::default(),
            min_chunk_size: 100_000,
            cycles: CyclePolicy::default(),
            workers: None,
            define: BTreeMap::new(),
            env: EnvConfig::default(),
            html: HtmlConfig::default(),
            copy: Vec::new(),
            dev: DevConfig::default(),
        }
    }
}

/// Rules used when the config file declares none.
#[must_use]
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new(r"\.(js|jsx|ts|tsx|mjs|cjs)$", ["script"]),
        RuleConfig::new(r"\.json$", ["json"]),
        RuleConfig::new(r"\.css$", ["css", "extract-css"]),
        RuleConfig::new(r"\.html$", ["html"]),
        RuleConfig {
            test: r"\.(png|jpe?g|gif|svg|webp|ico|woff2?|ttf)$".to_string(),
            exclude: None,
            chain: vec![UseEntry::WithOptions {
                name: "file".to_string(),
                options: serde_json::json!({ "output_path": "assets/" }),
            }],
        },
    ]
}

/// Values supplied on the command line. Only fields that are set override
/// lower layers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splitting: Option<SplitPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Entries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevOverrides>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DevOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl BuildConfig {
    /// Create a config with defaults rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration for the project at `root`.
    ///
    /// `config_path` overrides discovery of `weft.config.*`. `node_env` is the
    /// value of `NODE_ENV`, passed in so callers decide where it comes from.
    pub fn load(
        root: &Path,
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
        node_env: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let figment = Self::figment(root, config_path)?
            .merge(Env::prefixed("WEFT_").split("__"))
            .merge(Serialized::defaults(overrides));

        Self::from_figment(root, &figment, node_env)
    }

    /// Defaults plus the config file, without environment or CLI layers.
    fn figment(root: &Path, config_path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let file = match config_path {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    root.join(path)
                };
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path));
                }
                Some(path)
            }
            None => discover(root),
        };

        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "loading config file");
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(&path)),
                Some("toml") => figment.merge(Toml::file(&path)),
                other => {
                    return Err(ConfigError::UnsupportedFormat(
                        other.unwrap_or_default().to_string(),
                    ))
                }
            };
        }

        Ok(figment)
    }

    fn from_figment(
        root: &Path,
        figment: &Figment,
        node_env: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        config.root = root.to_path_buf();
        if config.mode.is_none() {
            config.mode = Some(node_env.and_then(Mode::parse).unwrap_or_default());
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config document from a string, for tests and embedding.
    pub fn from_json_str(root: &Path, json: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Json::string(json));
        Self::from_figment(root, &figment, None)
    }

    /// Check invariants that do not need the transformer registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let entries = self.entry_points();
        if entries.is_empty() {
            return Err(ConfigError::NoEntries);
        }
        let mut names = std::collections::BTreeSet::new();
        for entry in &entries {
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateEntry(entry.name.clone()));
            }
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.chain.is_empty() {
                return Err(ConfigError::EmptyChain { rule: i });
            }
            for pattern in std::iter::once(&rule.test).chain(rule.exclude.as_ref()) {
                if let Err(e) = regex_lite::Regex::new(pattern) {
                    return Err(ConfigError::InvalidPattern {
                        rule: i,
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if self.output.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output.path must not be empty".into()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.dev.port == 0 {
            return Err(ConfigError::Invalid("dev.port must be between 1 and 65535".into()));
        }

        Ok(())
    }

    /// Effective build mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    /// Whether `process.env.*` references other than `NODE_ENV` are inlined
    /// into scripts.
    #[must_use]
    pub fn inline_env(&self) -> bool {
        self.env.inline.unwrap_or(self.mode().is_production())
    }

    /// Whether small chunks are merged. Development keeps chunks fine-grained
    /// so rebuilds touch fewer files.
    #[must_use]
    pub fn merge_small_chunks(&self) -> bool {
        self.mode().is_production() && self.min_chunk_size > 0
    }

    /// Absolute output directory.
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.output.path)
    }

    /// Worker count for module processing.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        })
    }

    /// Entry points in build order. A list is named after each file stem;
    /// a table keeps its keys.
    #[must_use]
    pub fn entry_points(&self) -> Vec<EntryPoint> {
        match &self.entries {
            Entries::List(specs) => specs
                .iter()
                .map(|spec| EntryPoint {
                    name: entry_name(spec),
                    specifier: spec.clone(),
                })
                .collect(),
            Entries::Named(map) => map
                .iter()
                .map(|(name, spec)| EntryPoint {
                    name: name.clone(),
                    specifier: spec.clone(),
                })
                .collect(),
        }
    }

    /// Set entries from a list of specifiers.
    #[must_use]
    pub fn with_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries = Entries::List(entries.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_splitting(mut self, splitting: SplitPolicy) -> Self {
        self.splitting = splitting;
        self
    }
}

fn discover(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

fn entry_name(specifier: &str) -> String {
    Path::new(specifier)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("main")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.output.path, PathBuf::from("build"));
        assert_eq!(config.output.public_path, "/");
        assert_eq!(config.resolve.extensions[0], ".ts");
        assert_eq!(config.dev.port, 3000);
        assert!(config.dev.history_api_fallback);
        assert_eq!(config.min_chunk_size, 100_000);
        assert_eq!(config.mode(), Mode::Development);
    }

    #[test]
    #[serial]
    fn test_load_json_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("weft.config.json"),
            r#"{
                "entries": { "app": "./src/app.ts" },
                "splitting": "all",
                "output": { "path": "dist" },
                "rules": [{ "test": "\\.ts$", "use": ["script"] }]
            }"#,
        )
        .unwrap();

        let config =
            BuildConfig::load(dir.path(), None, &ConfigOverrides::default(), None).unwrap();

        assert_eq!(config.splitting, SplitPolicy::All);
        assert_eq!(config.out_dir(), dir.path().join("dist"));
        assert_eq!(config.rules.len(), 1);
        // Unspecified nested fields keep their defaults
        assert_eq!(config.output.public_path, "/");
        assert_eq!(
            config.entry_points(),
            vec![EntryPoint {
                name: "app".to_string(),
                specifier: "./src/app.ts".to_string()
            }]
        );
    }

    #[test]
    #[serial]
    fn test_load_toml_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("weft.config.toml"),
            r#"
entries = ["./src/index.ts"]
min_chunk_size = 2048

[[rules]]
test = '\.(png|svg)$'
use = [{ name = "file", options = { output_path = "img/" } }]
"#,
        )
        .unwrap();

        let config =
            BuildConfig::load(dir.path(), None, &ConfigOverrides::default(), None).unwrap();
        assert_eq!(config.min_chunk_size, 2048);
        assert_eq!(config.rules[0].chain[0].name(), "file");
        assert_eq!(config.rules[0].chain[0].options()["output_path"], "img/");
    }

    #[test]
    #[serial]
    fn test_overrides_win_over_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("weft.config.json"),
            r#"{ "mode": "development", "splitting": "none", "dev": { "port": 4000 } }"#,
        )
        .unwrap();

        let overrides = ConfigOverrides {
            mode: Some(Mode::Production),
            dev: Some(DevOverrides {
                port: Some(5000),
                ..DevOverrides::default()
            }),
            ..ConfigOverrides::default()
        };
        let config = BuildConfig::load(dir.path(), None, &overrides, None).unwrap();

        assert_eq!(config.mode(), Mode::Production);
        assert_eq!(config.splitting, SplitPolicy::None);
        assert_eq!(config.dev.port, 5000);
        assert_eq!(config.dev.host, "localhost");
    }

    #[test]
    #[serial]
    fn test_mode_falls_back_to_node_env() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::load(
            dir.path(),
            None,
            &ConfigOverrides::default(),
            Some("production"),
        )
        .unwrap();
        assert_eq!(config.mode(), Mode::Production);
        assert!(config.inline_env());
        assert!(config.merge_small_chunks());

        let config =
            BuildConfig::load(dir.path(), None, &ConfigOverrides::default(), Some("bogus"))
                .unwrap();
        assert_eq!(config.mode(), Mode::Development);
        assert!(!config.inline_env());
        assert!(!config.merge_small_chunks());
    }

    #[test]
    #[serial]
    fn test_env_layer_sits_between_file_and_overrides() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("weft.config.json"),
            r#"{ "min_chunk_size": 10, "splitting": "none" }"#,
        )
        .unwrap();

        std::env::set_var("WEFT_MIN_CHUNK_SIZE", "20");
        std::env::set_var("WEFT_DEV__PORT", "4000");
        let overrides = ConfigOverrides {
            splitting: Some(SplitPolicy::All),
            ..ConfigOverrides::default()
        };
        let result = BuildConfig::load(dir.path(), None, &overrides, None);
        std::env::remove_var("WEFT_MIN_CHUNK_SIZE");
        std::env::remove_var("WEFT_DEV__PORT");

        let config = result.unwrap();
        assert_eq!(config.min_chunk_size, 20);
        assert_eq!(config.dev.port, 4000);
        assert_eq!(config.splitting, SplitPolicy::All);
    }

    #[test]
    #[serial]
    fn test_explicit_config_missing() {
        let dir = tempdir().unwrap();
        let err = BuildConfig::load(
            dir.path(),
            Some(Path::new("nope.json")),
            &ConfigOverrides::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let dir = tempdir().unwrap();
        let err = BuildConfig::from_json_str(
            dir.path(),
            r#"{ "rules": [{ "test": "(unclosed", "use": ["script"] }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { rule: 0, .. }));
    }

    #[test]
    fn test_duplicate_entry_names_rejected() {
        let dir = tempdir().unwrap();
        let err = BuildConfig::from_json_str(
            dir.path(),
            r#"{ "entries": ["./a/index.ts", "./b/index.ts"] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEntry(name) if name == "index"));
    }

    #[test]
    fn test_zero_dev_port_rejected() {
        let dir = tempdir().unwrap();
        let err = BuildConfig::from_json_str(dir.path(), r#"{ "dev": { "port": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("dev.port")));
    }

    #[test]
    fn test_empty_entries_rejected() {
        let dir = tempdir().unwrap();
        let err = BuildConfig::from_json_str(dir.path(), r#"{ "entries": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::NoEntries));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("prod"), Some(Mode::Production));
        assert_eq!(Mode::parse(" Development "), Some(Mode::Development));
        assert_eq!(Mode::parse("staging"), None);
    }
}
