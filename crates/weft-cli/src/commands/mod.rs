//! Subcommand implementations.

pub mod build;
pub mod dev;
pub mod graph;
pub mod version;
pub mod watch;

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use weft_core::config::{ConfigOverrides, Entries, Mode, OutputOverrides, SplitPolicy};
use weft_core::{BuildConfig, BuildError, ConfigError, BUILD_REPORT_SCHEMA_VERSION};

/// Flags shared by every command that loads a project.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Build mode: development or production
    #[arg(long, short = 'm', value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Chunk splitting policy: none, all or async
    #[arg(long, value_parser = parse_splitting)]
    pub splitting: Option<SplitPolicy>,

    /// Entry point specifier; repeat to build several (replaces configured entries)
    #[arg(long = "entry", value_name = "SPECIFIER")]
    pub entries: Vec<String>,

    /// Output directory, relative to the project root
    #[arg(long, short = 'o', value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Worker threads for module processing
    #[arg(long)]
    pub workers: Option<usize>,
}

impl ConfigArgs {
    /// Command-line layer of the configuration.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mode: self.mode,
            splitting: self.splitting,
            workers: self.workers,
            entries: (!self.entries.is_empty()).then(|| Entries::List(self.entries.clone())),
            output: self.out_dir.clone().map(|path| OutputOverrides { path: Some(path) }),
            dev: None,
        }
    }

    pub fn load(&self, cwd: &Path) -> Result<BuildConfig, ConfigError> {
        self.load_with(cwd, &self.overrides())
    }

    pub fn load_with(
        &self,
        cwd: &Path,
        overrides: &ConfigOverrides,
    ) -> Result<BuildConfig, ConfigError> {
        let node_env = std::env::var("NODE_ENV").ok();
        BuildConfig::load(cwd, self.config.as_deref(), overrides, node_env.as_deref())
    }
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    Mode::parse(s).ok_or_else(|| format!("unknown mode '{s}' (expected development or production)"))
}

fn parse_splitting(s: &str) -> Result<SplitPolicy, String> {
    SplitPolicy::parse(s).ok_or_else(|| format!("unknown splitting policy '{s}' (expected none, all or async)"))
}

/// Error object embedded in JSON results.
#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&BuildError> for ErrorJson {
    fn from(err: &BuildError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            path: err.path().map(|p| p.display().to_string()),
        }
    }
}

/// Process environment handed to builds for `.env` overlay and inlining.
pub fn process_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

/// Print a failure and exit with status 1.
pub fn fail(err: &BuildError, json: bool) -> ! {
    if json {
        let result = serde_json::json!({
            "schema_version": BUILD_REPORT_SCHEMA_VERSION,
            "ok": false,
            "error": ErrorJson::from(err),
        });
        println!("{result}");
    } else {
        eprintln!("error[{}]: {err}", err.code());
    }
    std::process::exit(1);
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} kB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_only_set_given_flags() {
        let args = ConfigArgs {
            mode: Some(Mode::Production),
            ..ConfigArgs::default()
        };
        let overrides = args.overrides();
        assert_eq!(overrides.mode, Some(Mode::Production));
        assert!(overrides.entries.is_none());
        assert!(overrides.output.is_none());

        let json = serde_json::to_value(&overrides).unwrap();
        assert_eq!(json, serde_json::json!({ "mode": "production" }));
    }

    #[test]
    fn test_entry_flags_replace_entries() {
        let args = ConfigArgs {
            entries: vec!["./src/a.ts".into(), "./src/b.ts".into()],
            ..ConfigArgs::default()
        };
        assert_eq!(
            args.overrides().entries,
            Some(Entries::List(vec!["./src/a.ts".into(), "./src/b.ts".into()]))
        );
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse_mode("prod"), Ok(Mode::Production));
        assert!(parse_mode("staging").is_err());
        assert_eq!(parse_splitting("all"), Ok(SplitPolicy::All));
        assert!(parse_splitting("some").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 kB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
