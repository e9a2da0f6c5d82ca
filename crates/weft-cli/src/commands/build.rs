//! `weft build` command implementation.

use super::{fail, format_bytes, process_env, ConfigArgs};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;
use weft_core::{Build, BuildConfig, BuildError, BuildReport, CancellationToken};

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    pub config: ConfigArgs,
}

/// Build result for JSON output.
#[derive(Serialize)]
struct BuildResultJson<'a> {
    ok: bool,
    #[serde(flatten)]
    report: &'a BuildReport,
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let config = match action.config.load(&action.cwd) {
        Ok(config) => config,
        Err(e) => fail(&BuildError::Config(e), json),
    };

    match build_once(&config, CancellationToken::new()) {
        Ok(report) => {
            if json {
                let result = BuildResultJson {
                    ok: true,
                    report: &report,
                };
                println!("{}", serde_json::to_string(&result).into_diagnostic()?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(err) => fail(&err, json),
    }
}

/// One full build with the process environment.
pub fn build_once(config: &BuildConfig, cancel: CancellationToken) -> Result<BuildReport, BuildError> {
    Build::new(config)
        .with_env(process_env())
        .with_cancel(cancel)
        .run()
}

pub fn print_report(report: &BuildReport) {
    println!(
        "  {} build {} ({} modules, {} chunks) in {}ms",
        report.mode,
        report.hash,
        report.modules,
        report.chunks.len(),
        report.duration_ms
    );
    for file in &report.files {
        println!("    {:<48} {:>10}", file.path, format_bytes(file.size as u64));
    }
    println!("  {} written to {}", format_bytes(report.bytes), report.out_dir.display());
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}
