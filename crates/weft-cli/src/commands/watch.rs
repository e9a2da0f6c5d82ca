//! `weft watch` command implementation.
//!
//! A notify watcher thread feeds debounced change batches into the rebuild
//! loop. A change that arrives while a build is running cancels that build;
//! the next build starts once the cancelled one has cleaned up its staging
//! directory.

use super::build::{build_once, print_report};
use super::{fail, ConfigArgs, ErrorJson};
use miette::{IntoDiagnostic, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use weft_core::{BuildConfig, BuildError, BuildReport, CancellationToken};

/// Watch command action.
#[derive(Debug, Clone)]
pub struct WatchAction {
    pub cwd: PathBuf,
    pub config: ConfigArgs,
}

/// Run the watch command.
pub fn run(action: WatchAction, json: bool) -> Result<()> {
    let config = match action.config.load(&action.cwd) {
        Ok(config) => Arc::new(config),
        Err(e) => fail(&BuildError::Config(e), json),
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async move {
        let changes = spawn_watcher(&config)?;
        if !json {
            println!("  Watching {} for changes", config.root.display());
        }
        rebuild_on_change(config, changes, move |result| report(&result, json)).await;
        Ok(())
    })
}

fn report(result: &Result<BuildReport, BuildError>, json: bool) {
    match result {
        Ok(report) if json => {
            let line = serde_json::json!({
                "ok": true,
                "hash": report.hash,
                "modules": report.modules,
                "duration_ms": report.duration_ms,
            });
            println!("{line}");
        }
        Ok(report) => print_report(report),
        Err(err) if json => {
            let line = serde_json::json!({ "ok": false, "error": ErrorJson::from(err) });
            println!("{line}");
        }
        Err(err) => eprintln!("error[{}]: {err}", err.code()),
    }
}

/// Start the watcher thread for `config.root`.
pub fn spawn_watcher(config: &BuildConfig) -> Result<mpsc::Receiver<Vec<PathBuf>>> {
    let (tx, rx) = mpsc::channel::<Vec<PathBuf>>(16);
    let root = config.root.clone();
    let out_dir = config.out_dir();
    let debounce = Duration::from_millis(config.dev.debounce_ms);

    // Fail fast on an unwatchable root instead of inside the thread.
    if !root.is_dir() {
        return Err(miette::miette!("cannot watch {}: not a directory", root.display()));
    }

    std::thread::spawn(move || {
        if let Err(e) = watch_files(&root, &out_dir, debounce, &tx) {
            tracing::error!(error = %e, "file watcher stopped");
        }
    });
    Ok(rx)
}

/// Whether a changed path can affect the build.
///
/// Ignores the output directory (and its staging siblings, which are
/// dot-directories), `node_modules`, and anything inside a dot-directory.
/// Dotfiles directly in a watched directory, such as `.env`, still count.
pub fn should_ignore(path: &Path, root: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        let name = component.as_os_str().to_string_lossy();
        let is_dir = components.peek().is_some();
        if name == "node_modules" || (is_dir && name.starts_with('.')) {
            return true;
        }
    }
    false
}

fn watch_files(
    root: &Path,
    out_dir: &Path,
    debounce: Duration,
    changes: &mpsc::Sender<Vec<PathBuf>>,
) -> notify::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    loop {
        let event = if pending.is_empty() {
            match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            }
        } else {
            match rx.recv_timeout(debounce) {
                Ok(event) => event,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    let batch: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
                    if changes.blocking_send(batch).is_err() {
                        break;
                    }
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        };

        match event {
            Ok(event) => {
                if event.kind.is_access() {
                    continue;
                }
                pending.extend(
                    event
                        .paths
                        .into_iter()
                        .filter(|p| !should_ignore(p, root, out_dir)),
                );
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        }
    }
    Ok(())
}

/// Build once, then rebuild for every change batch until `changes` closes.
///
/// `on_build` sees every finished build except cancelled ones. Once
/// `changes` closes the loop waits for the build in flight, then returns.
pub async fn rebuild_on_change<F>(
    config: Arc<BuildConfig>,
    mut changes: mpsc::Receiver<Vec<PathBuf>>,
    mut on_build: F,
) where
    F: FnMut(Result<BuildReport, BuildError>),
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let start = |config: &Arc<BuildConfig>| {
        let token = CancellationToken::new();
        let build_token = token.clone();
        let config = Arc::clone(config);
        let done_tx = done_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = build_once(&config, build_token);
            let _ = done_tx.send(result);
        });
        token
    };

    let mut in_flight = Some(start(&config));
    let mut rerun = false;
    let mut closed = false;

    loop {
        tokio::select! {
            changed = changes.recv(), if !closed => {
                let Some(paths) = changed else {
                    closed = true;
                    if in_flight.is_none() {
                        break;
                    }
                    continue;
                };
                for path in &paths {
                    tracing::info!(path = %path.display(), "changed");
                }
                match &in_flight {
                    Some(token) => {
                        token.cancel();
                        rerun = true;
                    }
                    None => in_flight = Some(start(&config)),
                }
            }
            Some(result) = done_rx.recv() => {
                in_flight = None;
                if rerun {
                    rerun = false;
                    in_flight = Some(start(&config));
                    continue;
                }
                if !matches!(result, Err(BuildError::Cancelled)) {
                    on_build(result);
                }
                if closed {
                    break;
                }
            }
        }
    }
}
