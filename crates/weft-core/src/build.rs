//! Build orchestration.
//!
//! One [`Build`] drives one invocation through
//! `Idle → Resolving → Transforming → GraphComplete → Chunking → Emitting → Done`.
//! Any error moves it to `Failed` and is returned as-is; there are no
//! retries. The configuration is borrowed immutably for the whole run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::artifact::Artifact;
use crate::cancel::CancellationToken;
use crate::chunks::{ChunkGraph, ChunkKind, ChunkSet};
use crate::config::BuildConfig;
use crate::emit::{html_document, static_copies, EmittedFile, Emitter};
use crate::env::{define_table, load_env};
use crate::error::{format_cycle, BuildError};
use crate::graph::{GraphBuilder, ModuleGraph};
use crate::resolve::Resolver;
use crate::transform::{Pipeline, TransformerRegistry};

/// Schema version of [`BuildReport`].
pub const BUILD_REPORT_SCHEMA_VERSION: u32 = 1;

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildState {
    Idle,
    Resolving,
    Transforming,
    GraphComplete,
    Chunking,
    Emitting,
    Done,
    Failed,
}

impl BuildState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Per-chunk line of a [`BuildReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub name: String,
    pub kind: ChunkKind,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    pub modules: usize,
    pub size: usize,
}

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub schema_version: u32,
    pub mode: String,
    pub out_dir: PathBuf,
    pub hash: String,
    pub modules: usize,
    pub chunks: Vec<ChunkSummary>,
    pub files: Vec<EmittedFile>,
    pub bytes: u64,
    /// Import cycles, each rendered as `[a, b, a]`.
    pub cycles: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// A single build invocation.
pub struct Build<'a> {
    config: &'a BuildConfig,
    registry: TransformerRegistry,
    process_env: BTreeMap<String, String>,
    cancel: CancellationToken,
    state: BuildState,
}

impl<'a> Build<'a> {
    /// Build with the built-in transformers, no process environment and a
    /// fresh cancellation token.
    #[must_use]
    pub fn new(config: &'a BuildConfig) -> Self {
        Self {
            config,
            registry: TransformerRegistry::with_builtins(),
            process_env: BTreeMap::new(),
            cancel: CancellationToken::new(),
            state: BuildState::Idle,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: TransformerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Process environment overlaid on `.env` files.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.process_env = env;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Run the build to completion.
    pub fn run(&mut self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let _span = tracing::info_span!("build", mode = %self.config.mode()).entered();

        match self.run_inner(started) {
            Ok(report) => {
                self.transition(BuildState::Done);
                tracing::info!(
                    modules = report.modules,
                    chunks = report.chunks.len(),
                    duration_ms = report.duration_ms,
                    "build complete"
                );
                Ok(report)
            }
            Err(err) => {
                self.transition(BuildState::Failed);
                if matches!(err, BuildError::Cancelled) {
                    tracing::info!("build cancelled");
                } else {
                    tracing::error!(code = err.code(), error = %err, "build failed");
                }
                Err(err)
            }
        }
    }

    /// Resolve and transform every module, stopping once the graph is
    /// complete. Nothing is written.
    pub fn graph(&mut self) -> Result<ModuleGraph, BuildError> {
        let result = self.build_graph().map(|(graph, _)| graph);
        match &result {
            Ok(_) => self.transition(BuildState::GraphComplete),
            Err(_) => self.transition(BuildState::Failed),
        }
        result
    }

    fn transition(&mut self, next: BuildState) {
        tracing::debug!(from = ?self.state, to = ?next, "build state");
        self.state = next;
    }

    fn build_graph(&mut self) -> Result<(ModuleGraph, Pipeline), BuildError> {
        let config = self.config;

        self.transition(BuildState::Resolving);
        self.cancel.check()?;
        let env = load_env(&config.root, config.mode().as_str(), &self.process_env);
        let defines = define_table(config, &env);
        let pipeline = Pipeline::new(config, &self.registry, defines)?;
        let resolver = Resolver::new(config);

        self.transition(BuildState::Transforming);
        let graph = GraphBuilder::new(config, &resolver, &pipeline, self.cancel.clone()).build()?;
        Ok((graph, pipeline))
    }

    fn run_inner(&mut self, started: Instant) -> Result<BuildReport, BuildError> {
        let config = self.config;
        let cancel = self.cancel.clone();

        let (graph, pipeline) = self.build_graph()?;

        self.transition(BuildState::GraphComplete);
        let finalized = pipeline.finalize().map_err(|source| BuildError::ModuleTransform {
            module: config.root.clone(),
            import_chain: Vec::new(),
            source,
        })?;
        let mut warnings: Vec<String> = finalized.warnings;
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        let cycles: Vec<String> = graph.cycles().iter().map(|c| format_cycle(c)).collect();
        warnings.extend(cycles.iter().map(|c| format!("import cycle: {c}")));
        cancel.check()?;

        self.transition(BuildState::Chunking);
        let mut chunk_graph = ChunkGraph::split(&graph, config.splitting);
        if config.merge_small_chunks() {
            chunk_graph.merge_small(&graph, config.min_chunk_size);
        }
        let chunks = ChunkSet::render(&graph, &chunk_graph, config);
        cancel.check()?;

        self.transition(BuildState::Emitting);
        let artifacts = collect_artifacts(config, &graph, &chunks, finalized.artifacts)?;
        let emitted = Emitter::new(config, cancel).emit(artifacts)?;

        Ok(BuildReport {
            schema_version: BUILD_REPORT_SCHEMA_VERSION,
            mode: config.mode().to_string(),
            out_dir: emitted.out_dir,
            hash: chunks.hash().to_string(),
            modules: graph.len(),
            chunks: chunks
                .chunks()
                .iter()
                .map(|c| ChunkSummary {
                    name: c.name.clone(),
                    kind: c.kind,
                    file: c.file.clone(),
                    css: c.css_file.clone(),
                    modules: c.modules.len(),
                    size: c.size(),
                })
                .collect(),
            files: emitted.files,
            bytes: emitted.bytes,
            cycles,
            warnings,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Everything the emitter writes, in priority order: later entries win a
/// path collision, so generated files override copies and assets.
fn collect_artifacts(
    config: &BuildConfig,
    graph: &ModuleGraph,
    chunks: &ChunkSet,
    finalized: Vec<Artifact>,
) -> Result<Vec<Artifact>, BuildError> {
    let mut artifacts = static_copies(config)?;
    for module in graph.iter() {
        artifacts.extend(module.artifacts.iter().cloned());
    }
    artifacts.extend(finalized);
    artifacts.extend(chunks.artifacts());
    if let Some(html) = html_document(config, chunks)? {
        artifacts.push(html);
    }
    if config.output.manifest {
        artifacts.push(chunks.manifest(config).to_artifact());
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn config(dir: &tempfile::TempDir) -> BuildConfig {
        BuildConfig::new(dunce::canonicalize(dir.path()).unwrap())
    }

    #[test]
    fn test_successful_build_reaches_done() {
        let dir = project(&[
            ("src/index.ts", "import './style.css';\nconsole.log(process.env.NODE_ENV);"),
            ("src/style.css", "body { margin: 0 }"),
        ]);
        let config = config(&dir).with_mode(crate::config::Mode::Production);
        let mut build = Build::new(&config);
        let report = build.run().unwrap();

        assert_eq!(build.state(), BuildState::Done);
        assert_eq!(report.modules, 2);
        assert_eq!(report.mode, "production");

        let out = dir.path().join("build");
        let html = fs::read_to_string(out.join("index.html")).unwrap();
        let main = &report.chunks[0];
        assert!(html.contains(&format!("<script src=\"/{}\"></script>", main.file)));
        let css = main.css.as_deref().unwrap();
        assert!(html.contains(&format!("href=\"/{css}\"")));

        let script = fs::read_to_string(out.join(&main.file)).unwrap();
        assert!(script.contains("console.log(\"production\");"));
        assert!(out.join("manifest.json").exists());
    }

    #[test]
    fn test_failure_reaches_failed_state() {
        let dir = project(&[("src/index.ts", "import './missing';")]);
        let config = config(&dir);
        let mut build = Build::new(&config);
        let err = build.run().unwrap_err();
        assert_eq!(err.code(), "BUILD_UNRESOLVED_IMPORT");
        assert_eq!(build.state(), BuildState::Failed);
        assert!(!dir.path().join("build").exists());
    }

    #[test]
    fn test_cancelled_build_is_failed() {
        let dir = project(&[("src/index.ts", "")]);
        let config = config(&dir);
        let token = CancellationToken::new();
        token.cancel();
        let mut build = Build::new(&config).with_cancel(token);
        assert!(matches!(build.run(), Err(BuildError::Cancelled)));
        assert_eq!(build.state(), BuildState::Failed);
        assert!(build.state().is_terminal());
    }

    #[test]
    fn test_env_vars_inlined_from_dotenv() {
        let dir = project(&[
            ("src/index.ts", "fetch(process.env.API_URL);"),
            (".env", "API_URL=https://api.example.com"),
        ]);
        let mut config = config(&dir).with_mode(crate::config::Mode::Production);
        config.env.vars = vec!["API_URL".to_string()];
        let report = Build::new(&config).run().unwrap();

        let script =
            fs::read_to_string(dir.path().join("build").join(&report.chunks[0].file)).unwrap();
        assert!(script.contains("fetch(\"https://api.example.com\");"));
    }

    #[test]
    fn test_graph_only_writes_nothing() {
        let dir = project(&[
            ("src/index.ts", "import './a';"),
            ("src/a.ts", "export const a = 1;"),
        ]);
        let config = config(&dir);
        let mut build = Build::new(&config);
        let graph = build.graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(build.state(), BuildState::GraphComplete);
        assert!(!dir.path().join("build").exists());
    }

    #[test]
    fn test_unused_define_is_a_warning() {
        let dir = project(&[("src/index.ts", "export {};")]);
        let mut config = config(&dir);
        config
            .define
            .insert("__NEVER__".to_string(), "1".to_string());
        let report = Build::new(&config).run().unwrap();
        assert_eq!(report.warnings, vec!["define '__NEVER__' was never used".to_string()]);
    }
}
