//! Parallel fixed-point walk from the entries.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use super::{Module, ModuleGraph, ModuleId};
use crate::cancel::CancellationToken;
use crate::config::{BuildConfig, CyclePolicy};
use crate::error::{format_cycle, BuildError, TransformError};
use crate::imports::ImportKind;
use crate::resolve::Resolver;
use crate::transform::{Pipeline, TransformedModule};

/// A module as produced by a worker, before ids are assigned.
struct Discovered {
    transformed: TransformedModule,
    /// Resolved target of each import, parallel to `transformed.imports`.
    targets: Vec<PathBuf>,
}

/// Builds a [`ModuleGraph`] by resolving and transforming modules on a
/// worker pool until no new module is discovered.
pub struct GraphBuilder<'a> {
    config: &'a BuildConfig,
    resolver: &'a Resolver,
    pipeline: &'a Pipeline,
    cancel: CancellationToken,
}

/// Shared state of one walk.
struct Walk<'a> {
    builder: &'a GraphBuilder<'a>,
    /// Modules claimed by a worker. Only the worker that inserts a path
    /// spawns its processing.
    visited: Mutex<HashSet<PathBuf>>,
    /// First importer of each module, for import chains.
    parents: Mutex<HashMap<PathBuf, PathBuf>>,
    done: Mutex<HashMap<PathBuf, Discovered>>,
    error: Mutex<Option<BuildError>>,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(
        config: &'a BuildConfig,
        resolver: &'a Resolver,
        pipeline: &'a Pipeline,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            resolver,
            pipeline,
            cancel,
        }
    }

    /// Walk the graph from the configured entries.
    ///
    /// Fails with the first error any worker hits. Cycles are recorded on the
    /// graph, or fail the build under `cycles = "error"`.
    pub fn build(&self) -> Result<ModuleGraph, BuildError> {
        let mut entries = Vec::new();
        for entry in self.config.entry_points() {
            let path = self
                .resolver
                .resolve_entry(&entry.specifier)
                .map_err(|e| BuildError::UnresolvedImport {
                    specifier: entry.specifier.clone(),
                    importer: self.config.root.clone(),
                    reason: e.message,
                    import_chain: Vec::new(),
                })?;
            entries.push((entry.name, path));
        }

        let walk = Walk {
            builder: self,
            visited: Mutex::new(HashSet::default()),
            parents: Mutex::new(HashMap::default()),
            done: Mutex::new(HashMap::default()),
            error: Mutex::new(None),
        };

        let workers = self.config.worker_count();
        let run = || {
            rayon::scope(|s| {
                for (_, path) in &entries {
                    if walk.claim(path, None) {
                        let path = path.clone();
                        let walk = &walk;
                        s.spawn(move |s| walk.process(s, path));
                    }
                }
            });
        };
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start worker pool, using the global pool");
                run();
            }
        }

        if let Some(err) = lock(&walk.error).take() {
            return Err(err);
        }
        self.cancel.check()?;

        let done = std::mem::take(&mut *lock(&walk.done));
        let mut graph = assemble(self.config, &entries, done);

        let cycles: Vec<Vec<PathBuf>> = graph
            .find_cycles()
            .into_iter()
            .map(|cycle| {
                cycle
                    .into_iter()
                    .filter_map(|id| graph.get(id).map(|m| m.path.clone()))
                    .collect()
            })
            .collect();
        for cycle in &cycles {
            match self.config.cycles {
                CyclePolicy::Error => {
                    return Err(BuildError::CyclicDependency {
                        cycle: cycle.clone(),
                    })
                }
                CyclePolicy::Warn => {
                    tracing::warn!(cycle = %format_cycle(cycle), "import cycle");
                }
            }
        }
        graph.set_cycles(cycles);

        tracing::debug!(modules = graph.len(), entries = graph.entries().len(), "graph complete");
        Ok(graph)
    }
}

impl<'a> Walk<'a> {
    /// Mark `path` as visited. Returns `false` if another worker got there first.
    fn claim(&self, path: &Path, parent: Option<&Path>) -> bool {
        if !lock(&self.visited).insert(path.to_path_buf()) {
            return false;
        }
        if let Some(parent) = parent {
            lock(&self.parents).insert(path.to_path_buf(), parent.to_path_buf());
        }
        true
    }

    fn failed(&self) -> bool {
        lock(&self.error).is_some()
    }

    /// Record `err` unless an earlier error already won.
    fn fail(&self, err: BuildError) {
        let mut slot = lock(&self.error);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Entry first, `module` last.
    fn chain_to(&self, module: &Path) -> Vec<PathBuf> {
        let parents = lock(&self.parents);
        let mut chain = vec![module.to_path_buf()];
        let mut current = module;
        while let Some(parent) = parents.get(current) {
            if chain.iter().any(|p| p == parent) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }

    fn process<'s>(&'s self, scope: &rayon::Scope<'s>, path: PathBuf) {
        if self.failed() {
            return;
        }
        if let Err(err) = self.builder.cancel.check() {
            self.fail(err);
            return;
        }

        match self.load(&path) {
            Ok(discovered) => {
                for target in &discovered.targets {
                    if self.claim(target, Some(&path)) {
                        let target = target.clone();
                        scope.spawn(move |s| self.process(s, target));
                    }
                }
                lock(&self.done).insert(path, discovered);
            }
            Err(err) => self.fail(err),
        }
    }

    /// Read, transform and resolve the imports of one module.
    fn load(&self, path: &Path) -> Result<Discovered, BuildError> {
        let builder = self.builder;
        let config = builder.config;
        let _span = tracing::debug_span!("module", path = %path.display()).entered();

        let transform_error = |source: TransformError| BuildError::ModuleTransform {
            module: path.to_path_buf(),
            import_chain: self.chain_to(path),
            source,
        };

        let bytes = std::fs::read(path).map_err(|e| transform_error(e.into()))?;
        let id = rel_id(&config.root, path);
        let transformed = builder
            .pipeline
            .run(path, &id, bytes, config)
            .map_err(transform_error)?;

        let mut targets = Vec::with_capacity(transformed.imports.len());
        for import in &transformed.imports {
            let target = builder
                .resolver
                .resolve(&import.specifier, path)
                .map_err(|e| BuildError::UnresolvedImport {
                    specifier: import.specifier.clone(),
                    importer: path.to_path_buf(),
                    reason: e.message,
                    import_chain: self.chain_to(path),
                })?;
            targets.push(target);
        }

        tracing::trace!(imports = targets.len(), kind = %transformed.kind, "module loaded");
        Ok(Discovered {
            transformed,
            targets,
        })
    }
}

/// Number modules breadth-first from the entries and wire up edges.
fn assemble(
    config: &BuildConfig,
    entries: &[(String, PathBuf)],
    mut done: HashMap<PathBuf, Discovered>,
) -> ModuleGraph {
    let mut order: Vec<PathBuf> = Vec::with_capacity(done.len());
    let mut ids: HashMap<PathBuf, ModuleId> = HashMap::default();
    let mut queue: VecDeque<PathBuf> = entries.iter().map(|(_, p)| p.clone()).collect();

    while let Some(path) = queue.pop_front() {
        if ids.contains_key(&path) {
            continue;
        }
        let Some(discovered) = done.get(&path) else {
            continue;
        };
        ids.insert(path.clone(), order.len());
        queue.extend(discovered.targets.iter().cloned());
        order.push(path);
    }

    let mut graph = ModuleGraph::new();
    for path in order {
        let Some(Discovered {
            transformed,
            targets,
        }) = done.remove(&path)
        else {
            continue;
        };

        let mut links = HashMap::default();
        let mut dependencies = Vec::new();
        let mut dynamic_dependencies = Vec::new();
        for (import, target) in transformed.imports.iter().zip(&targets) {
            let Some(&dep) = ids.get(target) else {
                continue;
            };
            links.insert(import.specifier.clone(), dep);
            let edges = if import.kind == ImportKind::Dynamic {
                &mut dynamic_dependencies
            } else {
                &mut dependencies
            };
            if !edges.contains(&dep) {
                edges.push(dep);
            }
        }

        graph.add(Module {
            id: 0,
            rel_id: rel_id(&config.root, &path),
            path,
            kind: transformed.kind,
            rule: transformed.rule,
            code: transformed.code,
            imports: transformed.imports,
            links,
            dependencies,
            dynamic_dependencies,
            styles: transformed.styles,
            artifacts: transformed.artifacts,
        });
    }

    for (name, path) in entries {
        if let Some(&id) = ids.get(path) {
            graph.add_entry(name.clone(), id);
        }
    }
    graph
}

/// Project-relative id with `/` separators. Paths outside the root keep
/// their absolute form.
fn rel_id(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
