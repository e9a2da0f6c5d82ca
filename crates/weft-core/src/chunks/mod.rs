//! Code splitting.
//!
//! Partitions the module graph into chunks according to the splitting
//! policy. Chunk roots are the entries plus every dynamic-import target; a
//! walk from a root follows static edges and stops at other roots, which
//! become chunk dependencies instead.
//!
//! Every module lands in exactly one chunk. Chunk dependencies are derived
//! from module edges after placement, so an entry can always reach all of
//! its modules through its chunk and the chunks it depends on.

mod render;
mod rewrite;

pub use render::{ChunkSet, Manifest, ManifestChunk, RenderedChunk};

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;

use crate::config::SplitPolicy;
use crate::graph::{ModuleGraph, ModuleId};

/// Unique identifier for a chunk.
pub type ChunkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Loaded by the HTML document; starts its entry modules.
    Entry,
    /// Modules hoisted out of several roots.
    Shared,
    /// Loaded on demand by a dynamic `import()`.
    Async,
}

/// A group of modules loaded together.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    /// Modules in topological order.
    pub modules: Vec<ModuleId>,
    /// Modules started when this chunk loads.
    pub entry_modules: Vec<ModuleId>,
    /// Chunks that must load first.
    pub dependencies: Vec<ChunkId>,
    /// Chunks loaded on demand from this one.
    pub dynamic_imports: Vec<ChunkId>,
    /// Indexes of the roots whose walk reached this chunk.
    roots: Vec<usize>,
}

/// A chunk root: an entry or a dynamic-import target.
struct Root {
    module: ModuleId,
    name: String,
    kind: ChunkKind,
}

/// Chunks over a module graph.
#[derive(Debug)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    module_to_chunk: Vec<ChunkId>,
}

impl ChunkGraph {
    /// Partition `graph` with `policy`.
    #[must_use]
    pub fn split(graph: &ModuleGraph, policy: SplitPolicy) -> Self {
        let roots = collect_roots(graph);
        let chunks = match policy {
            SplitPolicy::None => split_none(graph, &roots),
            SplitPolicy::All => split_all(graph, &roots),
            SplitPolicy::Async => split_async(graph, &roots),
        };

        let mut chunk_graph = Self {
            chunks,
            module_to_chunk: Vec::new(),
        };
        chunk_graph.link(graph);
        tracing::debug!(?policy, chunks = chunk_graph.chunks.len(), "split");
        chunk_graph
    }

    /// Merge non-entry chunks smaller than `min_size` bytes into the
    /// smallest chunk depending on them, falling back to the smallest chunk
    /// that shares a root. Repeats until nothing changes.
    ///
    /// Startup code travels with the chunk that holds it, so a chunk with
    /// entry modules only takes in a chunk nothing else depends on.
    /// Otherwise loading a second entry would start the first.
    pub fn merge_small(&mut self, graph: &ModuleGraph, min_size: u64) {
        // Chunks with nowhere to go, by first module.
        let mut stuck: HashSet<ModuleId> = HashSet::default();

        loop {
            let sizes: Vec<u64> = self.chunks.iter().map(|c| chunk_size(graph, c)).collect();
            let candidate = self
                .chunks
                .iter()
                .filter(|c| c.kind != ChunkKind::Entry && sizes[c.id] < min_size)
                .filter(|c| c.modules.first().map_or(true, |m| !stuck.contains(m)))
                .min_by_key(|c| (sizes[c.id], c.id))
                .map(|c| c.id);
            let Some(small) = candidate else {
                break;
            };

            let dependents: Vec<ChunkId> = self
                .chunks
                .iter()
                .filter(|c| {
                    c.id != small
                        && (c.dependencies.contains(&small) || c.dynamic_imports.contains(&small))
                })
                .map(|c| c.id)
                .collect();
            let sole_dependent = match dependents.as_slice() {
                [only] => Some(*only),
                _ => None,
            };
            let pick = |ids: Vec<ChunkId>| {
                ids.into_iter()
                    .filter(|&id| self.chunks[id].entry_modules.is_empty())
                    .min_by_key(|&id| (sizes[id], id))
            };
            let target = sole_dependent
                .or_else(|| pick(dependents.clone()))
                .or_else(|| {
                    let roots = &self.chunks[small].roots;
                    pick(
                        self.chunks
                            .iter()
                            .filter(|c| c.id != small && c.roots.iter().any(|r| roots.contains(r)))
                            .map(|c| c.id)
                            .collect(),
                    )
                });

            match target {
                Some(target) => {
                    tracing::debug!(
                        chunk = %self.chunks[small].name,
                        into = %self.chunks[target].name,
                        size = sizes[small],
                        "merging small chunk"
                    );
                    self.absorb(graph, target, small);
                }
                None => {
                    if let Some(&first) = self.chunks[small].modules.first() {
                        stuck.insert(first);
                    } else {
                        self.chunks.remove(small);
                        self.renumber(graph);
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    #[must_use]
    pub fn chunk_for_module(&self, module: ModuleId) -> Option<ChunkId> {
        self.module_to_chunk.get(module).copied()
    }

    /// `chunk` and its transitive dependencies, dependencies first.
    #[must_use]
    pub fn load_order(&self, chunk: ChunkId) -> Vec<ChunkId> {
        load_order(chunk, |id| {
            self.chunks
                .get(id)
                .map_or(&[][..], |c| c.dependencies.as_slice())
        })
    }

    /// Move `from`'s modules into `into` and drop `from`.
    fn absorb(&mut self, graph: &ModuleGraph, into: ChunkId, from: ChunkId) {
        let donor = self.chunks[from].clone();
        let target = &mut self.chunks[into];
        target.modules.extend(donor.modules);
        target.entry_modules.extend(donor.entry_modules);
        for root in donor.roots {
            if !target.roots.contains(&root) {
                target.roots.push(root);
            }
        }
        self.chunks.remove(from);
        self.renumber(graph);
    }

    fn renumber(&mut self, graph: &ModuleGraph) {
        for (id, chunk) in self.chunks.iter_mut().enumerate() {
            chunk.id = id;
        }
        self.link(graph);
    }

    /// Order modules and derive chunk edges from module edges.
    fn link(&mut self, graph: &ModuleGraph) {
        let order = graph.toposort();
        let mut position = vec![0usize; graph.len()];
        for (i, &id) in order.iter().enumerate() {
            position[id] = i;
        }

        self.module_to_chunk = vec![0; graph.len()];
        for chunk in &mut self.chunks {
            chunk.modules.sort_by_key(|&m| position[m]);
            for &m in &chunk.modules {
                self.module_to_chunk[m] = chunk.id;
            }
        }

        for chunk in &mut self.chunks {
            chunk.dependencies.clear();
            chunk.dynamic_imports.clear();
            for &m in &chunk.modules {
                let Some(module) = graph.get(m) else {
                    continue;
                };
                for &dep in &module.dependencies {
                    let target = self.module_to_chunk[dep];
                    if target != chunk.id && !chunk.dependencies.contains(&target) {
                        chunk.dependencies.push(target);
                    }
                }
                for &dep in &module.dynamic_dependencies {
                    let target = self.module_to_chunk[dep];
                    if target != chunk.id && !chunk.dynamic_imports.contains(&target) {
                        chunk.dynamic_imports.push(target);
                    }
                }
            }
        }
    }
}

/// Depth-first post-order over `deps`, tolerating cycles.
pub(crate) fn load_order<'a, F>(start: ChunkId, deps: F) -> Vec<ChunkId>
where
    F: Fn(ChunkId) -> &'a [ChunkId],
{
    fn visit<'a, F>(id: ChunkId, deps: &F, seen: &mut HashSet<ChunkId>, out: &mut Vec<ChunkId>)
    where
        F: Fn(ChunkId) -> &'a [ChunkId],
    {
        if !seen.insert(id) {
            return;
        }
        for &dep in deps(id) {
            visit(dep, deps, seen, out);
        }
        out.push(id);
    }

    let mut seen = HashSet::default();
    let mut out = Vec::new();
    visit(start, &deps, &mut seen, &mut out);
    out
}

fn chunk_size(graph: &ModuleGraph, chunk: &Chunk) -> u64 {
    chunk
        .modules
        .iter()
        .filter_map(|&m| graph.get(m))
        .map(|m| m.size() as u64)
        .sum()
}

/// Entries in declaration order, then dynamic-import targets in discovery
/// order. A module is a root at most once.
fn collect_roots(graph: &ModuleGraph) -> Vec<Root> {
    let mut seen = HashSet::default();
    let mut roots = Vec::new();

    for entry in graph.entries() {
        if seen.insert(entry.module) {
            roots.push(Root {
                module: entry.module,
                name: entry.name.clone(),
                kind: ChunkKind::Entry,
            });
        }
    }
    for target in graph.dynamic_targets() {
        if seen.insert(target) {
            let name = graph
                .get(target)
                .and_then(|m| m.path.file_stem())
                .and_then(|s| s.to_str())
                .unwrap_or("chunk")
                .to_string();
            roots.push(Root {
                module: target,
                name,
                kind: ChunkKind::Async,
            });
        }
    }
    roots
}

/// Static walk from `start`. Modules for which `stop` holds are neither
/// collected nor descended into; `start` itself is always collected.
fn static_reach(
    graph: &ModuleGraph,
    start: ModuleId,
    stop: impl Fn(ModuleId) -> bool,
) -> Vec<ModuleId> {
    let mut seen = HashSet::default();
    let mut stack = vec![start];
    let mut reached = Vec::new();

    while let Some(id) = stack.pop() {
        if !seen.insert(id) || (id != start && stop(id)) {
            continue;
        }
        reached.push(id);
        if let Some(module) = graph.get(id) {
            stack.extend(module.dependencies.iter().rev().copied());
        }
    }
    reached
}

fn root_index(graph: &ModuleGraph, roots: &[Root]) -> Vec<Option<usize>> {
    let mut index = vec![None; graph.len()];
    for (i, root) in roots.iter().enumerate() {
        index[root.module] = Some(i);
    }
    index
}

fn root_chunk(id: ChunkId, root: &Root, names: &mut HashSet<String>) -> Chunk {
    Chunk {
        id,
        name: unique_name(&root.name, id, names),
        kind: root.kind,
        modules: Vec::new(),
        entry_modules: if root.kind == ChunkKind::Entry {
            vec![root.module]
        } else {
            Vec::new()
        },
        dependencies: Vec::new(),
        dynamic_imports: Vec::new(),
        roots: vec![id],
    }
}

fn unique_name(base: &str, id: ChunkId, names: &mut HashSet<String>) -> String {
    let name = if names.contains(base) {
        format!("{base}-{id}")
    } else {
        base.to_string()
    };
    names.insert(name.clone());
    name
}

fn split_none(graph: &ModuleGraph, roots: &[Root]) -> Vec<Chunk> {
    let name = match graph.entries() {
        [only] => only.name.clone(),
        _ => "main".to_string(),
    };
    vec![Chunk {
        id: 0,
        name,
        kind: ChunkKind::Entry,
        modules: (0..graph.len()).collect(),
        entry_modules: graph.entries().iter().map(|e| e.module).collect(),
        dependencies: Vec::new(),
        dynamic_imports: Vec::new(),
        roots: (0..roots.len()).collect(),
    }]
}

/// Place each module by the set of roots that statically reach it.
fn split_all(graph: &ModuleGraph, roots: &[Root]) -> Vec<Chunk> {
    let is_root = root_index(graph, roots);
    let mut names = HashSet::default();
    let mut chunks: Vec<Chunk> = roots
        .iter()
        .enumerate()
        .map(|(i, root)| root_chunk(i, root, &mut names))
        .collect();

    // Root indexes reaching each module, ascending.
    let mut reached_by: Vec<Vec<usize>> = vec![Vec::new(); graph.len()];
    for (i, root) in roots.iter().enumerate() {
        for m in static_reach(graph, root.module, |m| is_root[m].is_some()) {
            reached_by[m].push(i);
        }
    }

    let mut shared: HashMap<Vec<usize>, ChunkId> = HashMap::default();
    for (m, set) in reached_by.into_iter().enumerate() {
        match set.as_slice() {
            [] => {
                if let Some(first) = chunks.first_mut() {
                    first.modules.push(m);
                }
            }
            [only] => chunks[*only].modules.push(m),
            _ => {
                let id = match shared.get(&set) {
                    Some(&id) => id,
                    None => {
                        let id = chunks.len();
                        let base = set
                            .iter()
                            .map(|&r| roots[r].name.as_str())
                            .collect::<Vec<_>>()
                            .join("~");
                        chunks.push(Chunk {
                            id,
                            name: unique_name(&base, id, &mut names),
                            kind: ChunkKind::Shared,
                            modules: Vec::new(),
                            entry_modules: Vec::new(),
                            dependencies: Vec::new(),
                            dynamic_imports: Vec::new(),
                            roots: set.clone(),
                        });
                        shared.insert(set, id);
                        id
                    }
                };
                chunks[id].modules.push(m);
            }
        }
    }
    chunks
}

/// Each module belongs to the first root that reaches it.
fn split_async(graph: &ModuleGraph, roots: &[Root]) -> Vec<Chunk> {
    let is_root = root_index(graph, roots);
    let mut names = HashSet::default();
    let mut owner: Vec<Option<ChunkId>> = vec![None; graph.len()];
    let mut chunks = Vec::with_capacity(roots.len());

    for (i, root) in roots.iter().enumerate() {
        let mut chunk = root_chunk(i, root, &mut names);
        let reached = static_reach(graph, root.module, |m| {
            is_root[m].is_some() || owner[m].is_some()
        });
        for m in reached {
            owner[m] = Some(i);
            chunk.modules.push(m);
        }
        chunks.push(chunk);
    }

    for (m, owned) in owner.iter().enumerate() {
        if owned.is_none() {
            if let Some(first) = chunks.first_mut() {
                first.modules.push(m);
            }
        }
    }
    chunks
}
