//! Module dependency graph.
//!
//! Built by [`GraphBuilder`] from the configured entries. Module ids are
//! assigned breadth-first from the entries in declaration order once the
//! parallel walk has finished, so they do not depend on worker scheduling.

mod builder;

pub use builder::GraphBuilder;

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap as HashMap;

use crate::artifact::Artifact;
use crate::imports::ImportRef;
use crate::transform::ContentKind;

/// Unique identifier for a module in the graph.
pub type ModuleId = usize;

/// A transformed module.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the project root with `/` separators. Used inside
    /// chunk bytes so output does not depend on where the project lives.
    pub rel_id: String,
    /// Kind produced by the matched rule chain.
    pub kind: ContentKind,
    /// Index of the matched rule.
    pub rule: usize,
    pub code: String,
    /// Import specifiers in declaration order.
    pub imports: Vec<ImportRef>,
    /// Specifier as written → module it resolved to.
    pub links: HashMap<String, ModuleId>,
    /// Static dependencies, in declaration order.
    pub dependencies: Vec<ModuleId>,
    /// Dynamic `import()` targets (code split points).
    pub dynamic_dependencies: Vec<ModuleId>,
    /// Extracted stylesheet fragments.
    pub styles: Vec<String>,
    /// Files this module's transformers asked to emit.
    pub artifacts: Vec<Artifact>,
}

impl Module {
    /// Bytes this module contributes to its chunk.
    #[must_use]
    pub fn size(&self) -> usize {
        self.code.len() + self.styles.iter().map(String::len).sum::<usize>()
    }
}

/// A named entry point and the module it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub module: ModuleId,
}

/// The module dependency graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    path_to_id: HashMap<PathBuf, ModuleId>,
    entries: Vec<Entry>,
    cycles: Vec<Vec<PathBuf>>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module; its `id` is overwritten with the next free id.
    pub fn add(&mut self, mut module: Module) -> ModuleId {
        let id = self.modules.len();
        module.id = id;
        self.path_to_id.insert(module.path.clone(), id);
        self.modules.push(module);
        id
    }

    pub fn add_entry(&mut self, name: impl Into<String>, module: ModuleId) {
        self.entries.push(Entry {
            name: name.into(),
            module,
        });
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    #[must_use]
    pub fn id_by_path(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Cycles found when the graph was built, each as `[a, b, a]`.
    #[must_use]
    pub fn cycles(&self) -> &[Vec<PathBuf>] {
        &self.cycles
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Dynamic import targets in discovery order, without duplicates.
    #[must_use]
    pub fn dynamic_targets(&self) -> Vec<ModuleId> {
        let mut seen = vec![false; self.modules.len()];
        let mut targets = Vec::new();
        for module in &self.modules {
            for &dep in &module.dynamic_dependencies {
                if !seen[dep] {
                    seen[dep] = true;
                    targets.push(dep);
                }
            }
        }
        targets
    }

    /// Modules in topological order (dependencies before dependents).
    ///
    /// Modules on a cycle are appended in id order once nothing else can be
    /// placed.
    #[must_use]
    pub fn toposort(&self) -> Vec<ModuleId> {
        let n = self.modules.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<ModuleId>> = vec![Vec::new(); n];

        for module in &self.modules {
            for &dep in &module.dependencies {
                dependents[dep].push(module.id);
                in_degree[module.id] += 1;
            }
        }

        let mut queue: std::collections::VecDeque<ModuleId> =
            (0..n).filter(|&id| in_degree[id] == 0).collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);

        while let Some(id) = queue.pop_front() {
            placed[id] = true;
            order.push(id);
            for &next in &dependents[id] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < n {
            order.extend((0..n).filter(|&id| !placed[id]));
        }
        order
    }

    /// Every cycle over static edges, found by a depth-first walk that tracks
    /// the active recursion stack. Each back edge yields one cycle, reported
    /// from the first module on the stack back to itself.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<ModuleId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            New,
            Active,
            Done,
        }

        let n = self.modules.len();
        let mut state = vec![State::New; n];
        let mut cycles = Vec::new();

        for root in 0..n {
            if state[root] != State::New {
                continue;
            }
            // (module, index of the next edge to follow)
            let mut stack: Vec<(ModuleId, usize)> = vec![(root, 0)];
            state[root] = State::Active;

            while let Some(top) = stack.last_mut() {
                let (id, edge) = *top;
                let deps = &self.modules[id].dependencies;
                if edge == deps.len() {
                    state[id] = State::Done;
                    stack.pop();
                    continue;
                }
                top.1 += 1;
                let next = deps[edge];

                match state[next] {
                    State::New => {
                        state[next] = State::Active;
                        stack.push((next, 0));
                    }
                    State::Active => {
                        let start = stack.iter().position(|&(m, _)| m == next).unwrap_or(0);
                        let mut cycle: Vec<ModuleId> =
                            stack[start..].iter().map(|&(m, _)| m).collect();
                        cycle.push(next);
                        cycles.push(cycle);
                    }
                    State::Done => {}
                }
            }
        }
        cycles
    }

    pub(crate) fn set_cycles(&mut self, cycles: Vec<Vec<PathBuf>>) {
        self.cycles = cycles;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Test module with static and dynamic dependencies.
    pub(crate) fn module(path: &str, deps: &[ModuleId], dynamic: &[ModuleId]) -> Module {
        Module {
            id: 0,
            path: PathBuf::from(format!("/p/{path}")),
            rel_id: path.to_string(),
            kind: ContentKind::Script,
            rule: 0,
            code: format!("// {path}\n"),
            imports: Vec::new(),
            links: HashMap::default(),
            dependencies: deps.to_vec(),
            dynamic_dependencies: dynamic.to_vec(),
            styles: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_empty_graph() {
        let graph = ModuleGraph::new();
        assert!(graph.is_empty());
        assert!(graph.toposort().is_empty());
        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_add_assigns_ids() {
        let mut graph = ModuleGraph::new();
        let a = graph.add(module("a.ts", &[], &[]));
        let b = graph.add(module("b.ts", &[], &[]));
        assert_eq!((a, b), (0, 1));
        assert_eq!(graph.get(b).unwrap().id, 1);
        assert_eq!(graph.id_by_path(Path::new("/p/b.ts")), Some(1));
    }

    #[test]
    fn test_toposort_linear() {
        let mut graph = ModuleGraph::new();
        // a -> b -> c
        graph.add(module("a.ts", &[1], &[]));
        graph.add(module("b.ts", &[2], &[]));
        graph.add(module("c.ts", &[], &[]));
        assert_eq!(graph.toposort(), vec![2, 1, 0]);
    }

    #[test]
    fn test_toposort_keeps_cyclic_modules() {
        let mut graph = ModuleGraph::new();
        graph.add(module("a.ts", &[1], &[]));
        graph.add(module("b.ts", &[0], &[]));
        graph.add(module("c.ts", &[], &[]));
        assert_eq!(graph.toposort(), vec![2, 0, 1]);
    }

    #[test]
    fn test_find_two_module_cycle() {
        let mut graph = ModuleGraph::new();
        graph.add(module("a.ts", &[1], &[]));
        graph.add(module("b.ts", &[0], &[]));
        assert_eq!(graph.find_cycles(), vec![vec![0, 1, 0]]);
    }

    #[test]
    fn test_find_cycle_reports_full_path() {
        let mut graph = ModuleGraph::new();
        // entry -> a -> b -> c -> a
        graph.add(module("entry.ts", &[1], &[]));
        graph.add(module("a.ts", &[2], &[]));
        graph.add(module("b.ts", &[3], &[]));
        graph.add(module("c.ts", &[1], &[]));
        assert_eq!(graph.find_cycles(), vec![vec![1, 2, 3, 1]]);
    }

    #[test]
    fn test_dynamic_edges_are_not_cycles() {
        let mut graph = ModuleGraph::new();
        graph.add(module("a.ts", &[], &[1]));
        graph.add(module("b.ts", &[0], &[]));
        assert!(graph.find_cycles().is_empty());
        assert_eq!(graph.dynamic_targets(), vec![1]);
    }

    #[test]
    fn test_diamond_has_no_cycle() {
        let mut graph = ModuleGraph::new();
        graph.add(module("main.ts", &[1, 2], &[]));
        graph.add(module("a.ts", &[3], &[]));
        graph.add(module("b.ts", &[3], &[]));
        graph.add(module("shared.ts", &[], &[]));
        assert!(graph.find_cycles().is_empty());
        let order = graph.toposort();
        assert_eq!(order.last(), Some(&0));
        assert_eq!(order[0], 3);
    }
}
