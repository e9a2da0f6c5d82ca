//! Chunk serialization, content hashes and output filenames.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use weft_util::hash::{blake3_bytes, blake3_parts};

use super::rewrite::{rewrite_module, Links};
use super::{ChunkGraph, ChunkId, ChunkKind};
use crate::artifact::{Artifact, ArtifactKind};
use crate::config::BuildConfig;
use crate::emit::join_url;
use crate::env::js_string;
use crate::graph::ModuleGraph;
use crate::template::{render, NameVars};

/// Module registry and chunk loader, included in every chunk that starts a
/// module. The first copy to run wins.
///
/// `__weft_import__(id)` loads the files listed under `id` in
/// `__weft_chunks__` one after another, then requires the module. Files are
/// loaded through `__weft_load_script__` when the host defines it and a
/// `<script>` tag otherwise.
const RUNTIME: &str = r#"(function (g) {
  if (g.__weft_require__) return;
  var modules = (g.__weft_modules__ = g.__weft_modules__ || {});
  var chunks = (g.__weft_chunks__ = g.__weft_chunks__ || {});
  var cache = {};
  var loading = {};
  function require(id) {
    if (cache[id]) return cache[id].exports;
    var factory = modules[id];
    if (!factory) throw new Error("[weft] module not loaded: " + id);
    var module = (cache[id] = { exports: {} });
    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }
  function load(url) {
    if (!loading[url]) {
      loading[url] = g.__weft_load_script__
        ? Promise.resolve().then(function () { return g.__weft_load_script__(url); })
        : new Promise(function (resolve, reject) {
            var script = document.createElement("script");
            script.src = url;
            script.onload = resolve;
            script.onerror = function () { reject(new Error("[weft] failed to load " + url)); };
            document.head.appendChild(script);
          });
    }
    return loading[url];
  }
  g.__weft_require__ = require;
  g.__weft_import__ = function (id) {
    return (chunks[id] || [])
      .reduce(function (ready, url) {
        return ready.then(function () { return load(url); });
      }, Promise.resolve())
      .then(function () { return require(id); });
  };
  g.__weft_default__ = function (m) {
    return m && m.__esModule ? m.default : m;
  };
  g.__weft_export_star__ = function (target, source) {
    Object.keys(source).forEach(function (key) {
      if (key === "default" || key === "__esModule" || key in target) return;
      Object.defineProperty(target, key, {
        enumerable: true,
        get: function () { return source[key]; },
      });
    });
  };
})(globalThis);
"#;

/// A chunk serialized to its final bytes.
#[derive(Debug, Clone)]
pub struct RenderedChunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    /// Script file, relative to the output directory.
    pub file: String,
    /// Extracted stylesheet file, if any module in the chunk had styles.
    pub css_file: Option<String>,
    /// BLAKE3 of the chunk's modules and of every chunk it can load on
    /// demand, so a file name changes whenever a name it refers to does.
    pub contenthash: String,
    /// BLAKE3 over `contenthash` and the stylesheet bytes.
    pub chunkhash: String,
    /// Module ids, project-relative.
    pub modules: Vec<String>,
    pub dependencies: Vec<ChunkId>,
    pub dynamic_imports: Vec<ChunkId>,
    script: Vec<u8>,
    stylesheet: Option<Vec<u8>>,
}

impl RenderedChunk {
    #[must_use]
    pub fn script(&self) -> &[u8] {
        &self.script
    }

    #[must_use]
    pub fn stylesheet(&self) -> Option<&[u8]> {
        self.stylesheet.as_deref()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.script.len() + self.stylesheet.as_ref().map_or(0, Vec::len)
    }
}

/// Every chunk of a build, rendered.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    chunks: Vec<RenderedChunk>,
    /// Entry name and the chunk holding it, in declaration order.
    entries: Vec<(String, ChunkId)>,
    /// Build hash: BLAKE3 over every chunk hash in chunk order.
    hash: String,
}

impl ChunkSet {
    /// Serialize every chunk and instantiate its filename templates.
    #[must_use]
    pub fn render(graph: &ModuleGraph, chunks: &ChunkGraph, config: &BuildConfig) -> Self {
        struct Pending {
            body: String,
            stylesheet: Option<Vec<u8>>,
            contenthash: String,
            csshash: Option<String>,
            chunkhash: String,
        }

        let bodies: Vec<String> = chunks
            .chunks()
            .iter()
            .map(|chunk| serialize_body(graph, &chunk.modules, &chunk.entry_modules))
            .collect();
        let body_hashes: Vec<String> = bodies.iter().map(|b| blake3_bytes(b.as_bytes())).collect();

        let pending: Vec<Pending> = chunks
            .chunks()
            .iter()
            .zip(bodies)
            .map(|(chunk, body)| {
                let stylesheet = serialize_styles(graph, &chunk.modules);
                let mut parts = vec![body.as_bytes()];
                parts.extend(
                    on_demand_closure(graph, chunks, chunk.id)
                        .into_iter()
                        .map(|id| body_hashes[id].as_bytes()),
                );
                let contenthash = blake3_parts(parts);
                let csshash = stylesheet.as_deref().map(blake3_bytes);
                let chunkhash = blake3_parts([
                    contenthash.as_bytes(),
                    stylesheet.as_deref().unwrap_or_default(),
                ]);
                Pending {
                    body,
                    stylesheet,
                    contenthash,
                    csshash,
                    chunkhash,
                }
            })
            .collect();

        let hash = blake3_parts(pending.iter().map(|p| p.chunkhash.as_bytes()));

        let mut rendered: Vec<RenderedChunk> = chunks
            .chunks()
            .iter()
            .zip(pending)
            .map(|(chunk, p)| {
                let id = chunk.id.to_string();
                let template = if chunk.kind == ChunkKind::Entry {
                    &config.output.filename
                } else {
                    &config.output.chunk_filename
                };
                let file = render(
                    template,
                    &NameVars {
                        name: &chunk.name,
                        id: &id,
                        ext: "js",
                        hash: &hash,
                        chunkhash: &p.chunkhash,
                        contenthash: &p.contenthash,
                    },
                );
                let css_file = p.csshash.as_deref().map(|csshash| {
                    render(
                        &config.output.css_filename,
                        &NameVars {
                            name: &chunk.name,
                            id: &id,
                            ext: "css",
                            hash: &hash,
                            chunkhash: &p.chunkhash,
                            contenthash: csshash,
                        },
                    )
                });

                RenderedChunk {
                    id: chunk.id,
                    name: chunk.name.clone(),
                    kind: chunk.kind,
                    file,
                    css_file,
                    contenthash: p.contenthash,
                    chunkhash: p.chunkhash,
                    modules: chunk
                        .modules
                        .iter()
                        .filter_map(|&m| graph.get(m).map(|m| m.rel_id.clone()))
                        .collect(),
                    dependencies: chunk.dependencies.clone(),
                    dynamic_imports: chunk.dynamic_imports.clone(),
                    script: p.body.into_bytes(),
                    stylesheet: p.stylesheet,
                }
            })
            .collect();

        // File names are known only now; prepend each chunk's loader table.
        let files: Vec<String> = rendered
            .iter()
            .map(|c| join_url(&config.output.public_path, &c.file))
            .collect();
        for chunk in chunks.chunks() {
            let table = loader_table(graph, chunks, chunk.id, &files);
            if table.is_empty() {
                continue;
            }
            let script = &mut rendered[chunk.id].script;
            let mut prelude = format!(
                "Object.assign((globalThis.__weft_chunks__ = globalThis.__weft_chunks__ || {{}}), {});\n",
                serde_json::to_string(&table).unwrap_or_else(|_| "{}".to_string())
            )
            .into_bytes();
            prelude.append(script);
            *script = prelude;
        }

        let mut entries = Vec::new();
        for entry in graph.entries() {
            if let Some(chunk) = chunks.chunk_for_module(entry.module) {
                entries.push((entry.name.clone(), chunk));
            }
        }

        Self {
            chunks: rendered,
            entries,
            hash,
        }
    }

    #[must_use]
    pub fn chunks(&self) -> &[RenderedChunk] {
        &self.chunks
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, ChunkId)] {
        &self.entries
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// `chunk` and its transitive dependencies, dependencies first.
    #[must_use]
    pub fn load_order(&self, chunk: ChunkId) -> Vec<ChunkId> {
        super::load_order(chunk, |id| {
            self.chunks
                .get(id)
                .map_or(&[][..], |c| c.dependencies.as_slice())
        })
    }

    /// Chunks the HTML document loads: every entry's load order, merged,
    /// so shared chunks come before their dependents.
    #[must_use]
    pub fn document_order(&self) -> Vec<&RenderedChunk> {
        let mut seen = vec![false; self.chunks.len()];
        let mut order = Vec::new();
        for (_, chunk) in &self.entries {
            for id in self.load_order(*chunk) {
                if !seen[id] {
                    seen[id] = true;
                    order.push(&self.chunks[id]);
                }
            }
        }
        order
    }

    /// Script and stylesheet files of every chunk.
    #[must_use]
    pub fn artifacts(&self) -> Vec<Artifact> {
        let mut artifacts = Vec::with_capacity(self.chunks.len() * 2);
        for chunk in &self.chunks {
            artifacts.push(Artifact::new(
                chunk.file.clone(),
                ArtifactKind::Script,
                chunk.script.clone(),
            ));
            if let (Some(file), Some(css)) = (&chunk.css_file, &chunk.stylesheet) {
                artifacts.push(Artifact::new(
                    file.clone(),
                    ArtifactKind::Stylesheet,
                    css.clone(),
                ));
            }
        }
        artifacts
    }

    /// Description of the chunks for `manifest.json`.
    #[must_use]
    pub fn manifest(&self, config: &BuildConfig) -> Manifest {
        let file = |id: &ChunkId| self.chunks.get(*id).map(|c| c.file.clone());
        Manifest {
            hash: self.hash.clone(),
            public_path: config.output.public_path.clone(),
            entries: self
                .entries
                .iter()
                .map(|(name, chunk)| {
                    let files = self
                        .load_order(*chunk)
                        .iter()
                        .filter_map(file)
                        .collect();
                    (name.clone(), files)
                })
                .collect(),
            chunks: self
                .chunks
                .iter()
                .map(|c| ManifestChunk {
                    id: c.id,
                    name: c.name.clone(),
                    kind: c.kind,
                    file: c.file.clone(),
                    css: c.css_file.clone(),
                    size: c.size(),
                    modules: c.modules.clone(),
                    dependencies: c.dependencies.iter().filter_map(file).collect(),
                    dynamic_imports: c.dynamic_imports.iter().filter_map(file).collect(),
                })
                .collect(),
        }
    }
}

/// `manifest.json` contents.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub hash: String,
    pub public_path: String,
    /// Entry name → script files to load, in order.
    pub entries: BTreeMap<String, Vec<String>>,
    pub chunks: Vec<ManifestChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestChunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    pub size: usize,
    pub modules: Vec<String>,
    pub dependencies: Vec<String>,
    pub dynamic_imports: Vec<String>,
}

impl Manifest {
    #[must_use]
    pub fn to_artifact(&self) -> Artifact {
        let json = serde_json::to_vec_pretty(self).unwrap_or_default();
        Artifact::new("manifest.json", ArtifactKind::Manifest, json)
    }
}

/// Chunk script without its loader table: register every module, then
/// start the entry modules.
fn serialize_body(graph: &ModuleGraph, modules: &[usize], entries: &[usize]) -> String {
    let mut out = String::from(
        "(globalThis.__weft_modules__ = globalThis.__weft_modules__ || {});\n",
    );

    for module in modules.iter().filter_map(|&m| graph.get(m)) {
        let links: Links<'_> = module
            .links
            .iter()
            .filter_map(|(spec, &dep)| Some((spec.as_str(), graph.get(dep)?.rel_id.as_str())))
            .collect();
        let code = rewrite_module(&module.code, &links);

        out.push_str("globalThis.__weft_modules__[");
        out.push_str(&js_string(&module.rel_id));
        out.push_str("] = function (module, exports, require) {\n");
        out.push_str(&code);
        if !code.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("};\n");
    }

    if !entries.is_empty() {
        out.push_str(RUNTIME);
        for entry in entries.iter().filter_map(|&m| graph.get(m)) {
            out.push_str("globalThis.__weft_require__(");
            out.push_str(&js_string(&entry.rel_id));
            out.push_str(");\n");
        }
    }
    out
}

/// Chunks holding the dynamic-import targets of `chunk`'s modules that are
/// not already loaded with it. Their files are what `__weft_import__`
/// fetches.
fn on_demand(graph: &ModuleGraph, chunks: &ChunkGraph, chunk: ChunkId) -> BTreeMap<String, Vec<ChunkId>> {
    let Some(owner) = chunks.get(chunk) else {
        return BTreeMap::new();
    };
    let present = chunks.load_order(chunk);
    let mut table = BTreeMap::new();
    for module in owner.modules.iter().filter_map(|&m| graph.get(m)) {
        for &dep in &module.dynamic_dependencies {
            let (Some(target), Some(dep)) = (chunks.chunk_for_module(dep), graph.get(dep)) else {
                continue;
            };
            let load: Vec<ChunkId> = chunks
                .load_order(target)
                .into_iter()
                .filter(|id| !present.contains(id))
                .collect();
            if !load.is_empty() {
                table.insert(dep.rel_id.clone(), load);
            }
        }
    }
    table
}

/// Module id → public URLs to load before requiring it.
fn loader_table(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    chunk: ChunkId,
    files: &[String],
) -> BTreeMap<String, Vec<String>> {
    on_demand(graph, chunks, chunk)
        .into_iter()
        .map(|(id, load)| (id, load.into_iter().filter_map(|c| files.get(c).cloned()).collect()))
        .collect()
}

/// Every chunk whose file name can end up in `chunk`'s loader table, directly
/// or through another loader table. Excludes `chunk`, ascending.
fn on_demand_closure(graph: &ModuleGraph, chunks: &ChunkGraph, chunk: ChunkId) -> Vec<ChunkId> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![chunk];
    while let Some(id) = stack.pop() {
        for load in on_demand(graph, chunks, id).into_values() {
            for target in load {
                if target != chunk && seen.insert(target) {
                    stack.push(target);
                }
            }
        }
    }
    seen.into_iter().collect()
}

/// Extracted styles of `modules`, in module order.
fn serialize_styles(graph: &ModuleGraph, modules: &[usize]) -> Option<Vec<u8>> {
    let mut out = String::new();
    for module in modules.iter().filter_map(|&m| graph.get(m)) {
        for style in &module.styles {
            out.push_str("/* ");
            out.push_str(&module.rel_id);
            out.push_str(" */\n");
            out.push_str(style);
            if !style.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    (!out.is_empty()).then(|| out.into_bytes())
}
