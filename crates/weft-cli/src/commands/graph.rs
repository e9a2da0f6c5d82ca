//! `weft graph` command implementation.

use super::{fail, process_env, ConfigArgs};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;
use weft_core::graph::ModuleGraph;
use weft_core::{Build, BuildError};

/// Graph command action.
#[derive(Debug, Clone)]
pub struct GraphAction {
    pub cwd: PathBuf,
    pub config: ConfigArgs,
}

#[derive(Serialize)]
struct GraphJson {
    ok: bool,
    entries: Vec<EntryJson>,
    modules: Vec<ModuleJson>,
    cycles: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct EntryJson {
    name: String,
    module: String,
}

#[derive(Serialize)]
struct ModuleJson {
    id: usize,
    path: String,
    kind: String,
    size: usize,
    dependencies: Vec<String>,
    dynamic_dependencies: Vec<String>,
}

/// Run the graph command.
pub fn run(action: GraphAction, json: bool) -> Result<()> {
    let config = match action.config.load(&action.cwd) {
        Ok(config) => config,
        Err(e) => fail(&BuildError::Config(e), json),
    };

    let graph = match Build::new(&config).with_env(process_env()).graph() {
        Ok(graph) => graph,
        Err(err) => fail(&err, json),
    };

    let result = to_json(&graph, &config.root);
    if json {
        println!("{}", serde_json::to_string(&result).into_diagnostic()?);
    } else {
        print_tree(&result);
    }
    Ok(())
}

fn to_json(graph: &ModuleGraph, root: &std::path::Path) -> GraphJson {
    let name = |id: usize| graph.get(id).map(|m| m.rel_id.clone()).unwrap_or_default();
    GraphJson {
        ok: true,
        entries: graph
            .entries()
            .iter()
            .map(|e| EntryJson {
                name: e.name.clone(),
                module: name(e.module),
            })
            .collect(),
        modules: graph
            .iter()
            .map(|m| ModuleJson {
                id: m.id,
                path: m.rel_id.clone(),
                kind: m.kind.to_string(),
                size: m.size(),
                dependencies: m.dependencies.iter().map(|&d| name(d)).collect(),
                dynamic_dependencies: m.dynamic_dependencies.iter().map(|&d| name(d)).collect(),
            })
            .collect(),
        cycles: graph
            .cycles()
            .iter()
            .map(|cycle| {
                cycle
                    .iter()
                    .map(|p| {
                        p.strip_prefix(root)
                            .unwrap_or(p)
                            .to_string_lossy()
                            .replace('\\', "/")
                    })
                    .collect()
            })
            .collect(),
    }
}

fn print_tree(graph: &GraphJson) {
    for entry in &graph.entries {
        println!("  entry {} -> {}", entry.name, entry.module);
    }
    println!();
    for module in &graph.modules {
        println!("  [{}] {} ({}, {} B)", module.id, module.path, module.kind, module.size);
        for dep in &module.dependencies {
            println!("      -> {dep}");
        }
        for dep in &module.dynamic_dependencies {
            println!("      ~> {dep} (dynamic)");
        }
    }
    for cycle in &graph.cycles {
        println!("  cycle: [{}]", cycle.join(", "));
    }
}
