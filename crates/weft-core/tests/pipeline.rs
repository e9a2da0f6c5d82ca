//! End-to-end builds over small on-disk projects.
//!
//! These tests verify:
//! - Identical inputs produce byte-identical output and hashes
//! - Shared modules are hoisted once under `splitting = "all"`
//! - Failed and cancelled builds leave the previous output untouched
//! - Import cycles are reported with the full path
//! - Emitted chunks run under Node, including chunks loaded on demand
//! - Small chunks merge in production without entries starting each other

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;
use weft_core::chunks::ChunkKind;
use weft_core::config::{CyclePolicy, Entries, Mode, RuleConfig, SplitPolicy};
use weft_core::{Build, BuildConfig, BuildError, BuildReport, CancellationToken};

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

fn config(dir: &TempDir) -> BuildConfig {
    BuildConfig::new(dunce::canonicalize(dir.path()).unwrap())
}

fn build(config: &BuildConfig) -> Result<BuildReport, BuildError> {
    Build::new(config).run()
}

/// Every file under `dir`, relative path → bytes.
fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap();
            (
                rel.to_string_lossy().replace('\\', "/"),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

/// Read `manifest.json` from the build output.
fn manifest(dir: &TempDir) -> serde_json::Value {
    serde_json::from_slice(&fs::read(dir.path().join("build/manifest.json")).unwrap()).unwrap()
}

/// Load `files` from the build output into one Node process, in order, and
/// return its stdout. `None` when Node is not installed.
fn run_in_node(dir: &TempDir, files: &[String]) -> Option<String> {
    const LOADER: &str = r#"
const path = require("path");
const out = process.env.WEFT_TEST_OUT;
globalThis.__weft_load_script__ = (url) => require(path.join(out, url));
for (const file of JSON.parse(process.env.WEFT_TEST_FILES)) require(path.join(out, file));
"#;
    if Command::new("node").arg("--version").output().is_err() {
        eprintln!("node not found, skipping execution");
        return None;
    }
    let output = Command::new("node")
        .arg("-e")
        .arg(LOADER)
        .env("WEFT_TEST_OUT", dir.path().join("build"))
        .env("WEFT_TEST_FILES", serde_json::to_string(files).unwrap())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "node failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Some(String::from_utf8(output.stdout).unwrap())
}

fn entry_files(manifest: &serde_json::Value, entry: &str) -> Vec<String> {
    manifest["entries"][entry]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f.as_str().unwrap().to_string())
        .collect()
}

fn four_chunk_project() -> TempDir {
    project(&[
        ("src/main.ts", "import './a';\nimport './b';\nconsole.log('main');"),
        ("src/a.ts", "import { s } from './shared';\nexport const a = s + 1;"),
        ("src/b.ts", "import { s } from './shared';\nexport const b = s + 2;"),
        ("src/shared.ts", "export const s = 40;"),
    ])
}

#[test]
fn test_identical_inputs_give_identical_output() {
    let dir = four_chunk_project();
    let config = config(&dir).with_entries(["./src/main.ts", "./src/a.ts", "./src/b.ts"]);
    let config = config.with_splitting(SplitPolicy::All);

    let first = build(&config).unwrap();
    let first_files = snapshot(&dir.path().join("build"));
    let second = build(&config).unwrap();
    let second_files = snapshot(&dir.path().join("build"));

    assert_eq!(first.hash, second.hash);
    assert_eq!(first_files, second_files);
}

#[test]
fn test_output_does_not_depend_on_worker_count() {
    let dir = four_chunk_project();
    let mut config = config(&dir).with_entries(["./src/main.ts", "./src/a.ts", "./src/b.ts"]);
    config.splitting = SplitPolicy::All;

    config.workers = Some(1);
    let serial = build(&config).unwrap();
    config.workers = Some(8);
    let parallel = build(&config).unwrap();

    assert_eq!(serial.hash, parallel.hash);
    let files = |r: &BuildReport| r.chunks.iter().map(|c| c.file.clone()).collect::<Vec<_>>();
    assert_eq!(files(&serial), files(&parallel));
}

#[test]
fn test_three_entries_give_four_chunks() {
    let dir = four_chunk_project();
    let config = config(&dir)
        .with_entries(["./src/main.ts", "./src/a.ts", "./src/b.ts"])
        .with_splitting(SplitPolicy::All);
    let report = build(&config).unwrap();

    assert_eq!(report.modules, 4);
    assert_eq!(report.chunks.len(), 4);
    let shared: Vec<_> = report
        .chunks
        .iter()
        .filter(|c| c.kind == ChunkKind::Shared)
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].name, "a~b");
    assert_eq!(shared[0].modules, 1);
}

#[test]
fn test_shared_module_is_hoisted_once() {
    let dir = project(&[
        ("src/one.ts", "import { util } from './util';\nutil(1);"),
        ("src/two.ts", "import { util } from './util';\nutil(2);"),
        ("src/util.ts", "export function util(n) { return n; }"),
    ]);
    let config = config(&dir)
        .with_entries(["./src/one.ts", "./src/two.ts"])
        .with_splitting(SplitPolicy::All);
    let report = build(&config).unwrap();

    let out = dir.path().join("build");
    let mut holders = 0;
    for chunk in &report.chunks {
        let script = fs::read_to_string(out.join(&chunk.file)).unwrap();
        if script.contains("\"src/util.ts\"] = function") {
            holders += 1;
        }
    }
    assert_eq!(holders, 1);
}

#[test]
fn test_dynamic_import_becomes_async_chunk() {
    let dir = project(&[
        ("src/index.ts", "import('./page').then(p => p.render());"),
        ("src/page.ts", "export function render() {}"),
    ]);
    let config = config(&dir);
    let report = build(&config).unwrap();

    let kinds: Vec<_> = report.chunks.iter().map(|c| (c.name.as_str(), c.kind)).collect();
    assert_eq!(kinds, vec![("index", ChunkKind::Entry), ("page", ChunkKind::Async)]);
    assert!(report.chunks[1].file.ends_with(".chunk.js"));
}

#[test]
fn test_failed_build_keeps_previous_output() {
    let dir = project(&[("src/index.ts", "console.log(1);")]);
    let config = config(&dir);
    build(&config).unwrap();
    let before = snapshot(&dir.path().join("build"));

    fs::write(dir.path().join("src/index.ts"), "import './broken.json';").unwrap();
    fs::write(dir.path().join("src/broken.json"), "{ nope").unwrap();
    let err = build(&config).unwrap_err();
    assert_eq!(err.code(), "BUILD_MODULE_TRANSFORM");

    assert_eq!(snapshot(&dir.path().join("build")), before);
}

#[test]
fn test_cancelled_build_keeps_previous_output() {
    let dir = project(&[("src/index.ts", "console.log(1);")]);
    let config = config(&dir);
    build(&config).unwrap();
    let before = snapshot(&dir.path().join("build"));

    fs::write(dir.path().join("src/index.ts"), "console.log(2);").unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let err = Build::new(&config).with_cancel(token).run().unwrap_err();
    assert!(matches!(err, BuildError::Cancelled));

    assert_eq!(snapshot(&dir.path().join("build")), before);
}

#[test]
fn test_cycle_reported_as_path() {
    let dir = project(&[
        ("src/a.ts", "import './b';\nexport const a = 1;"),
        ("src/b.ts", "import './a';\nexport const b = 2;"),
    ]);
    let config = config(&dir).with_entries(["./src/a.ts"]);
    let report = build(&config).unwrap();

    assert_eq!(report.cycles.len(), 1);
    let a = config.root.join("src").join("a.ts");
    let b = config.root.join("src").join("b.ts");
    assert_eq!(
        report.cycles[0],
        format!("[{}, {}, {}]", a.display(), b.display(), a.display())
    );
}

#[test]
fn test_cycle_policy_error_fails_build() {
    let dir = project(&[
        ("src/a.ts", "import './b';"),
        ("src/b.ts", "import './a';"),
    ]);
    let mut config = config(&dir).with_entries(["./src/a.ts"]);
    config.cycles = CyclePolicy::Error;
    let err = build(&config).unwrap_err();
    assert_eq!(err.code(), "BUILD_CYCLIC_DEPENDENCY");
    assert!(!dir.path().join("build").exists());
}

#[test]
fn test_assets_are_emitted_with_hashed_names() {
    let dir = project(&[
        ("src/index.ts", "import logo from './logo.svg';\ndocument.title = logo;"),
        ("src/logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
    ]);
    let config = config(&dir);
    let report = build(&config).unwrap();

    let asset = report
        .files
        .iter()
        .find(|f| f.path.starts_with("assets/logo."))
        .expect("asset emitted");
    assert!(asset.path.ends_with(".svg"));

    let script = fs::read_to_string(dir.path().join("build").join(&report.chunks[0].file)).unwrap();
    assert!(script.contains(&format!("\"/{}\"", asset.path)));
}

#[test]
fn test_named_entries_each_get_html_script() {
    let dir = project(&[
        ("src/app.ts", "console.log('app');"),
        ("src/admin.ts", "console.log('admin');"),
    ]);
    let mut config = config(&dir).with_mode(Mode::Production);
    config.entries = Entries::Named(BTreeMap::from([
        ("app".to_string(), "./src/app.ts".to_string()),
        ("admin".to_string(), "./src/admin.ts".to_string()),
    ]));
    let report = build(&config).unwrap();

    let html = fs::read_to_string(dir.path().join("build/index.html")).unwrap();
    for chunk in &report.chunks {
        assert!(html.contains(&format!("src=\"/{}\"", chunk.file)));
    }
    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join("build/manifest.json")).unwrap()).unwrap();
    assert!(manifest["entries"]["app"].is_array());
    assert!(manifest["entries"]["admin"].is_array());
}

#[test]
fn test_emitted_chunks_run() {
    let dir = project(&[
        (
            "src/index.js",
            "const a = require('./a');\n\
             import b, { named } from './b';\n\
             import * as ns from './b';\n\
             import './style.css';\n\
             console.log('a', a.value, 'b', b, named, ns.named);\n\
             import('./page').then((page) => console.log('page', page.default));\n",
        ),
        ("src/a.js", "module.exports = { value: 1 };\n"),
        ("src/b.js", "export default 'B';\nexport const named = 'N';\n"),
        ("src/page.js", "export default 'P';\n"),
        ("src/style.css", "body { margin: 0 }\n"),
    ]);
    let config = config(&dir).with_entries(["./src/index.js"]);
    let report = build(&config).unwrap();

    let kinds: Vec<_> = report.chunks.iter().map(|c| (c.name.as_str(), c.kind)).collect();
    assert_eq!(kinds, vec![("index", ChunkKind::Entry), ("page", ChunkKind::Async)]);

    let index = fs::read_to_string(dir.path().join("build").join(&report.chunks[0].file)).unwrap();
    assert!(index.contains(&format!("{{\"src/page.js\":[\"/{}\"]}}", report.chunks[1].file)));
    assert!(!index.contains("import b"));

    let files = entry_files(&manifest(&dir), "index");
    if let Some(stdout) = run_in_node(&dir, &files) {
        assert_eq!(stdout, "a 1 b B N N\npage P\n");
    }
}

#[test]
fn test_stylesheet_rule_output_goes_to_css_file() {
    let dir = project(&[
        ("src/index.js", "import './app.css';\nconsole.log('ready');\n"),
        ("src/app.css", "body { margin: 0 }\n"),
    ]);
    let mut config = config(&dir).with_entries(["./src/index.js"]);
    config.rules = vec![
        RuleConfig::new(r"\.js$", ["script"]),
        RuleConfig::new(r"\.css$", ["css"]),
    ];
    let report = build(&config).unwrap();

    let out = dir.path().join("build");
    let chunk = &report.chunks[0];
    let script = fs::read_to_string(out.join(&chunk.file)).unwrap();
    assert!(!script.contains("margin"));
    let css = fs::read_to_string(out.join(chunk.css.as_deref().unwrap())).unwrap();
    assert!(css.contains("body { margin: 0 }"));

    if let Some(stdout) = run_in_node(&dir, &entry_files(&manifest(&dir), "index")) {
        assert_eq!(stdout, "ready\n");
    }
}

#[test]
fn test_production_merges_small_chunks() {
    let dir = project(&[
        (
            "src/one.js",
            "import { util } from './util';\nconsole.log(util('one'));\nimport('./page');\n",
        ),
        ("src/two.js", "import { util } from './util';\nconsole.log(util('two'));\n"),
        ("src/util.js", "export function util(name) { return 'hello ' + name; }\n"),
        ("src/page.js", "console.log('page');\n"),
    ]);
    let mut config = config(&dir)
        .with_mode(Mode::Production)
        .with_entries(["./src/one.js", "./src/two.js"])
        .with_splitting(SplitPolicy::All);
    config.min_chunk_size = 10_000;
    let report = build(&config).unwrap();

    // page folds into its only importer; util is shared by two entries and stays
    let chunks: Vec<_> = report
        .chunks
        .iter()
        .map(|c| (c.name.as_str(), c.kind, c.modules))
        .collect();
    assert_eq!(
        chunks,
        vec![
            ("one", ChunkKind::Entry, 2),
            ("two", ChunkKind::Entry, 1),
            ("one~two", ChunkKind::Shared, 1),
        ]
    );
    let [one, two, shared] = [&report.chunks[0], &report.chunks[1], &report.chunks[2]];

    let out = dir.path().join("build");
    let html = fs::read_to_string(out.join("index.html")).unwrap();
    let position = |file: &str| html.find(&format!("src=\"/{file}\"")).unwrap();
    assert!(position(&shared.file) < position(&one.file));
    assert!(position(&one.file) < position(&two.file));

    let manifest = manifest(&dir);
    assert_eq!(entry_files(&manifest, "one"), vec![shared.file.clone(), one.file.clone()]);
    assert_eq!(entry_files(&manifest, "two"), vec![shared.file.clone(), two.file.clone()]);

    let one_script = fs::read_to_string(out.join(&one.file)).unwrap();
    assert!(one_script.contains("\"src/page.js\"] = function"));
    assert!(!one_script.starts_with("Object.assign"));
    let two_script = fs::read_to_string(out.join(&two.file)).unwrap();
    assert!(!two_script.contains("src/one.js"));

    if let Some(stdout) = run_in_node(&dir, &entry_files(&manifest, "two")) {
        assert_eq!(stdout, "hello two\n");
    }
    if let Some(stdout) = run_in_node(&dir, &entry_files(&manifest, "one")) {
        assert_eq!(stdout, "hello one\npage\n");
    }
}
