//! Integration tests for `weft build --json` and `weft graph --json`.
//!
//! These tests verify:
//! - JSON output is always valid JSON with an `ok` field
//! - Failures carry a SCREAMING_SNAKE_CASE error code and exit non-zero
//! - A successful build writes the reported files

use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "weft-cli", "--bin", "weft", "--"]);
    cmd
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn run_json(args: &[&str], cwd: &Path) -> (bool, serde_json::Value) {
    let output = cargo_bin()
        .args(args)
        .args(["--json", "--cwd"])
        .arg(cwd)
        .env_remove("NODE_ENV")
        .output()
        .expect("Failed to run weft");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("Output should be valid JSON");
    (output.status.success(), json)
}

#[test]
fn test_build_json_success() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/index.ts", "import './a';\nconsole.log('hi');");
    write(dir.path(), "src/a.ts", "export const a = 1;");

    let (success, json) = run_json(&["build", "--mode", "production"], dir.path());

    assert!(success);
    assert_eq!(json["ok"], true);
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["mode"], "production");
    assert_eq!(json["modules"], 2);

    let files = json["files"].as_array().expect("files should be an array");
    assert!(!files.is_empty());
    for file in files {
        let path = file["path"].as_str().unwrap();
        assert!(dir.path().join("build").join(path).is_file(), "{path} missing");
    }
}

#[test]
fn test_build_json_unresolved_import() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/index.ts", "import './missing';");

    let (success, json) = run_json(&["build"], dir.path());

    assert!(!success);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "BUILD_UNRESOLVED_IMPORT");
    let code = json["error"]["code"].as_str().unwrap();
    assert!(code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c == '_'));
    assert!(!dir.path().join("build").exists());
}

#[test]
fn test_build_json_invalid_config() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/index.ts", "");
    write(
        dir.path(),
        "weft.config.json",
        r#"{ "rules": [{ "test": "\\.ts$", "use": ["no-such-transformer"] }] }"#,
    );

    let (success, json) = run_json(&["build"], dir.path());

    assert!(!success);
    assert_eq!(json["error"]["code"], "BUILD_CONFIG");
}

#[test]
fn test_entry_and_splitting_flags() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.ts", "import './a';\nimport './b';");
    write(dir.path(), "src/a.ts", "import './shared';");
    write(dir.path(), "src/b.ts", "import './shared';");
    write(dir.path(), "src/shared.ts", "export const s = 1;");

    let (success, json) = run_json(
        &[
            "build",
            "--splitting",
            "all",
            "--entry",
            "./src/main.ts",
            "--entry",
            "./src/a.ts",
            "--entry",
            "./src/b.ts",
        ],
        dir.path(),
    );

    assert!(success);
    let names: Vec<&str> = json["chunks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 4);
    assert!(names.contains(&"a~b"));
}

#[test]
fn test_graph_json_lists_modules_and_cycles() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/index.ts", "import './a';\nimport('./lazy');");
    write(dir.path(), "src/a.ts", "import './index';");
    write(dir.path(), "src/lazy.ts", "export default 1;");

    let (success, json) = run_json(&["graph"], dir.path());

    assert!(success);
    assert_eq!(json["ok"], true);
    assert_eq!(json["entries"][0]["module"], "src/index.ts");
    assert_eq!(json["modules"].as_array().unwrap().len(), 3);
    assert_eq!(json["modules"][0]["dynamic_dependencies"][0], "src/lazy.ts");
    assert_eq!(
        json["cycles"][0],
        serde_json::json!(["src/index.ts", "src/a.ts", "src/index.ts"])
    );
    assert!(!dir.path().join("build").exists());
}
