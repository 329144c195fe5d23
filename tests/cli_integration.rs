//! CLI integration tests for qrator
//!
//! These tests drive the binary end to end: inspecting projects, extracting
//! subsets into archives, merging into a base project and maintaining the
//! auxiliary store.

use predicates::prelude::*;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const SAMPLE: &str = include_str!("fixtures/sample.qgs");
const BASE: &str = include_str!("fixtures/base.qgs");

/// Get a command instance for the qrator binary, isolated from user config
fn qrator_cmd(dir: &Path) -> assert_cmd::Command {
    let config = dir.join("qrator.toml");
    if !config.exists() {
        fs::write(&config, "user = \"tester\"\n").unwrap();
    }
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("qrator"));
    cmd.arg("--config").arg(config).env_remove("RUST_LOG");
    cmd
}

fn create_store(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE roads_1a2b (ASPK INTEGER PRIMARY KEY, labelx REAL);
         CREATE TABLE rivers_5e6f (ASPK INTEGER PRIMARY KEY, labelx REAL);
         CREATE TABLE rail_3c4d (ASPK INTEGER PRIMARY KEY, labelx REAL);
         CREATE TABLE project_notes (note TEXT);",
    )
    .unwrap();
}

/// Writes `sample.qgz` with a document, an auxiliary store and a font
fn sample_archive(dir: &Path) -> PathBuf {
    let store = dir.join("scratch.qgd");
    create_store(&store);

    let path = dir.join("sample.qgz");
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    zip.start_file("sample.qgs", options).unwrap();
    zip.write_all(SAMPLE.as_bytes()).unwrap();
    zip.start_file("sample.qgd", options).unwrap();
    zip.write_all(&fs::read(&store).unwrap()).unwrap();
    zip.start_file("fonts/Inter.ttf", options).unwrap();
    zip.write_all(b"not really a font").unwrap();
    zip.finish().unwrap();
    fs::remove_file(store).unwrap();
    path
}

fn write_plain(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn member_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

fn member_bytes(path: &Path, member: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut bytes = Vec::new();
    archive.by_name(member).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

fn json_stdout(assert: assert_cmd::assert::Assert) -> serde_json::Value {
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    serde_json::from_str(stdout.trim()).unwrap()
}

// =============================================================================
// Inspect and Validate
// =============================================================================

#[test]
fn test_inspect_lists_tokens() {
    let dir = TempDir::new().unwrap();
    let project = sample_archive(dir.path());

    qrator_cmd(dir.path())
        .arg("inspect")
        .arg(&project)
        .assert()
        .success()
        .stdout(predicate::str::contains("Project: Sample"))
        .stdout(predicate::str::contains("roads_1a2b|highlighted"))
        .stdout(predicate::str::contains("Water|rivers_5e6f|winter"))
        .stdout(predicate::str::contains("roads_rivers_child_field_river_id"));
}

#[test]
fn test_inspect_json() {
    let dir = TempDir::new().unwrap();
    let project = write_plain(dir.path(), "sample.qgs", SAMPLE);

    let value = json_stdout(
        qrator_cmd(dir.path())
            .args(["--format", "json", "inspect"])
            .arg(&project)
            .assert()
            .success(),
    );

    assert_eq!(value["layers"].as_array().unwrap().len(), 3);
    assert_eq!(value["metadata"]["author"], "Alice Martin");
    assert_eq!(value["layouts"][1], "A3 Water");
}

#[test]
fn test_validate_reports_dangling_references() {
    let dir = TempDir::new().unwrap();
    let good = write_plain(dir.path(), "good.qgs", SAMPLE);
    let broken = write_plain(
        dir.path(),
        "broken.qgs",
        &SAMPLE.replace("<layerorder>", "<layerorder>\n    <layer id=\"ghost_layer\"/>"),
    );

    qrator_cmd(dir.path())
        .arg("validate")
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("all layer references resolve"));

    qrator_cmd(dir.path())
        .arg("validate")
        .arg(&broken)
        .assert()
        .failure()
        .stdout(predicate::str::contains("ghost_layer"))
        .stderr(predicate::str::contains("1 integrity issue(s) found"));
}

#[test]
fn test_missing_project_fails() {
    let dir = TempDir::new().unwrap();

    qrator_cmd(dir.path())
        .arg("inspect")
        .arg(dir.path().join("nope.qgz"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project not found"));
}

// =============================================================================
// Extract
// =============================================================================

#[test]
fn test_extract_archive_keeps_passthrough_and_prunes_store() {
    let dir = TempDir::new().unwrap();
    let project = sample_archive(dir.path());
    let output = dir.path().join("out").join("roads.qgz");

    let report = json_stdout(
        qrator_cmd(dir.path())
            .args(["--format", "json", "extract"])
            .arg(&project)
            .args(["--layer", "roads_1a2b", "--output"])
            .arg(&output)
            .assert()
            .success(),
    );

    assert_eq!(report["retained_layers"], serde_json::json!(["roads_1a2b"]));
    assert_eq!(report["passthrough"], serde_json::json!(["fonts/Inter.ttf"]));
    assert_eq!(
        member_names(&output),
        vec!["fonts/Inter.ttf", "project.qgd", "project.qgs"]
    );

    let store = dir.path().join("check.qgd");
    fs::write(&store, member_bytes(&output, "project.qgd")).unwrap();
    let tables = qrator::storage::AuxiliaryStore::open(&store)
        .unwrap()
        .table_names()
        .unwrap();
    assert_eq!(tables, vec!["project_notes", "roads_1a2b"]);

    let written = qrator::LoadedProject::open(&output).unwrap().document;
    assert_eq!(written.metadata().saved_by.as_deref(), Some("tester"));
    assert!(written.themes().is_empty());
    assert!(written.integrity_issues().is_empty());
}

#[test]
fn test_extract_with_selection_file() {
    let dir = TempDir::new().unwrap();
    let project = write_plain(dir.path(), "sample.qgs", SAMPLE);
    let selection = write_plain(
        dir.path(),
        "selection.json",
        r#"{
            "styles": ["roads_1a2b|highlighted"],
            "theme_styles": ["Water|rivers_5e6f|winter"],
            "layouts": ["A3 Water"]
        }"#,
    );
    let output = dir.path().join("subset.qgz");

    qrator_cmd(dir.path())
        .arg("extract")
        .arg(&project)
        .arg("--selection")
        .arg(&selection)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Extracted 2 layer(s)"))
        .stdout(predicate::str::contains("--auto-relations"));

    let written = qrator::LoadedProject::open(&output).unwrap().document;
    let layers = written.layers();
    let roads = layers.iter().find(|l| l.id == "roads_1a2b").unwrap();
    assert_eq!(roads.styles, vec!["highlighted"]);
    assert_eq!(roads.current_style.as_deref(), Some("highlighted"));

    let themes: Vec<String> = written.themes().into_iter().map(|t| t.name).collect();
    assert_eq!(themes, vec!["Water"]);
    assert_eq!(written.layouts(), vec!["A3 Water"]);
    assert!(written.relations().is_empty());
}

#[test]
fn test_extract_auto_relations_and_disconnect() {
    let dir = TempDir::new().unwrap();
    let project = write_plain(dir.path(), "sample.qgs", SAMPLE);
    let output = dir.path().join("subset.qgz");

    qrator_cmd(dir.path())
        .arg("extract")
        .arg(&project)
        .args(["--layer", "roads_1a2b", "--layer", "rivers_5e6f"])
        .args(["--auto-relations", "--disconnect-local", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Disconnected sources: roads_1a2b"));

    let written = qrator::LoadedProject::open(&output).unwrap().document;
    assert_eq!(written.relations().len(), 1);
    let rivers = written
        .layers()
        .into_iter()
        .find(|l| l.id == "rivers_5e6f")
        .unwrap();
    assert!(rivers.data_source.starts_with("host=db"));
}

#[test]
fn test_extract_requires_a_selection() {
    let dir = TempDir::new().unwrap();
    let project = write_plain(dir.path(), "sample.qgs", SAMPLE);
    let output = dir.path().join("subset.qgz");

    qrator_cmd(dir.path())
        .arg("extract")
        .arg(&project)
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing selected"));

    qrator_cmd(dir.path())
        .arg("extract")
        .arg(&project)
        .args(["--layer", "unknown_layer", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("retains nothing"));

    assert!(!output.exists());
}

#[test]
fn test_extract_layouts_only_warns() {
    let dir = TempDir::new().unwrap();
    let project = write_plain(dir.path(), "sample.qgs", SAMPLE);
    let selection = dir.path().join("print.toml");
    fs::write(&selection, "layouts = [\"A4 Overview\"]\n").unwrap();
    let output = dir.path().join("print.qgz");

    qrator_cmd(dir.path())
        .arg("extract")
        .arg(&project)
        .arg("-s")
        .arg(&selection)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stderr(predicate::str::contains("no layer retained"));

    assert!(output.exists());
}

// =============================================================================
// Merge
// =============================================================================

#[test]
fn test_merge_reuses_existing_layers() {
    let dir = TempDir::new().unwrap();
    let base = write_plain(dir.path(), "base.qgs", BASE);
    let incoming = sample_archive(dir.path());
    let output = dir.path().join("merged.qgz");

    let report = json_stdout(
        qrator_cmd(dir.path())
            .args(["-f", "json", "merge"])
            .arg(&base)
            .arg(&incoming)
            .args(["--layer", "roads_1a2b", "--layer", "rail_3c4d", "-o"])
            .arg(&output)
            .assert()
            .success(),
    );

    assert_eq!(report["matched_layers"][0]["base"], "base_roads");
    assert_eq!(report["added_layers"][0]["incoming"], "rail_3c4d");
    assert_eq!(report["added_layers"][0]["id"], "rail_3c4d_1");
    assert_eq!(
        report["styles_added"],
        serde_json::json!(["base_roads|highlighted"])
    );

    let merged = qrator::LoadedProject::open(&output).unwrap().document;
    assert_eq!(merged.layers().len(), 4);
    assert!(merged.integrity_issues().is_empty());
    assert_eq!(member_names(&output), vec!["project.qgs"]);
}

// =============================================================================
// Auxiliary Store
// =============================================================================

#[test]
fn test_aux_tables_and_prune() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("project.qgd");
    create_store(&store);

    qrator_cmd(dir.path())
        .args(["aux", "tables"])
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("rivers_5e6f"))
        .stdout(predicate::str::contains("project_notes"));

    qrator_cmd(dir.path())
        .args(["aux", "prune"])
        .arg(&store)
        .args(["--keep", "rivers_5e6f", "--vacuum"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dropped 2 table(s), kept 1, preserved 1"));

    let value = json_stdout(
        qrator_cmd(dir.path())
            .args(["--format", "json", "aux", "tables"])
            .arg(&store)
            .assert()
            .success(),
    );
    assert_eq!(value.as_array().unwrap().len(), 2);
}

// =============================================================================
// Layouts
// =============================================================================

#[test]
fn test_layouts_list_and_export_without_worker() {
    let dir = TempDir::new().unwrap();
    let project = write_plain(dir.path(), "sample.qgs", SAMPLE);

    qrator_cmd(dir.path())
        .args(["layouts", "list"])
        .arg(&project)
        .assert()
        .success()
        .stdout(predicate::str::contains("A4 Overview"));

    qrator_cmd(dir.path())
        .args(["layouts", "export"])
        .arg(&project)
        .args(["--item", "A4 Overview=/tmp/a4.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No layout worker configured"));
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();

    qrator_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("merge"));
}
