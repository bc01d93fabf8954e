//! CLI integration tests for rowport.
//!
//! These tests verify command-line argument parsing, help output,
//! dry-run imports, file checks and exit codes for error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Get a command for the rowport binary.
fn cmd() -> Command {
    Command::cargo_bin("rowport").unwrap()
}

const SCHEMA: &str = r#"
tables:
  - name: author
    columns:
      - name: id
        data_type: integer
      - name: name
        data_type: text
    primary_key: [id]
  - name: book
    columns:
      - name: id
        data_type: integer
      - name: author_id
        data_type: integer
      - name: title
        data_type: text
    primary_key: [id]
    foreign_keys:
      - columns: [author_id]
        ref_table: author
        ref_columns: [id]
"#;

/// A workspace holding config.yaml, schema.yaml and a data file.
fn workspace(data: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("config.yaml"), "loader:\n  batch_size: 1\n").unwrap();
    fs::write(dir.path().join("schema.yaml"), SCHEMA).unwrap();
    fs::write(dir.path().join("data.xml"), data).unwrap();
    dir
}

fn in_dir(dir: &Path) -> Command {
    let mut c = cmd();
    c.current_dir(dir);
    c
}

const CHILD_FIRST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<data>
  <book id="10" author_id="1" title="Dune"/>
  <book id="11" author_id="1"><title><![CDATA[Children
of Dune]]></title></book>
  <author id="1" name="Frank"/>
</data>
"#;

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_import_subcommand_help() {
    cmd()
        .args(["import", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--continue-on-error"));
}

#[test]
fn test_export_subcommand_help() {
    cmd()
        .args(["export", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table"))
        .stdout(predicate::str::contains("--compact"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rowport"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("[default: schema.yaml]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Import and Check
// =============================================================================

#[test]
fn test_dry_run_import_loads_child_rows_after_parent() {
    let dir = workspace(CHILD_FIRST);
    in_dir(dir.path())
        .args(["import", "data.xml", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run completed!"))
        .stdout(predicate::str::contains("Rows inserted: 3"))
        .stdout(predicate::str::contains("Rows deferred: 2"));
}

#[test]
fn test_dry_run_import_json_output() {
    let dir = workspace(CHILD_FIRST);
    let output = in_dir(dir.path())
        .args(["--output-json", "import", "data.xml", "--dry-run", "--batch-size", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["store"], "memory");
    assert_eq!(result["rows_read"], 3);
    assert_eq!(result["rows_inserted"], 3);
    assert_eq!(result["rows_failed"], 0);
}

#[test]
fn test_missing_parent_exits_with_code_5() {
    let dir = workspace(r#"<data><book id="10" author_id="99"/></data>"#);
    in_dir(dir.path())
        .args(["import", "data.xml", "--dry-run"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("author(id=99)"));
}

#[test]
fn test_check_counts_rows_per_table() {
    let dir = workspace(CHILD_FIRST);
    in_dir(dir.path())
        .args(["check", "data.xml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("data.xml: 3 rows"))
        .stdout(predicate::str::contains("author: 1"))
        .stdout(predicate::str::contains("book: 2"));
}

#[test]
fn test_check_skips_unknown_tables() {
    let dir = workspace(r#"<data><publisher id="1"/><author id="1"/></data>"#);
    in_dir(dir.path())
        .args(["check", "data.xml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped (unknown table): 1"));
}

#[test]
fn test_import_without_target_exits_with_code_1() {
    let dir = workspace(CHILD_FIRST);
    in_dir(dir.path())
        .args(["import", "data.xml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--dry-run"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_malformed_data_exits_with_code_3() {
    let dir = workspace("<data><author id=\"1\"></book></data>");
    in_dir(dir.path())
        .args(["check", "data.xml"])
        .assert()
        .code(3);
}

#[test]
fn test_bad_value_exits_with_code_3() {
    let dir = workspace(r#"<data><author id="one"/></data>"#);
    in_dir(dir.path())
        .args(["import", "data.xml", "--dry-run"])
        .assert()
        .code(3);
}

#[test]
fn test_missing_schema_exits_with_code_7() {
    let dir = workspace(CHILD_FIRST);
    in_dir(dir.path())
        .args(["--schema", "nonexistent_schema.yaml", "check", "data.xml"])
        .assert()
        .code(7);
}

#[test]
fn test_missing_explicit_config_exits_with_code_7() {
    let dir = workspace(CHILD_FIRST);
    in_dir(dir.path())
        .args(["--config", "nonexistent_config.yaml", "check", "data.xml"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let dir = workspace(CHILD_FIRST);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    in_dir(dir.path())
        .args(["--config", file.path().to_str().unwrap(), "check", "data.xml"])
        .assert()
        .code(1);
}

#[test]
fn test_zero_batch_size_exits_with_code_1() {
    let dir = workspace(CHILD_FIRST);
    in_dir(dir.path())
        .args(["import", "data.xml", "--dry-run", "--batch-size", "0"])
        .assert()
        .code(1);
}

#[test]
fn test_inconsistent_schema_exits_with_code_2() {
    let dir = workspace(CHILD_FIRST);
    fs::write(
        dir.path().join("schema.yaml"),
        "tables:\n  - name: book\n    columns: [{name: id}]\n    foreign_keys:\n      - {columns: [id], ref_table: author, ref_columns: [id]}\n",
    )
    .unwrap();
    in_dir(dir.path())
        .args(["check", "data.xml"])
        .assert()
        .code(2);
}

#[test]
fn test_default_config_is_optional() {
    let dir = workspace(CHILD_FIRST);
    fs::remove_file(dir.path().join("config.yaml")).unwrap();
    in_dir(dir.path())
        .args(["check", "data.xml"])
        .assert()
        .success();
}
