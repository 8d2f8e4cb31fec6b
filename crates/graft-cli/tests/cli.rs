use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const SCHEMA: &str = r#"
[[entity]]
label = "Person"

[[entity.fields]]
name = "name"
scalar = "string"

[[entity.fields]]
name = "employer"
relationship = { type = "WORKS_AT", target = "Organization", cardinality = "single" }

[[entity]]
label = "Organization"

[[entity.fields]]
name = "name"
scalar = "string"

[[entity.fields]]
name = "staff"
relationship = { type = "WORKS_AT", target = "Person", direction = "incoming" }
"#;

const PEOPLE: &str = r#"{
    "root": "alice",
    "nodes": [
        {"ref": "alice", "label": "Person", "token": "alice", "properties": {"name": "Alice"},
         "relations": {"employer": ["acme"]}},
        {"ref": "acme", "label": "Organization", "token": "acme", "properties": {"name": "Acme"}}
    ]
}"#;

fn workspace() -> TempDir {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("schema.toml"), SCHEMA).unwrap();
    std::fs::write(dir.path().join("people.json"), PEOPLE).unwrap();
    dir
}

fn graft(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("graft").unwrap();
    cmd.env("GRAFT_CONFIG", dir.join("graft.toml"))
        .env("GRAFT_DATA_DIR", dir.join("data"))
        .env("GRAFT_SCHEMA", dir.join("schema.toml"))
        .env_remove("RUST_LOG");
    cmd
}

fn stats_json(dir: &Path) -> serde_json::Value {
    let output = graft(dir)
        .args(["--format", "json", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_schema_check() {
    let dir = workspace();
    graft(dir.path())
        .args(["schema", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema OK: 2 entities"));
}

#[test]
fn test_schema_show_lists_mirrors() {
    let dir = workspace();
    graft(dir.path())
        .args(["schema", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mirror Organization.staff"))
        .stdout(predicate::str::contains("mirror Person.employer"));
}

#[test]
fn test_schema_check_rejects_invalid_file() {
    let dir = workspace();
    let bad = dir.path().join("bad.toml");
    std::fs::write(
        &bad,
        "[[entity]]\nlabel = \"Person\"\n\n[[entity.fields]]\nname = \"pet\"\nrelationship = { type = \"OWNS\", target = \"Dog\" }\n",
    )
    .unwrap();

    graft(dir.path())
        .args(["schema", "check"])
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dog"));
}

#[test]
fn test_import_then_stats() {
    let dir = workspace();
    graft(dir.path())
        .arg("import")
        .arg(dir.path().join("people.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 nodes"));

    let stats = stats_json(dir.path());
    assert_eq!(stats["nodes"], 2);
    assert_eq!(stats["relationships"], 1);
}

#[test]
fn test_reimport_upserts_by_token() {
    let dir = workspace();
    for _ in 0..2 {
        graft(dir.path())
            .arg("import")
            .arg(dir.path().join("people.json"))
            .assert()
            .success();
    }

    let stats = stats_json(dir.path());
    assert_eq!(stats["nodes"], 2);
    assert_eq!(stats["relationships"], 1);
}

#[test]
fn test_import_depth_zero_defers_links() {
    let dir = workspace();
    graft(dir.path())
        .args(["--format", "json", "import", "--depth", "0"])
        .arg(dir.path().join("people.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"deferred_links\": 1"));

    let stats = stats_json(dir.path());
    assert_eq!(stats["nodes"], 1);
    assert_eq!(stats["relationships"], 0);
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = workspace();
    graft(dir.path())
        .args(["import", "--dry-run"])
        .arg(dir.path().join("people.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("upsert Person"))
        .stdout(predicate::str::contains("WORKS_AT"));

    assert_eq!(stats_json(dir.path())["nodes"], 0);
}

#[test]
fn test_import_with_unregistered_label_fails_cleanly() {
    let dir = workspace();
    let doc = dir.path().join("bad.json");
    std::fs::write(
        &doc,
        r#"{"nodes": [{"ref": "x", "label": "Spaceship"}]}"#,
    )
    .unwrap();

    graft(dir.path())
        .arg("import")
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Spaceship"));

    assert_eq!(stats_json(dir.path())["nodes"], 0);
}

#[test]
fn test_inspect_shows_fields_and_load_map() {
    let dir = workspace();
    graft(dir.path())
        .arg("import")
        .arg(dir.path().join("people.json"))
        .assert()
        .success();

    let output = graft(dir.path())
        .args(["--format", "json", "inspect", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(view["label"], "Person");
    assert_eq!(view["properties"]["name"], "Alice");
    assert_eq!(view["relations"]["employer"][0]["label"], "Organization");
    assert_eq!(view["load_map"]["employer"]["cardinality"], "single");
    assert_eq!(view["load_map"]["employer"]["ids"][0], 2);
}

#[test]
fn test_inspect_missing_node() {
    let dir = workspace();
    graft(dir.path())
        .args(["inspect", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Node 42 not found"));
}

#[test]
fn test_export_to_file() {
    let dir = workspace();
    graft(dir.path())
        .arg("import")
        .arg(dir.path().join("people.json"))
        .assert()
        .success();

    let out = dir.path().join("dump.json");
    graft(dir.path())
        .args(["export", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 nodes and 1 relationships"));

    let dump: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(dump["edges"][0]["type"], "WORKS_AT");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn test_purge_requires_force() {
    let dir = workspace();
    graft(dir.path())
        .arg("import")
        .arg(dir.path().join("people.json"))
        .assert()
        .success();

    graft(dir.path())
        .arg("purge")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert_eq!(stats_json(dir.path())["nodes"], 2);

    graft(dir.path())
        .args(["purge", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Purged 2 nodes and 1 relationships"));
    assert_eq!(stats_json(dir.path())["nodes"], 0);
}

#[test]
fn test_config_set_and_get() {
    let dir = workspace();
    graft(dir.path())
        .args(["config", "set", "default_depth", "3"])
        .assert()
        .success();
    graft(dir.path())
        .args(["config", "get", "default_depth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));

    graft(dir.path())
        .args(["config", "set", "default_depth", "-1"])
        .assert()
        .failure();
    graft(dir.path())
        .args(["config", "get", "colour"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key"));
}

#[test]
fn test_configured_output_format_applies() {
    let dir = workspace();
    graft(dir.path())
        .args(["config", "set", "output", "json"])
        .assert()
        .success();

    graft(dir.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"relationships\": 0"));
}

#[test]
fn test_completions() {
    let dir = workspace();
    graft(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graft"));
}
