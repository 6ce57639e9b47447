#![allow(missing_docs)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    db: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join(format!("{name}.tree"));
        Self { dir, db }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("absent-config.toml")
    }

    fn run(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        cargo_bin_cmd!("treestore")
            .arg("--config")
            .arg(self.config())
            .args(args)
            .arg(&self.db)
            .assert()
    }

    fn run_path(&self, args: &[&str], path: &str) -> assert_cmd::assert::Assert {
        cargo_bin_cmd!("treestore")
            .arg("--config")
            .arg(self.config())
            .args(args)
            .arg(&self.db)
            .arg(path)
            .assert()
    }
}

fn stdout_json(assert: assert_cmd::assert::Assert) -> Value {
    let output = assert.success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn init_creates_store_file() {
    let fx = Fixture::new("init");
    let json = stdout_json(fx.run(&["--format", "json", "--page-size", "1024", "init"]));
    assert!(fx.db.exists());
    assert_eq!(json["page_size"], 1024);
    assert_eq!(json["root_page"], 1);
}

#[test]
fn insert_then_get_round_trips() {
    let fx = Fixture::new("roundtrip");
    fx.run(&["init"]).success();
    fx.run_path(&["insert", "--row-id", "42"], "usr/lib/libc.so")
        .success();

    let json = stdout_json(fx.run_path(&["--format", "json", "get"], "usr/lib/libc.so"));
    assert_eq!(json["path"], "usr/lib/libc.so");
    assert_eq!(json["row_id"], 42);
    assert!(json.get("timestamp").is_none());

    let intermediate = stdout_json(fx.run_path(&["--format", "json", "get"], "/usr/lib/"));
    assert_eq!(intermediate["row_id"], 0);
}

#[test]
fn negative_row_ids_are_accepted() {
    let fx = Fixture::new("negative");
    fx.run(&["init"]).success();
    fx.run_path(&["insert", "--row-id", "-7"], "a").success();
    let json = stdout_json(fx.run_path(&["--format", "json", "get"], "a"));
    assert_eq!(json["row_id"], -7);
}

#[test]
fn get_missing_path_fails() {
    let fx = Fixture::new("missing");
    fx.run(&["init"]).success();
    let output = fx
        .run_path(&["get"], "nope")
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("path not found"));
}

#[test]
fn commands_require_an_initialized_store() {
    let fx = Fixture::new("uninit");
    fx.run(&["list"]).failure();
    assert!(!fx.db.exists());
}

#[test]
fn delete_removes_subtree() {
    let fx = Fixture::new("delete");
    fx.run(&["init"]).success();
    for (path, row) in [("a/b", "1"), ("a/c", "2"), ("x", "3")] {
        fx.run_path(&["insert", "--row-id", row], path).success();
    }
    fx.run_path(&["delete"], "a").success();
    fx.run_path(&["get"], "a/b").failure();

    let json = stdout_json(fx.run(&["--format", "json", "list"]));
    let leaves = json.as_array().expect("array");
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0]["path"], "x");
    assert_eq!(leaves[0]["row_id"], 3);
}

#[test]
fn list_prints_leaves_in_order() {
    let fx = Fixture::new("list");
    fx.run(&["init"]).success();
    fx.run_path(&["insert", "--row-id", "2"], "b/y").success();
    fx.run_path(&["insert", "--row-id", "1"], "a").success();
    let output = fx.run(&["list"]).success().get_output().stdout.clone();
    assert_eq!(String::from_utf8_lossy(&output), "a\t1\nb/y\t2\n");
}

#[test]
fn timestamps_flag_stores_timestamps() {
    let fx = Fixture::new("timestamps");
    fx.run(&["--timestamps", "init"]).success();
    fx.run_path(
        &["--timestamps", "insert", "--row-id", "5", "--timestamp", "1700000000"],
        "logs/today",
    )
    .success();
    let json = stdout_json(fx.run_path(&["--timestamps", "--format", "json", "get"], "logs/today"));
    assert_eq!(json["timestamp"], 1_700_000_000i64);
}

#[test]
fn mismatched_timestamps_flag_is_refused() {
    let fx = Fixture::new("stamped");
    fx.run(&["--timestamps", "init"]).success();
    fx.run_path(&["--timestamps", "insert"], "a").success();
    let output = fx
        .run_path(&["get"], "a")
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("created with timestamps"));
}

#[test]
fn timestamp_without_timestamps_fails() {
    let fx = Fixture::new("no-timestamps");
    fx.run(&["init"]).success();
    fx.run_path(&["insert", "--timestamp", "5"], "a").failure();
}

#[test]
fn stats_emits_json() {
    let fx = Fixture::new("stats");
    fx.run(&["--page-size", "512", "init"]).success();
    for i in 0..60 {
        let path = format!("dir{}/file{i:02}", i % 3);
        fx.run_path(&["insert"], &path).success();
    }
    let json = stdout_json(fx.run(&["--format", "json", "stats"]));
    assert_eq!(json["tree"]["leaves"], 60);
    assert_eq!(json["tree"]["items"], 63);
    assert!(json["tree"]["pages"].as_u64().unwrap() > 1);
    assert_eq!(json["pager"]["page_size"], 512);
}

#[test]
fn check_and_dump_succeed() {
    let fx = Fixture::new("check");
    fx.run(&["init"]).success();
    fx.run_path(&["insert", "--row-id", "9"], "etc/hosts").success();
    let json = stdout_json(fx.run(&["--format", "json", "check"]));
    assert_eq!(json["pages_checked"], 1);

    let output = fx.run(&["dump"]).success().get_output().stdout.clone();
    let dump = String::from_utf8_lossy(&output);
    assert!(dump.starts_with("TreeStore root=1"));
    assert!(dump.contains("\"hosts\" 9"));
}

#[test]
fn config_file_supplies_page_size() {
    let fx = Fixture::new("configured");
    let config = fx.dir.path().join("config.toml");
    std::fs::write(&config, "[store]\npage_size = 2048\nfsync = false\n").unwrap();
    let output = cargo_bin_cmd!("treestore")
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "init"])
        .arg(&fx.db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["page_size"], 2048);
}

#[test]
fn empty_path_is_rejected() {
    let fx = Fixture::new("empty-path");
    fx.run(&["init"]).success();
    fx.run_path(&["insert"], "///").failure();
}
