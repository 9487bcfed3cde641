use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("quarry-mcp").expect("binary");
    cmd.env("QUARRY_DATA_DIR", data_dir);
    cmd.env_remove("QUARRY_EMBED_ENDPOINT");
    cmd
}

#[test]
fn add_list_and_status_round_trip() {
    let base = TempDir::new().expect("tempdir");
    let data = base.path().join("data");
    let tree = base.path().join("tree");
    std::fs::create_dir_all(&tree).expect("tree");
    std::fs::write(tree.join("main.py"), "def main():\n    pass\n").expect("write");

    cli(&data)
        .args(["add", tree.to_str().expect("utf8"), "--name", "demo", "--no-vectors"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added project demo"));

    cli(&data)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("[active]"));

    cli(&data)
        .args(["index", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added=1"));

    cli(&data)
        .args(["search", "main", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("main.py:1..2"));

    cli(&data)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"files_indexed\": 1"));
}

#[test]
fn remove_purges_the_project() {
    let base = TempDir::new().expect("tempdir");
    let data = base.path().join("data");
    let tree = base.path().join("tree");
    std::fs::create_dir_all(&tree).expect("tree");
    std::fs::write(tree.join("a.py"), "def a():\n    pass\n").expect("write");

    cli(&data)
        .args(["add", tree.to_str().expect("utf8"), "--name", "doomed", "--no-vectors"])
        .assert()
        .success();
    cli(&data).args(["index", "doomed"]).assert().success();

    cli(&data)
        .args(["remove", "doomed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed project doomed"));

    cli(&data)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("doomed").not());

    cli(&data)
        .args(["search", "a", "doomed"])
        .assert()
        .failure();
}

#[test]
fn unknown_selector_fails_cleanly() {
    let base = TempDir::new().expect("tempdir");
    let data = base.path().join("data");

    cli(&data)
        .args(["index", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
