use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("board-sync")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("board-sync")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("board-sync").and(predicate::str::contains("--version")));
}

#[test]
fn rejects_unknown_flags() {
    Command::cargo_bin("board-sync")
        .unwrap()
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument: --bogus"));
}

#[test]
fn rejects_page_zero() {
    Command::cargo_bin("board-sync")
        .unwrap()
        .args(["--page", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid page"));
}
