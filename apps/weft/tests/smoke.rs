use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn help_exits_successfully() {
  let mut cmd = Command::cargo_bin("weft").expect("compile bin");
  let assert = cmd.arg("--help").assert();
  assert.success();
}

#[test]
fn unknown_subcommand_fails() {
  let mut cmd = Command::cargo_bin("weft").expect("compile bin");
  cmd.arg("frobnicate").assert().failure();
}

#[test]
fn submit_rejects_invalid_json_before_contacting_daemon() {
  let td = tempfile::tempdir().unwrap();
  let pkg = td.path().join("pkg.json");
  std::fs::write(&pkg, "{ not json").unwrap();
  let mut cmd = Command::cargo_bin("weft").expect("compile bin");
  cmd
    .current_dir(td.path())
    .env("WEFT_SOCKET", td.path().join("weft.sock"))
    .args(["run", "submit"])
    .arg(&pkg)
    .assert()
    .code(2);
}
