use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn raysuch(config_dir: &std::path::Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_raysuch"));
    command.env("RAYSUCH_CONFIG_DIR", config_dir).env("RUST_LOG", "warn");
    command
}

#[test]
fn config_where_prints_the_override_directory() {
    let root = TempDir::new().unwrap();
    let output = raysuch(root.path())
        .args(["config", "where"])
        .output()
        .expect("failed to run raysuch config where");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim(), root.path().display().to_string());
}

#[test]
fn config_check_prints_defaults_without_a_file() {
    let root = TempDir::new().unwrap();
    let output = raysuch(root.path())
        .args(["config", "check"])
        .output()
        .expect("failed to run raysuch config check");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("title = \"Rays And Such\""), "{stdout}");
    assert!(stdout.contains("tile = \"16x16\""), "{stdout}");
    assert!(stdout.contains("look_toggle = \"edge\""), "{stdout}");
}

#[test]
fn config_check_reads_the_discovered_file() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("raysuch.toml"),
        "[render]\ntile = [8, 8]\n\n[camera]\nspeed = 2.5\n",
    )
    .unwrap();

    let output = raysuch(root.path())
        .args(["config", "check"])
        .output()
        .expect("failed to run raysuch config check");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("tile = \"8x8\""), "{stdout}");
    assert!(stdout.contains("speed = 2.5"), "{stdout}");
}

#[test]
fn config_check_rejects_invalid_settings() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("broken.toml");
    fs::write(&file, "[camera]\nnear = 10.0\nfar = 1.0\n").unwrap();

    let status = raysuch(root.path())
        .args(["config", "check", "--config"])
        .arg(&file)
        .status()
        .expect("failed to run raysuch config check");

    assert!(!status.success());
}

#[test]
fn config_check_rejects_unknown_keys() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("typo.toml");
    fs::write(&file, "[input]\nforwards = \"KeyW\"\n").unwrap();

    let status = raysuch(root.path())
        .args(["config", "check", "--config"])
        .arg(&file)
        .status()
        .expect("failed to run raysuch config check");

    assert!(!status.success());
}
