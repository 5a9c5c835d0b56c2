//! Drives the real `bootkeys` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bootkeys(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bootkeys"))
        .args(args)
        // No config/ directory here, so only built-in defaults apply.
        .current_dir(dir)
        .env_remove("SECRET_KEY")
        .env_remove("HASH_KEY")
        .env_remove("BLOCK_KEY")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run bootkeys")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn generate_is_idempotent() {
    let dir = TempDir::new().unwrap();

    let first = bootkeys(dir.path(), &["generate"]);
    assert!(first.status.success());
    assert!(stdout(&first).contains("SECRET_KEY generated and saved"));
    let saved = fs::read_to_string(dir.path().join(".env")).unwrap();

    let second = bootkeys(dir.path(), &["generate"]);
    assert!(second.status.success());
    assert!(stdout(&second).contains("SECRET_KEY already defined (store), not regenerated"));
    assert_eq!(fs::read_to_string(dir.path().join(".env")).unwrap(), saved);
}

#[test]
fn generate_leaves_existing_value_alone() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".env"), "SECRET_KEY=abc\n").unwrap();

    let output = bootkeys(dir.path(), &["generate"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("already defined"));
    assert_eq!(
        fs::read_to_string(dir.path().join(".env")).unwrap(),
        "SECRET_KEY=abc\n"
    );
}

#[test]
fn force_updates_and_quotes() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".env"), "FOO=bar\nSECRET_KEY=abc\n").unwrap();

    let output = bootkeys(dir.path(), &["generate", "--force"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("SECRET_KEY updated"));
    let content = fs::read_to_string(dir.path().join(".env")).unwrap();
    assert!(content.starts_with("FOO=bar\nSECRET_KEY=\""));
    assert!(!content.contains("SECRET_KEY=abc"));
}

#[test]
fn store_flag_selects_file() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("secrets").join("app.env");

    let output = bootkeys(dir.path(), &["keys", "--store", store.to_str().unwrap()]);

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("HASH_KEY generated and saved"));
    assert!(out.contains("BLOCK_KEY generated and saved"));
    let content = fs::read_to_string(&store).unwrap();
    assert!(content.contains("HASH_KEY="));
    assert!(content.contains("BLOCK_KEY="));
    assert!(!dir.path().join(".env").exists());
}

#[test]
fn status_fails_until_everything_is_provisioned() {
    let dir = TempDir::new().unwrap();

    let before = bootkeys(dir.path(), &["status"]);
    assert_eq!(before.status.code(), Some(2));
    assert!(stdout(&before).contains("SECRET_KEY missing"));

    assert!(bootkeys(dir.path(), &["generate"]).status.success());
    assert!(bootkeys(dir.path(), &["keys"]).status.success());

    let after = bootkeys(dir.path(), &["status"]);
    assert!(after.status.success());
    let out = stdout(&after);
    assert!(out.contains("SECRET_KEY present (store, 64 bytes)"));
    assert!(out.contains("BLOCK_KEY present (store, 16 bytes)"));
}

#[test]
fn generate_fails_on_unwritable_store() {
    let dir = TempDir::new().unwrap();
    // A directory where the store file should be cannot be read as a file.
    fs::create_dir(dir.path().join(".env")).unwrap();

    let output = bootkeys(dir.path(), &["generate"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("SECRET_KEY"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[secrets]\nblock_key_bytes = 7\n").unwrap();

    let output = bootkeys(dir.path(), &["--config", config.to_str().unwrap(), "generate"]);

    assert_eq!(output.status.code(), Some(78));
    assert!(!dir.path().join(".env").exists());
}
