// Integration tests for CLI commands
// These tests run the built binary against a temporary data directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn get_binary_path() -> &'static str {
    env!("CARGO_BIN_EXE_tally")
}

fn run_with_data_dir(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(get_binary_path())
        .args(args)
        .arg("--data-dir")
        .arg(data_dir)
        .output()
        .expect("Failed to execute command")
}

fn write_config(dir: &TempDir, data_dir: &Path, moderator: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[ledger]\ndata_dir = \"{}\"\n\n[bot]\nmoderator_id = \"{}\"\npoll_interval = \"20ms\"\n",
            data_dir.display(),
            moderator
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    let output = Command::new(get_binary_path())
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Operator CLI for the Tally"));
    for cmd in ["run", "stats", "add-claims", "verify", "version"] {
        assert!(stdout.contains(cmd), "help is missing {}", cmd);
    }
}

#[test]
fn test_cli_version() {
    let output = Command::new(get_binary_path())
        .arg("version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("tally {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_add_claims_then_stats() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("ledger");
    let keys_file = temp_dir.path().join("keys.txt");
    std::fs::write(&keys_file, "ID 6274638384\nnoise\n1234567890\n").unwrap();

    let output = run_with_data_dir(
        &data_dir,
        &[
            "add-claims",
            "REF123456",
            "--reward",
            "2.50",
            "--file",
            keys_file.to_str().unwrap(),
        ],
    );
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 added, 0 updated"));

    let output = run_with_data_dir(&data_dir, &["stats"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Open claims:         3 (₹7.50)"));
}

#[test]
fn test_add_claims_rejects_bad_reward() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("ledger");

    let output = run_with_data_dir(&data_dir, &["add-claims", "REF123456", "--reward", "1.234"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid reward"));
}

#[test]
fn test_run_requires_moderator() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("ledger");

    // First run writes a default config with no moderator set
    let output = run_with_data_dir(&data_dir, &["run"]);

    assert!(!output.status.success());
    assert!(temp_dir.path().join("config.toml").exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("moderator"));
}

#[test]
fn test_run_serves_console_until_eof() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("ledger");
    let config = write_config(&temp_dir, &data_dir, "900");

    let mut child = Command::new(get_binary_path())
        .arg("run")
        .arg("--config")
        .arg(&config)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn bot");

    {
        let mut stdin = child.stdin.take().unwrap();
        writeln!(stdin, "42 /start").unwrap();
        writeln!(stdin, "42 Balance").unwrap();
    }

    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Bot stopped"));
    assert!(data_dir.join("accounts.json").exists());
}

#[test]
fn test_verify_reports_corrupt_collection() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("ledger");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("withdrawals.json"), b"not json").unwrap();

    let output = run_with_data_dir(&data_dir, &["verify"]);

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("withdrawals: ❌"));
}

#[test]
fn test_invalid_command() {
    let output = Command::new(get_binary_path())
        .arg("invalid-command")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid-command") || stderr.contains("unrecognized"));
}
