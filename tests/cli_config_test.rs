use std::process::Command;
use tempfile::TempDir;

fn vigil(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vigil"));
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_init_command() {
    let temp_dir = TempDir::new().unwrap();

    let output = vigil(temp_dir.path())
        .arg("init")
        .output()
        .expect("Failed to run init command");
    assert!(output.status.success());

    let config_path = temp_dir.path().join(".vigil/settings.toml");
    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("version = 1"));
    assert!(content.contains("[watch]"));
    assert!(content.contains("strategy = \"blocking\""));

    // Refuses to overwrite without --force
    let again = vigil(temp_dir.path()).arg("init").output().unwrap();
    assert!(!again.status.success());

    let forced = vigil(temp_dir.path())
        .args(["init", "--force"])
        .output()
        .unwrap();
    assert!(forced.status.success());
}

#[test]
fn test_config_command_reads_workspace_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join(".vigil");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("settings.toml"),
        "[watch]\nstrategy = \"interval\"\npoll_interval_ms = 120\n",
    )
    .unwrap();

    // Run from a subdirectory; the settings file is found upwards.
    let nested = temp_dir.path().join("deep/er");
    std::fs::create_dir_all(&nested).unwrap();

    let output = vigil(&nested).arg("config").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("strategy = \"interval\""));
    assert!(stdout.contains("poll_interval_ms = 120"));
}

#[test]
fn test_config_flag_and_env_override() {
    let temp_dir = TempDir::new().unwrap();
    let custom = temp_dir.path().join("custom.toml");
    std::fs::write(&custom, "[watch]\nmax_events = 32\n").unwrap();

    let output = vigil(temp_dir.path())
        .args(["--config", custom.to_str().unwrap(), "config"])
        .env("VIGIL_WATCH__INCLUDE_ATTRIBUTES", "true")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("max_events = 32"));
    assert!(stdout.contains("include_attributes = true"));
}

#[test]
fn test_watch_fails_when_nothing_can_be_watched() {
    let temp_dir = TempDir::new().unwrap();

    let output = vigil(temp_dir.path())
        .args(["watch", "missing-a.txt", "missing-b.txt"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_watch_rejects_missing_default_root() {
    let temp_dir = TempDir::new().unwrap();

    // No ./test directory under the working directory.
    let output = vigil(temp_dir.path()).arg("watch").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("test"));
}
