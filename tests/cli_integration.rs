//! Integration tests for the gotonav command line
//!
//! Every test runs the binary against its own temporary data directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Run gotonav with GOTONAV_HOME set and return (success, stdout, stderr)
fn run_gotonav(home: &Path, args: &[&str]) -> (bool, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_gotonav"))
        .args(args)
        .env("GOTONAV_HOME", home)
        .output()
        .expect("Failed to execute gotonav");

    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

fn initialized_home() -> TempDir {
    let temp = TempDir::new().unwrap();
    let (success, _, stderr) = run_gotonav(temp.path(), &["init"]);
    assert!(success, "init failed: {}", stderr);
    temp
}

fn record(home: &Path, user: &str, page: &str, previous: Option<&str>) {
    let mut args = vec!["record", "--user", user, "--page", page];
    if let Some(previous) = previous {
        args.extend(["--previous", previous]);
    }
    let (success, stdout, stderr) = run_gotonav(home, &args);
    assert!(success, "record failed: {}", stderr);
    assert!(stdout.contains("Recorded"));
}

#[test]
fn test_gotonav_version() {
    let temp = TempDir::new().unwrap();
    let (success, stdout, _) = run_gotonav(temp.path(), &["--version"]);
    assert!(success, "gotonav --version should succeed");
    assert!(stdout.contains("gotonav"));
}

#[test]
fn test_status_before_and_after_init() {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("data");

    let (success, stdout, _) = run_gotonav(&home, &["status"]);
    assert!(success);
    assert!(stdout.contains("NOT INITIALIZED"));

    let (success, stdout, _) = run_gotonav(&home, &["init"]);
    assert!(success);
    assert!(stdout.contains("GoToNav initialized"));
    assert!(home.join("config.toml").exists());
    assert!(home.join("gotonav.sqlite").exists());

    let (success, stdout, _) = run_gotonav(&home, &["status"]);
    assert!(success);
    assert!(stdout.contains("Status: INITIALIZED"));
    assert!(stdout.contains("Navigation events: 0"));
    assert!(stdout.contains("App pages: 7"));
    assert!(stdout.contains("Classifier: NOT TRAINED"));
}

#[test]
fn test_init_keeps_existing_config() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    std::fs::write(&config, "app_pages = [\"Only\"]\n").unwrap();

    let (success, _, _) = run_gotonav(temp.path(), &["init"]);
    assert!(success);
    assert_eq!(std::fs::read_to_string(&config).unwrap(), "app_pages = [\"Only\"]\n");
}

#[test]
fn test_record_train_suggest() {
    let temp = initialized_home();
    let home = temp.path();

    record(home, "alice", "Home", None);
    record(home, "alice", "Dashboard", Some("Home"));
    record(home, "alice", "Home", Some("Dashboard"));
    record(home, "alice", "Dashboard", Some("Home"));

    let (success, stdout, stderr) = run_gotonav(home, &["train"]);
    assert!(success, "train failed: {}", stderr);
    assert!(stdout.contains("Global: Training started"));
    assert!(stdout.contains("Frequency: Training complete"));
    assert!(stdout.contains("Training complete"));

    let (success, stdout, _) = run_gotonav(home, &["status"]);
    assert!(success);
    assert!(stdout.contains("Navigation events: 4"));
    assert!(stdout.contains("Users: 1"));
    assert!(stdout.contains("Classifier: trained"));
    assert!(stdout.contains("on 3 samples"));

    let (success, stdout, stderr) = run_gotonav(home, &["suggest", "--user", "alice", "--context", "Home"]);
    assert!(success, "suggest failed: {}", stderr);
    assert!(stdout.contains("1. "));
    assert!(stdout.contains("Dashboard"));

    let (success, stdout, _) = run_gotonav(home, &["suggest", "--user", "nobody"]);
    assert!(success);
    assert!(stdout.contains("No suggestions for nobody"));
}

#[test]
fn test_record_rejects_bad_input() {
    let temp = initialized_home();

    let (success, _, stderr) = run_gotonav(temp.path(), &["record", "--user", "", "--page", "Home"]);
    assert!(!success);
    assert!(stderr.contains("user"));

    let (success, _, _) = run_gotonav(
        temp.path(),
        &["record", "--user", "alice", "--page", "Home", "--context", "novalue"],
    );
    assert!(!success);
}

#[test]
fn test_menu_shortcuts() {
    let temp = initialized_home();
    let home = temp.path();

    let (success, _, _) = run_gotonav(home, &["menu", "add", "--user", "bob", "--item", "Reports", "--order", "1"]);
    assert!(success);
    let (success, _, _) = run_gotonav(home, &["menu", "add", "--user", "bob", "--item", "Inbox"]);
    assert!(success);

    let (success, stdout, _) = run_gotonav(home, &["menu", "list", "--user", "bob"]);
    assert!(success);
    let inbox = stdout.find("Inbox").expect("Inbox listed");
    let reports = stdout.find("Reports").expect("Reports listed");
    assert!(inbox < reports, "order 0 should list first:\n{}", stdout);

    let (success, stdout, _) = run_gotonav(home, &["suggest", "--user", "bob"]);
    assert!(success);
    assert!(stdout.contains("1. Inbox (1002.000, UserCustom)"));
    assert!(stdout.contains("2. Reports (1001.000, UserCustom)"));

    let (success, _, _) = run_gotonav(home, &["menu", "remove", "--user", "bob", "--item", "Inbox"]);
    assert!(success);
    let (success, stdout, _) = run_gotonav(home, &["menu", "clear", "--user", "bob"]);
    assert!(success);
    assert!(stdout.contains("Removed 1 custom items for bob"));

    let (success, stdout, _) = run_gotonav(home, &["menu", "list", "--user", "bob"]);
    assert!(success);
    assert!(stdout.contains("No custom items for bob"));
}

#[test]
fn test_session_reads_pages_from_stdin() {
    let temp = initialized_home();

    let mut child = Command::new(env!("CARGO_BIN_EXE_gotonav"))
        .args(["session", "--user", "carol"])
        .env("GOTONAV_HOME", temp.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start session");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"Home\nDashboard\ngo Reports\nquit\nSettings\n")
        .unwrap();

    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "session failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("continuous_development mode"));
    assert!(stdout.contains("Main menu: Home, Dashboard, Reports"));
    assert!(stdout.contains("carol navigates to Reports"));
    assert!(stdout.contains("Session ended"));

    // Lines after quit are never recorded
    let (_, status, _) = run_gotonav(temp.path(), &["status"]);
    assert!(status.contains("Navigation events: 3"));
}
