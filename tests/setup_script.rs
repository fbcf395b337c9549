//! Runs `scripts/setup.sh` in dry-run mode against a scratch copy of the repo.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

fn scratch_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    fs::create_dir(dir.path().join("scripts")).unwrap();
    fs::copy(root.join("scripts/setup.sh"), dir.path().join("scripts/setup.sh")).unwrap();
    fs::copy(root.join(".env.example"), dir.path().join(".env.example")).unwrap();
    dir
}

fn run_setup(dir: &Path) -> String {
    let output = Command::new("bash")
        .arg(dir.join("scripts/setup.sh"))
        .env("SETUP_DRY_RUN", "1")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_setup_creates_env_and_runs_steps_in_order() {
    let dir = scratch_repo();

    let stdout = run_setup(dir.path());
    assert_eq!(
        fs::read_to_string(dir.path().join(".env")).unwrap(),
        fs::read_to_string(dir.path().join(".env.example")).unwrap()
    );

    let npm = stdout.find("+ npm install -g firecrawl-mcp").unwrap();
    let build = stdout.find("+ cargo build").unwrap();
    let compose = stdout.find("+ docker compose up --build").unwrap();
    assert!(npm < build && build < compose);
}

#[test]
fn test_setup_keeps_existing_env() {
    let dir = scratch_repo();
    fs::write(dir.path().join(".env"), "OPENAI_API_KEY=sk-mine\n").unwrap();

    let stdout = run_setup(dir.path());
    assert!(stdout.contains("Keeping existing .env"));
    assert_eq!(
        fs::read_to_string(dir.path().join(".env")).unwrap(),
        "OPENAI_API_KEY=sk-mine\n"
    );
}
