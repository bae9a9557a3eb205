use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn repodoc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("repodoc");
    path
}

const WORKING_TOOL: &str = r##"
[tool]
program = "sh"
analyze_args = ["-c", 'mkdir -p "$1/.ai/docs" && printf "# Architecture\n" > "$1/.ai/docs/architecture.md"', "sh", "{repo_path}"]
generate_args = ["-c", 'printf "# Demo\n" > "$1/README.md"', "sh", "{repo_path}"]
"##;

const FAILING_TOOL: &str = r#"
[tool]
program = "sh"
analyze_args = ["-c", 'echo "model unavailable" >&2; exit 3', "sh", "{repo_path}"]
generate_args = ["-c", "exit 0", "sh", "{repo_path}"]
"#;

fn setup_test_env(tool_section: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/repodoc.sqlite"

[storage]
repos_root = "{root}/data/repos"
retention_days = 7
sweep_interval_secs = 0

[server]
bind = "127.0.0.1:0"
{tool}"#,
        root = root.display(),
        tool = tool_section,
    );

    let config_path = config_dir.join("repodoc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_repodoc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_repodoc_with_log(config_path, args, "warn")
}

fn run_repodoc_with_log(config_path: &Path, args: &[&str], log: &str) -> (String, String, bool) {
    let binary = repodoc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("REPODOC_LOG", log)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run repodoc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn write_demo_zip(path: &Path) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let opts = SimpleFileOptions::default();
    zip.add_directory("demo/", opts).unwrap();
    zip.start_file("demo/main.py", opts).unwrap();
    zip.write_all(b"print('demo')\n").unwrap();
    zip.finish().unwrap();
}

fn list_json(config_path: &Path) -> serde_json::Value {
    let (stdout, stderr, success) = run_repodoc(config_path, &["list", "--json"]);
    assert!(success, "list failed: {}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env(WORKING_TOOL);
    let (stdout, stderr, success) = run_repodoc(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/repodoc.sqlite").exists());
    assert!(tmp.path().join("data/repos").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env(WORKING_TOOL);
    let (_, _, s1) = run_repodoc(&config, &["init"]);
    let (_, stderr, s2) = run_repodoc(&config, &["init"]);
    assert!(s1);
    assert!(s2, "second init failed: {}", stderr);
}

#[test]
fn test_submit_archive_completes() {
    let (tmp, config) = setup_test_env(WORKING_TOOL);
    run_repodoc(&config, &["init"]);

    let archive = tmp.path().join("demo.zip");
    write_demo_zip(&archive);

    let (stdout, stderr, success) =
        run_repodoc(&config, &["submit", "--archive", archive.to_str().unwrap()]);
    assert!(success, "submit failed: {}\n{}", stdout, stderr);
    assert!(stdout.contains("completed"), "{}", stdout);
    assert!(stdout.contains("README"));
    assert!(stdout.contains("architecture"));

    // The caller's archive is copied, never consumed.
    assert!(archive.exists());

    let listing = list_json(&config);
    let projects = listing.as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["name"], "demo");
    assert_eq!(projects[0]["status"], "completed");
    assert_eq!(projects[0]["source_kind"], "archive");
    assert_eq!(projects[0]["artifact_count"], 2);

    let id = projects[0]["id"].as_str().unwrap();
    let (stdout, stderr, success) = run_repodoc(&config, &["status", id, "--json"]);
    assert!(success, "status failed: {}", stderr);
    let detail: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let names: Vec<&str> = detail["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["README", "architecture"]);
    assert_eq!(detail["artifacts"][0]["content"], "# Demo\n");

    // Run directories are gone once the project is terminal.
    let repos = tmp.path().join("data/repos");
    let leftovers: Vec<_> = fs::read_dir(&repos)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_submit_with_failing_tool_exits_nonzero() {
    let (tmp, config) = setup_test_env(FAILING_TOOL);
    run_repodoc(&config, &["init"]);

    let archive = tmp.path().join("demo.zip");
    write_demo_zip(&archive);

    let (stdout, _stderr, success) = run_repodoc(
        &config,
        &["submit", "--archive", archive.to_str().unwrap(), "--name", "broken"],
    );
    assert!(!success);
    assert!(stdout.contains("failed"), "{}", stdout);

    let listing = list_json(&config);
    assert_eq!(listing[0]["name"], "broken");
    assert_eq!(listing[0]["status"], "failed");
    assert_eq!(listing[0]["artifact_count"], 0);
}

#[test]
fn test_quiet_submit_reports_no_progress() {
    let (tmp, config) = setup_test_env(WORKING_TOOL);
    run_repodoc(&config, &["init"]);

    let archive = tmp.path().join("demo.zip");
    write_demo_zip(&archive);
    let archive = archive.to_str().unwrap();

    let (_, stderr, success) = run_repodoc_with_log(&config, &["submit", "--archive", archive], "info");
    assert!(success, "{}", stderr);
    assert!(stderr.contains("project status changed"), "{}", stderr);

    let (stdout, stderr, success) =
        run_repodoc_with_log(&config, &["submit", "--archive", archive, "--quiet"], "info");
    assert!(success, "{}", stderr);
    assert!(stdout.contains("completed"), "{}", stdout);
    assert!(!stderr.contains("project status changed"), "{}", stderr);

    let (_, _, success) = run_repodoc(
        &config,
        &["submit", "--archive", archive, "--quiet", "--json-progress"],
    );
    assert!(!success);
}

#[test]
fn test_list_is_scoped_by_owner() {
    let (tmp, config) = setup_test_env(WORKING_TOOL);
    run_repodoc(&config, &["init"]);

    let archive = tmp.path().join("demo.zip");
    write_demo_zip(&archive);
    let (_, stderr, success) = run_repodoc(
        &config,
        &["submit", "--archive", archive.to_str().unwrap(), "--owner", "alice"],
    );
    assert!(success, "{}", stderr);

    let (stdout, _, _) = run_repodoc(&config, &["list", "--owner", "alice", "--json"]);
    let alice: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(alice.as_array().unwrap().len(), 1);

    let (stdout, _, _) = run_repodoc(&config, &["list", "--owner", "bob"]);
    assert!(stdout.contains("No projects"));

    let id = alice[0]["id"].as_str().unwrap();
    let (_, stderr, success) = run_repodoc(&config, &["status", id, "--owner", "bob"]);
    assert!(!success);
    assert!(stderr.contains("project not found"));
}

#[test]
fn test_status_missing_project() {
    let (_tmp, config) = setup_test_env(WORKING_TOOL);
    run_repodoc(&config, &["init"]);

    let (_, stderr, success) = run_repodoc(&config, &["status", "no-such-project"]);
    assert!(!success);
    assert!(stderr.contains("project not found"));
}

#[test]
fn test_submit_requires_source() {
    let (_tmp, config) = setup_test_env(WORKING_TOOL);
    let (_, _, success) = run_repodoc(&config, &["submit"]);
    assert!(!success);
}

#[test]
fn test_sweep_removes_expired_directories() {
    let (tmp, config) = setup_test_env(WORKING_TOOL);
    run_repodoc(&config, &["init"]);

    let repos = tmp.path().join("data/repos");
    let old = repos.join("u1_expired");
    let fresh = repos.join("u1_fresh");
    fs::create_dir_all(&old).unwrap();
    fs::create_dir_all(&fresh).unwrap();
    let ten_days = Duration::from_secs(10 * 24 * 60 * 60);
    fs::File::open(&old)
        .unwrap()
        .set_modified(SystemTime::now() - ten_days)
        .unwrap();

    let (stdout, stderr, success) = run_repodoc(&config, &["sweep", "--dry-run"]);
    assert!(success, "{}", stderr);
    assert!(stdout.contains("Would remove 1 of 2"), "{}", stdout);
    assert!(old.exists());

    let (stdout, stderr, success) = run_repodoc(&config, &["sweep"]);
    assert!(success, "{}", stderr);
    assert!(stdout.contains("Removed 1 of 2"), "{}", stdout);
    assert!(!old.exists());
    assert!(fresh.exists());

    let (stdout, _, success) = run_repodoc(&config, &["sweep", "--days", "0"]);
    assert!(success);
    assert!(stdout.contains("Removed 1 of 1"), "{}", stdout);
    assert!(!fresh.exists());

    let kept = repos.join("u1_kept");
    fs::create_dir_all(&kept).unwrap();
    let (stdout, stderr, success) = run_repodoc(&config, &["sweep", "--days", "300000000000000"]);
    assert!(success, "{}", stderr);
    assert!(stdout.contains("Removed 0 of 1"), "{}", stdout);
    assert!(kept.exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config) = setup_test_env(
        r#"
[tool]
program = "sh"
analyze_args = ["-c", "true"]
"#,
    );
    let (_, stderr, success) = run_repodoc(&config, &["init"]);
    assert!(!success);
    assert!(stderr.contains("tool.analyze_args"), "{}", stderr);
}
