use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SEED_CONFIG: &str =
    r#"{"apps":{"http":{"servers":{"srv0":{"listen":[":443"],"routes":[]}}}}}"#;

/// Binary under test with every ambient input pinned to the temp fixture: a
/// process name that cannot exist, a config file inside the temp dir, and an
/// admin endpoint on the discard port so fallbacks fail fast.
fn caddyctl(config_file: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("caddyctl").into();
    cmd.env("CADDYCTL_BIN", "/nonexistent/caddyctl-e2e-proxy");
    cmd.env("CADDYCTL_CONFIG_FILE", config_file);
    cmd.env("CADDYCTL_ADMIN_URL", "http://127.0.0.1:9");
    cmd.env("CADDYCTL_SETTINGS", "/nonexistent/caddyctl-settings.toml");
    cmd.timeout(Duration::from_secs(30));
    cmd
}

fn seed_config(path: &Path) {
    std::fs::write(path, SEED_CONFIG).unwrap();
}

#[test]
fn test_e2e_no_args_prints_help() {
    let dir = TempDir::new().unwrap();
    caddyctl(&dir.path().join("autosave.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_e2e_status_stopped_without_config() {
    let dir = TempDir::new().unwrap();
    caddyctl(&dir.path().join("autosave.json"))
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"))
        .stdout(predicate::str::contains("no sites configured"));
}

#[test]
fn test_e2e_add_writes_config_and_lists_site() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    caddyctl(&config)
        .args(["add", "foo.localhost", "--port", "4321", "--no-reload"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "site added: foo.localhost -> 127.0.0.1:4321",
        ))
        .stdout(predicate::str::contains("reload skipped"));

    let output = caddyctl(&config).args(["list", "--json"]).output().unwrap();
    let sites: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let sites = sites.as_array().unwrap();

    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0]["host"], "foo.localhost");
    assert_eq!(sites[0]["port"], "443");
    assert_eq!(sites[0]["url"], "https://foo.localhost");
    assert_eq!(sites[0]["proxy_target"], "127.0.0.1:4321");
}

#[test]
fn test_e2e_add_domain_conflict_leaves_config_untouched() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    caddyctl(&config)
        .args(["add", "a.localhost", "--port", "1111", "--no-reload"])
        .assert()
        .success();

    let before = std::fs::read_to_string(&config).unwrap();

    caddyctl(&config)
        .args(["add", "a.localhost", "--port", "2222", "--no-reload"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let after = std::fs::read_to_string(&config).unwrap();
    assert_eq!(before, after, "failed add must not mutate the config");
}

#[test]
fn test_e2e_add_port_conflict() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    caddyctl(&config)
        .args(["add", "a.localhost", "--port", "1111", "--no-reload"])
        .assert()
        .success();

    caddyctl(&config)
        .args(["add", "b.localhost", "--port", "1111", "--no-reload"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already in use"));
}

#[test]
fn test_e2e_add_without_config_file_fails() {
    let dir = TempDir::new().unwrap();
    caddyctl(&dir.path().join("autosave.json"))
        .args(["add", "a.localhost", "--port", "3000", "--no-reload"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no configuration file"));
}

#[test]
fn test_e2e_add_rejects_unexpected_config_shape() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    std::fs::write(&config, r#"{"apps":{"http":{"servers":{}}}}"#).unwrap();

    caddyctl(&config)
        .args(["add", "a.localhost", "--port", "3000", "--no-reload"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("srv0"));
}

#[test]
fn test_e2e_remove_site_and_idempotent_rerun() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    caddyctl(&config)
        .args(["add", "a.localhost", "--port", "3000", "--no-reload"])
        .assert()
        .success();

    caddyctl(&config)
        .args(["remove", "a.localhost", "--yes", "--no-reload"])
        .assert()
        .success()
        .stdout(predicate::str::contains("site removed: a.localhost"));

    let output = caddyctl(&config).args(["list", "--json"]).output().unwrap();
    let sites: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(sites.as_array().unwrap().len(), 0);

    // Removing again is a no-op, not an error
    let before = std::fs::read_to_string(&config).unwrap();
    caddyctl(&config)
        .args(["remove", "a.localhost", "--yes", "--no-reload"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no site matching"));
    let after = std::fs::read_to_string(&config).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_e2e_remove_requires_domain() {
    let dir = TempDir::new().unwrap();
    caddyctl(&dir.path().join("autosave.json"))
        .arg("remove")
        .assert()
        .failure();
}

#[test]
fn test_e2e_stop_when_not_running() {
    let dir = TempDir::new().unwrap();
    caddyctl(&dir.path().join("autosave.json"))
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not running"));
}

#[test]
fn test_e2e_start_with_missing_binary() {
    let dir = TempDir::new().unwrap();
    caddyctl(&dir.path().join("autosave.json"))
        .arg("start")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed"));
}

#[test]
fn test_e2e_add_from_project_env() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    let project = dir.path().join("myapp");
    std::fs::create_dir(&project).unwrap();
    std::fs::write(project.join(".env"), "PORT=4555\n").unwrap();

    // No domain, no port: both come from the project directory
    caddyctl(&config)
        .args(["add", "--no-reload", "--project"])
        .arg(&project)
        .assert()
        .success()
        .stdout(predicate::str::contains("myapp.localhost"))
        .stdout(predicate::str::contains("4555"));

    let output = caddyctl(&config).args(["list", "--json"]).output().unwrap();
    let sites: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(sites[0]["host"], "myapp.localhost");
    assert_eq!(sites[0]["proxy_target"], "127.0.0.1:4555");
}

#[test]
fn test_e2e_add_updates_project_env_port() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    let project = dir.path().join("svc");
    std::fs::create_dir(&project).unwrap();
    std::fs::write(project.join(".env"), "NODE_ENV=dev\nPORT=3000\n").unwrap();

    caddyctl(&config)
        .args(["add", "c.localhost", "--port", "5001", "--no-reload", "--project"])
        .arg(&project)
        .assert()
        .success();

    let env = std::fs::read_to_string(project.join(".env")).unwrap();
    assert_eq!(env, "NODE_ENV=dev\nPORT=5001\n");
}

#[test]
fn test_e2e_status_json_shape() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("autosave.json");
    seed_config(&config);

    caddyctl(&config)
        .args(["add", "a.localhost", "--port", "3000", "--no-reload"])
        .assert()
        .success();

    let output = caddyctl(&config).args(["status", "--json"]).output().unwrap();
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(report["status"]["is_running"], false);
    assert_eq!(report["sites"].as_array().unwrap().len(), 1);
    assert_eq!(report["sites"][0]["host"], "a.localhost");
}
