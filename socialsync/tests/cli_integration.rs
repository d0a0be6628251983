//! Integration tests for the socialsync CLI
//!
//! Every command here runs against a temporary config and database and makes
//! no network calls.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("socialsync.db")
            .to_string_lossy()
            .replace('\\', "\\\\");

        let config = format!(
            r#"
[database]
path = "{}"

[app]
base_url = "https://app.example.com"

[oauth.facebook]
client_id = "fb-app"
client_secret = "fb-secret"
redirect_uri = "https://app.example.com/oauth/callback"
"#,
            db_path
        );
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, config).unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("socialsync").unwrap();
        cmd.env("SOCIALSYNC_CONFIG", &self.config_path);
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("socialsync")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("insights"));
}

#[test]
fn test_connect_prints_authorization_url() {
    let env = TestEnv::new();

    env.cmd()
        .args(["connect", "facebook", "--owner", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://www.facebook.com/"))
        .stdout(predicate::str::contains("state=FACEBOOK_42"))
        .stdout(predicate::str::contains("client_id=fb-app"));
}

#[test]
fn test_connect_unconfigured_platform_fails() {
    let env = TestEnv::new();

    env.cmd()
        .args(["connect", "pinterest", "--owner", "42"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Missing OAuth setting"));
}

#[test]
fn test_unknown_platform_is_rejected_by_parser() {
    let env = TestEnv::new();

    env.cmd()
        .args(["connect", "myspace", "--owner", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("myspace"));
}

#[test]
fn test_callback_without_code_redirects_with_error() {
    let env = TestEnv::new();

    env.cmd()
        .args(["callback", "--state", "FACEBOOK_42"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "https://app.example.com/settings?error=missing_params",
        ));
}

#[test]
fn test_callback_json_output() {
    let env = TestEnv::new();

    let output = env
        .cmd()
        .args(["--format", "json", "callback", "--code", "abc", "--state", "facebook-42"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["error"], "invalid_state");
    assert_eq!(body["success"], false);
}

#[test]
fn test_status_with_nothing_connected() {
    let env = TestEnv::new();

    env.cmd()
        .args(["status", "--owner", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("FACEBOOK: not connected"))
        .stdout(predicate::str::contains("PINTEREST: not connected"));
}

#[test]
fn test_publish_to_unconnected_platforms_fails() {
    let env = TestEnv::new();

    env.cmd()
        .args(["publish", "--owner", "42", "--platform", "facebook,linkedin", "Hello"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FACEBOOK: failed"))
        .stdout(predicate::str::contains("LINKEDIN: failed"));
}

#[test]
fn test_publish_reads_stdin() {
    let env = TestEnv::new();

    env.cmd()
        .args(["--format", "json", "publish", "--owner", "42", "--platform", "linkedin"])
        .write_stdin("From a pipe\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"platform\": \"LINKEDIN\""));
}

#[test]
fn test_insights_for_unknown_post_are_zeroed() {
    let env = TestEnv::new();

    env.cmd()
        .args(["insights", "--platform", "youtube", "post-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("post-1: 0 likes, 0 comments"));
}

#[test]
fn test_insights_with_owner_for_unconnected_account() {
    let env = TestEnv::new();

    env.cmd()
        .args(["insights", "--platform", "facebook", "--owner", "42", "external-1", "external-2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("external-1: 0 likes"))
        .stdout(predicate::str::contains("external-2: 0 likes"));
}

#[test]
fn test_disconnect_when_not_connected() {
    let env = TestEnv::new();

    env.cmd()
        .args(["disconnect", "youtube", "--owner", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("YOUTUBE was not connected"));
}
