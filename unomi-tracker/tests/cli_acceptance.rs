use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Nothing listens here, so connections are refused immediately
const UNREACHABLE_URL: &str = "http://127.0.0.1:1/cxs";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, contents: &str) {
        let dir = self.xdg_config.join("unomi-tracker");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), contents).expect("failed to write config");
    }

    fn cookie_jar(&self) -> PathBuf {
        self.xdg_state.join("unomi-tracker/cookies.json")
    }
}

fn run_cli(env: &CliTestEnv, args: &[&str]) -> Output {
    Command::new(PathBuf::from(assert_cmd::cargo::cargo_bin!("unomi-tracker")))
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute unomi-tracker: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "unomi-tracker {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn status_reports_defaults_and_config_overrides() {
    let env = CliTestEnv::new();

    let output = run_cli(&env, &["status"]);
    assert_success(&["status"], &output);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("url: http://localhost:8181/cxs"));
    assert!(stdout.contains("scope: systemscope"));
    assert!(stdout.contains("timeout: 1500ms"));

    env.write_config(
        r#"
[tracker]
url = "https://cxs.example.com/cxs"
scope = "acme"
timeout_in_milliseconds = -1
"#,
    );
    let output = run_cli(&env, &["status"]);
    assert_success(&["status"], &output);
    let stdout = stdout_of(&output);
    assert!(
        stdout.contains("url: https://cxs.example.com/cxs"),
        "expected configured url, got:\n{stdout}"
    );
    assert!(stdout.contains("scope: acme"));
    assert!(stdout.contains("timeout: disabled"));
}

#[test]
fn invalid_config_is_rejected() {
    let env = CliTestEnv::new();
    env.write_config("[tracker]\nscope = \"\"\n");

    let output = run_cli(&env, &["status"]);
    assert!(!output.status.success());
}

#[test]
fn session_id_is_stable_until_reset() {
    let env = CliTestEnv::new();

    let first = run_cli(&env, &["session"]);
    assert_success(&["session"], &first);
    let first_id = stdout_of(&first).trim().to_string();
    assert_eq!(first_id.len(), 36, "expected a uuid, got {first_id:?}");
    assert!(env.cookie_jar().exists());

    let second = run_cli(&env, &["session"]);
    assert_success(&["session"], &second);
    assert_eq!(stdout_of(&second).trim(), first_id);

    let reset = run_cli(&env, &["session", "--reset"]);
    assert_success(&["session", "--reset"], &reset);
    assert_ne!(stdout_of(&reset).trim(), first_id);
}

#[test]
fn context_falls_back_when_server_is_down() {
    let env = CliTestEnv::new();
    let args = ["--url", UNREACHABLE_URL, "context", "--skip-events"];

    let output = run_cli(&env, &args);
    assert_success(&args, &output);

    let context: serde_json::Value =
        serde_json::from_str(stdout_of(&output).trim()).expect("context should be JSON");
    assert_eq!(context, serde_json::json!({}));
    assert!(String::from_utf8_lossy(&output.stderr).contains("fallback"));
}

#[test]
fn track_reports_delivery_failure() {
    let env = CliTestEnv::new();
    let args = ["--url", UNREACHABLE_URL, "track", "signup"];

    let output = run_cli(&env, &args);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to send 'signup'"));
}

#[test]
fn track_rejects_malformed_properties() {
    let env = CliTestEnv::new();
    let args = ["track", "signup", "--properties", "{not json"];

    let output = run_cli(&env, &args);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not valid JSON"));
}
