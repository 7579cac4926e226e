//! CLI tests for the `shellcontrol` binary.
//!
//! Only commands that never reach the planner are exercised here.

use std::fs;
use std::process::Command;

use shellcontrol::exit_codes;
use shellcontrol::io::config::{AgentConfig, load_config};

fn shellcontrol() -> Command {
    Command::new(env!("CARGO_BIN_EXE_shellcontrol"))
}

#[test]
fn tools_lists_every_tool() {
    let output = shellcontrol().arg("tools").output().expect("shellcontrol tools");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["run-command", "read-file", "write-file", "mark-complete"] {
        assert!(stdout.contains(name), "missing {name} in {stdout}");
    }
    assert!(stdout.contains("execute_shell_command"));
}

#[test]
fn init_config_writes_defaults_and_refuses_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("agent.toml");

    let status = shellcontrol()
        .args(["init-config", "--config"])
        .arg(&path)
        .status()
        .expect("init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load"), AgentConfig::default());

    let status = shellcontrol()
        .args(["init-config", "--config"])
        .arg(&path)
        .status()
        .expect("init-config again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = shellcontrol()
        .args(["init-config", "--force", "--config"])
        .arg(&path)
        .status()
        .expect("init-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn run_rejects_invalid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("agent.toml");
    fs::write(&path, "command_timeout_secs = 0\n").expect("write");

    let output = shellcontrol()
        .args(["run", "list files", "--config"])
        .arg(&path)
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("command_timeout_secs"));
}

#[test]
fn run_without_api_key_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("agent.toml");
    fs::write(&path, "[planner]\napi_key_env = \"SHELLCONTROL_TEST_UNSET_KEY\"\n").expect("write");

    let output = shellcontrol()
        .args(["run", "list files", "--config"])
        .arg(&path)
        .env_remove("SHELLCONTROL_TEST_UNSET_KEY")
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("SHELLCONTROL_TEST_UNSET_KEY"));
}
