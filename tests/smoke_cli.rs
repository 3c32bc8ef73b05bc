//! Smoke tests for the `stepper-link` binary without hardware.
use std::io::Write;
use std::process::{Command, Output, Stdio};

fn run_console(args: &[&str], input: &str) -> Output {
    let config_home = tempfile::tempdir().expect("temp dir");
    let mut child = Command::new(env!("CARGO_BIN_EXE_stepper-link"))
        .args(args)
        .env_remove("STEPPER_LINK_CONFIG")
        .env_remove("STEPPER_LINK_SERIAL_PORT")
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start binary");

    {
        let stdin = child.stdin.as_mut().expect("stdin available");
        stdin.write_all(input.as_bytes()).unwrap();
    }
    drop(child.stdin.take());

    child.wait_with_output().expect("binary did not exit")
}

#[test]
fn help_and_status_without_device() {
    let output = run_console(&[], "help\nstatus\nquit\n");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "exit status: {:?}", output.status);
    assert!(stdout.contains("emergency stop"), "help output missing. Got: {stdout}");
    assert!(stdout.contains("link Closed (no device)"), "status missing. Got: {stdout}");
}

#[test]
fn unknown_command_is_not_fatal() {
    let output = run_console(&[], "jump 3\nstatus\n");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Unknown command 'jump'"), "Got: {stdout}");
    assert!(stdout.contains("link Closed"), "Got: {stdout}");
}

#[test]
fn json_output_is_line_delimited() {
    let output = run_console(&["--json"], "status\nenable\n");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    let values: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("every line is JSON"))
        .collect();
    assert_eq!(values[0]["event"], "status");
    assert_eq!(values[0]["link"], "Closed");
    assert_eq!(values[0]["stepper"]["speed"], 1000);
    // Sending on a closed link is reported, not fatal.
    assert!(values
        .iter()
        .any(|v| v["event"] == "failure" && v["message"].as_str().unwrap().contains("closed")));
}

#[test]
fn help_flag_describes_tool() {
    let output = Command::new(env!("CARGO_BIN_EXE_stepper-link"))
        .arg("--help")
        .output()
        .expect("failed to start binary");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("--port"));
    assert!(stdout.contains("--list"));
}
