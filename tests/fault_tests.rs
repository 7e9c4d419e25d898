#![cfg(unix)]

use background_logger::fault::{TerminationGuard, TerminationStep};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};

fn run_demo(mode: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_background_logger"))
        .arg(mode)
        .env_remove("RUST_LOG")
        .env_remove("BGLOG_TRANSFORM")
        .output()
        .unwrap()
}

#[test]
fn test_guard_allows_one_diagnosis() {
    let guard = TerminationGuard::new();
    assert_eq!(guard.enter(), TerminationStep::Diagnose);
    assert_eq!(guard.enter(), TerminationStep::ExitNow);
}

#[test]
fn test_abort_drains_before_dying() {
    let output = run_demo("crash-abort");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "stderr: {stderr}");
    assert!(stderr.contains(&format!("Caught SIGNAL {}", libc::SIGABRT)), "stderr: {stderr}");
    assert!(stderr.contains("[bt]:"), "stderr: {stderr}");
    assert_eq!(
        stdout.lines().collect::<Vec<_>>(),
        vec!["before crash 0", "before crash 1", "before crash 2"]
    );
}

#[test]
fn test_terminating_panic_drains_and_reports() {
    let output = run_demo("panic");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "stderr: {stderr}");
    assert!(stderr.contains("caught unhandled panic"), "stderr: {stderr}");
    assert!(stderr.contains("demo panic"), "stderr: {stderr}");
    assert_eq!(stdout.trim_end(), "before panic ok");
}

#[test]
fn test_normal_exit_drains() {
    let output = run_demo("latency");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("background:"));
    assert!(stdout.contains("direct:"));
}
