//! Shell command execution for cache misses.

use std::path::Path;
use std::process::Stdio;

/// Run `command` through the platform shell with the package directory
/// as the working directory.
///
/// Standard streams are inherited from this process so task output
/// reaches the caller's terminal as it happens; interleaving between
/// concurrent tasks is expected.
pub async fn run_shell(command: &str, cwd: &Path) -> std::io::Result<std::process::ExitStatus> {
    let (shell, flag) = platform_shell();
    tokio::process::Command::new(shell)
        .arg(flag)
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
}

/// Exit code to report for a finished command; processes killed by a
/// signal report -1.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(windows)]
fn platform_shell() -> (&'static str, &'static str) {
    ("cmd", "/C")
}

#[cfg(not(windows))]
fn platform_shell() -> (&'static str, &'static str) {
    ("/bin/sh", "-c")
}
