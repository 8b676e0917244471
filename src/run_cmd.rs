//! Subprocess execution used by the cargo and gomod resolvers to shell out
//! to `cargo`/`go` when vendoring. Every invocation is logged, given a
//! hard timeout, and its exit status checked.

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::{HermetoError, Result};

/// Run `program` with `args` in `cwd`, capturing stdout/stderr, and fail
/// with `PackageManagerError` if it exits non-zero, times out, or can't be
/// spawned at all (e.g. the tool isn't installed).
#[instrument(skip(args), fields(program, args = ?args))]
pub fn run_and_check(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<Output> {
    let output = run(program, args, cwd, timeout)?;

    if !output.status.success() {
        return Err(HermetoError::package_manager_error(format!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            status_to_exit_code(&output),
            String::from_utf8_lossy(&output.stderr).trim(),
        )));
    }

    Ok(output)
}

/// Like [`run_and_check`], but returns the raw `Output` regardless of exit
/// status, for callers that need to inspect a non-zero exit (e.g. `go mod
/// vendor -check`, whose failure is informational, not fatal).
pub fn run(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<Output> {
    debug!(program, ?args, cwd = %cwd.display(), "running subprocess");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            HermetoError::package_manager_error(format!("failed to spawn '{program}': {e}"))
        })?;

    let deadline = std::time::Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HermetoError::package_manager_error(format!(
                        "'{program}' timed out after {}s",
                        timeout.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(HermetoError::package_manager_error(format!(
                    "failed to wait on '{program}': {e}"
                )));
            }
        }
    }

    child
        .wait_with_output()
        .map_err(|e| HermetoError::package_manager_error(format!("failed to collect output of '{program}': {e}")))
}

fn status_to_exit_code(output: &Output) -> String {
    match output.status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_and_check_succeeds_for_true() {
        let cwd = std::env::current_dir().unwrap();
        run_and_check("true", &[], &cwd, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn run_and_check_fails_for_false() {
        let cwd = std::env::current_dir().unwrap();
        let err = run_and_check("false", &[], &cwd, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, HermetoError::PackageManagerError { .. }));
    }

    #[test]
    fn run_and_check_fails_for_missing_binary() {
        let cwd = std::env::current_dir().unwrap();
        let err = run_and_check("hermeto-definitely-not-a-real-binary", &[], &cwd, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, HermetoError::PackageManagerError { .. }));
    }
}
