//! Trait abstraction for shell command execution to enable testing

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Trait for running a shell script with a bounded execution time
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a script and return its combined stdout/stderr output.
    ///
    /// Fails on timeout or a non-zero exit status.
    async fn run(&self, script: &str, timeout: Duration) -> io::Result<String>;
}

/// Runs scripts through `/bin/bash -c`, the way the controller's utility
/// surface expects to be sourced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, script: &str, timeout: Duration) -> io::Result<String> {
        debug!("Running command: {}", script);

        let output = tokio::time::timeout(
            timeout,
            Command::new("/bin/bash")
                .arg("-c")
                .arg(script)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("command timed out after {}s", timeout.as_secs()),
            )
        })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("command exited with {}: {}", output.status, text.trim()),
            ));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = ShellCommandRunner;
        let output = runner
            .run("echo $((40 + 2))", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.trim(), "42");
    }

    #[tokio::test]
    async fn test_run_combines_stderr() {
        let runner = ShellCommandRunner;
        let output = runner
            .run("echo visible 1>&2", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.contains("visible"));
    }

    #[tokio::test]
    async fn test_run_fails_on_nonzero_exit() {
        let runner = ShellCommandRunner;
        let result = runner.run("exit 3", Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let runner = ShellCommandRunner;
        let result = runner.run("sleep 5", Duration::from_millis(50)).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
