//! Abstraction over external command execution.
//!
//! [`CommandRunner`] allows swapping the real process execution
//! ([`SystemCommandRunner`]) with a mock in tests. `smartctl` is rarely
//! installed in CI and most queries need a real disk and root privileges, so
//! injecting a [`CommandRunner`] lets the argument building and result
//! mapping of [`crate::smartctl::Smartctl`] be tested without the tool.

use async_trait::async_trait;
use std::io;
use std::process::ExitStatus;
use tokio::process::Command;

/// Raw result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code of the process (negated signal number if killed by a signal)
    pub status: i32,
    /// Everything written on standard output
    pub stdout: Vec<u8>,
    /// Everything written on standard error
    pub stderr: Vec<u8>,
}

/// Trait for running an external command to completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with the given `args`, wait for it to exit and return
    /// its captured output.
    ///
    /// An `Err` means the process could not be started at all.
    async fn run(&self, program: &str, args: Vec<String>) -> io::Result<CommandOutput>;
}

/// Default implementation that delegates to [`tokio::process::Command`].
///
/// The child locale is forced to `C` so that number and date formatting in
/// the tool output does not depend upon the host configuration.
#[derive(Debug, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: Vec<String>) -> io::Result<CommandOutput> {
        // `output` pipes and drains stdout and stderr concurrently
        let output = Command::new(program)
            .args(&args)
            .env("LANG", "C")
            .env("LC_ALL", "C")
            .output()
            .await?;
        Ok(CommandOutput {
            status: exit_code(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Convert an [`ExitStatus`] into a plain integer.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => signal_code(status),
    }
}

#[cfg(unix)]
fn signal_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map_or(-1, |sig| -sig)
}

#[cfg(not(unix))]
fn signal_code(_status: ExitStatus) -> i32 {
    -1
}

#[cfg(all(test, unix))]
mod should {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn capture_stdout_stderr_and_code() -> io::Result<()> {
        let out = SystemCommandRunner
            .run(
                "sh",
                vec!["-c".into(), "echo out; echo err >&2; exit 3".into()],
            )
            .await?;
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
        Ok(())
    }

    #[test(tokio::test)]
    async fn force_c_locale() -> io::Result<()> {
        let out = SystemCommandRunner
            .run("sh", vec!["-c".into(), "printf '%s:%s' \"$LANG\" \"$LC_ALL\"".into()])
            .await?;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "C:C");
        Ok(())
    }

    #[test(tokio::test)]
    async fn report_signal_as_negative_code() -> io::Result<()> {
        let out = SystemCommandRunner
            .run("sh", vec!["-c".into(), "kill -9 $$".into()])
            .await?;
        assert_eq!(out.status, -9);
        Ok(())
    }

    #[test(tokio::test)]
    async fn fail_to_launch_missing_program() {
        let res = SystemCommandRunner
            .run("/nonexistent/smartprobe-missing-tool", vec![])
            .await;
        assert_eq!(
            res.map_err(|e| e.kind()).unwrap_err(),
            io::ErrorKind::NotFound
        );
    }

    #[test(tokio::test)]
    async fn drain_large_output() -> io::Result<()> {
        // More than a pipe buffer on both streams
        let out = SystemCommandRunner
            .run(
                "sh",
                vec![
                    "-c".into(),
                    "i=0; while [ $i -lt 20000 ]; do echo 0123456789; echo 0123456789 >&2; i=$((i+1)); done"
                        .into(),
                ],
            )
            .await?;
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout.len(), 20000 * 11);
        assert_eq!(out.stderr.len(), 20000 * 11);
        Ok(())
    }
}
