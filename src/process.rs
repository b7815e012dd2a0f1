//! Running external tools under a deadline.

use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Handle;

/// How an external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own. `code` is `None` when it was
    /// terminated by a signal.
    Exited {
        /// Exit code.
        code: Option<i32>,
    },
    /// The deadline passed; the process was killed.
    TimedOut,
}

impl ProcessOutcome {
    /// True if the process exited with status 0.
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: Some(0) })
    }
}

/// Runs an external command to completion or until a timeout fires.
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, killing it if it outlives `timeout`.
    ///
    /// An `Err` means the process could not be started or waited on.
    fn run(&self, program: &str, args: &[OsString], timeout: Duration) -> io::Result<ProcessOutcome>;
}

/// Runs commands as real child processes on the tokio runtime.
///
/// Callers are blocking code (extractors run inside `spawn_blocking`), so
/// each run is driven to completion with `block_on`: on the captured
/// runtime handle if there is one, else on a throwaway current-thread
/// runtime.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    handle: Option<Handle>,
}

impl SystemRunner {
    /// Runner bound to the current tokio runtime, if called inside one.
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    async fn run_child(program: &str, args: &[OsString], timeout: Duration) -> io::Result<ProcessOutcome> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        match waited {
            Ok(status) => Ok(ProcessOutcome::Exited {
                code: status?.code(),
            }),
            Err(_) => {
                tracing::debug!(program, pid = ?child.id(), "Killing process after timeout");
                // The child may exit between the timeout firing and kill.
                if let Err(e) = child.kill().await
                    && e.kind() != io::ErrorKind::InvalidInput
                {
                    return Err(e);
                }
                Ok(ProcessOutcome::TimedOut)
            }
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &str, args: &[OsString], timeout: Duration) -> io::Result<ProcessOutcome> {
        let child = Self::run_child(program, args, timeout);
        match &self.handle {
            Some(handle) => handle.block_on(child),
            None => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(child),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_exit_status_is_reported() {
        let outcome = SystemRunner::new()
            .run("sh", &args(&["-c", "exit 0"]), Duration::from_secs(5))
            .unwrap();
        assert!(outcome.success());

        let outcome = SystemRunner::new()
            .run("sh", &args(&["-c", "exit 3"]), Duration::from_secs(5))
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Exited { code: Some(3) });
        assert!(!outcome.success());
    }

    #[test]
    fn test_timeout_kills_process() {
        let start = std::time::Instant::now();
        let outcome = SystemRunner::new()
            .run("sleep", &args(&["10"]), Duration::from_millis(200))
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::TimedOut);
        assert!(!outcome.success());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let result = SystemRunner::new().run(
            "bookland-no-such-program",
            &[],
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_on_captured_runtime_from_blocking_thread() {
        let runner = SystemRunner::new();
        assert!(runner.handle.is_some());

        let outcome = tokio::task::spawn_blocking(move || {
            runner.run("sh", &args(&["-c", "exit 2"]), Duration::from_secs(5))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome, ProcessOutcome::Exited { code: Some(2) });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_on_captured_runtime() {
        let runner = SystemRunner::new();
        let outcome = tokio::task::spawn_blocking(move || {
            runner.run("sleep", &args(&["10"]), Duration::from_millis(200))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
    }
}
