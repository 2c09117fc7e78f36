//! Time-bounded external command execution.
//!
//! Every external step (kubectl, systemctl, poweroff) goes through a
//! [`CommandRunner`]. The outcome keeps "timed out", "exited non-zero" and
//! "binary not found" apart so callers can log exactly what happened.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Longest slice of stderr kept in an outcome.
const MAX_DETAIL_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CommandOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    /// The process ran and exited unsuccessfully. `code` is `None` when it
    /// was killed by a signal.
    Exited { code: Option<i32>, stderr: String },
    TimedOut { after: Duration },
    NotFound,
    SpawnFailed(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Succeeded => f.write_str("succeeded"),
            CommandOutcome::Exited { code: Some(code), stderr } if stderr.is_empty() => {
                write!(f, "exited with status {code}")
            }
            CommandOutcome::Exited { code: Some(code), stderr } => {
                write!(f, "exited with status {code}: {stderr}")
            }
            CommandOutcome::Exited { code: None, .. } => f.write_str("terminated by signal"),
            CommandOutcome::TimedOut { after } => {
                write!(f, "timed out after {}s and was killed", after.as_secs())
            }
            CommandOutcome::NotFound => f.write_str("binary not found"),
            CommandOutcome::SpawnFailed(e) => write!(f, "failed to start: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

pub trait CommandRunner {
    /// Run `cmd` to completion or until `timeout` elapses, whichever is first.
    fn run(&self, cmd: &CommandSpec, timeout: Duration)
        -> impl Future<Output = CommandOutcome> + Send;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> CommandOutcome {
        let spawned = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => return CommandOutcome::NotFound,
            Err(e) => return CommandOutcome::SpawnFailed(e.to_string()),
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => CommandOutcome::Succeeded,
            Ok(Ok(output)) => CommandOutcome::Exited {
                code: output.status.code(),
                stderr: truncate(String::from_utf8_lossy(&output.stderr).trim()),
            },
            Ok(Err(e)) => CommandOutcome::SpawnFailed(format!("wait failed: {e}")),
            Err(_) => CommandOutcome::TimedOut { after: timeout },
        }
    }
}

/// Logs each command instead of running it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> CommandOutcome {
        tracing::info!(command = %cmd, timeout_secs = timeout.as_secs(), "dry run: would execute");
        CommandOutcome::Succeeded
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_DETAIL_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_renders_like_a_shell_line() {
        let cmd = CommandSpec::new("/usr/bin/kubectl")
            .args(["--kubeconfig", "/host/admin.conf"])
            .arg("cordon")
            .arg("worker-1");
        assert_eq!(
            cmd.to_string(),
            "/usr/bin/kubectl --kubeconfig /host/admin.conf cordon worker-1"
        );
    }

    #[tokio::test]
    async fn success_and_nonzero_exit_are_distinct() {
        let ok = SystemRunner
            .run(&CommandSpec::new("true"), Duration::from_secs(5))
            .await;
        assert_eq!(ok, CommandOutcome::Succeeded);

        let failed = SystemRunner
            .run(
                &CommandSpec::new("sh").args(["-c", "echo nope >&2; exit 3"]),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(
            failed,
            CommandOutcome::Exited {
                code: Some(3),
                stderr: "nope".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let outcome = SystemRunner
            .run(
                &CommandSpec::new("/nonexistent/upsguard-test-binary"),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome, CommandOutcome::NotFound);
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let started = std::time::Instant::now();
        let outcome = SystemRunner
            .run(
                &CommandSpec::new("sleep").arg("30"),
                Duration::from_millis(200),
            )
            .await;
        assert!(matches!(outcome, CommandOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn dry_run_never_spawns() {
        let outcome = DryRunRunner
            .run(
                &CommandSpec::new("/nonexistent/upsguard-test-binary"),
                Duration::from_secs(1),
            )
            .await;
        assert!(outcome.is_success());
    }
}
