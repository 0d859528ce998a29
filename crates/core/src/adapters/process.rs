use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.status.success()
  }

  /// Exit code, or -1 when the process was terminated by a signal.
  pub fn code(&self) -> i32 {
    self.status.code().unwrap_or(-1)
  }
}

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
  #[error("{program} {args} exited with status {status}: {stderr}")]
  Failed {
    program: String,
    args: String,
    status: ExitStatus,
    stderr: String,
  },
  #[error("`{command}` timed out after {}s", .timeout.as_secs())]
  TimedOut { command: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Run `program` with `args` in `cwd`, capturing stdout/stderr. A non-zero exit is not an
/// error here; use [`run_checked`] for that.
pub async fn run(
  program: &str,
  args: &[&str],
  cwd: &Path,
  env: &[(&str, &str)],
) -> Result<CommandOutput> {
  let mut cmd = Command::new(program);
  cmd
    .current_dir(cwd)
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  for (key, value) in env {
    cmd.env(key, value);
  }
  debug!(event = "command_spawn", program, args = %args.join(" "), cwd = %cwd.display());
  let out = cmd.output().await.map_err(|source| CommandError::Spawn {
    program: program.to_string(),
    source,
  })?;
  Ok(CommandOutput {
    status: out.status,
    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
  })
}

/// Like [`run`] but rejects on a non-zero exit status.
pub async fn run_checked(
  program: &str,
  args: &[&str],
  cwd: &Path,
  env: &[(&str, &str)],
) -> Result<CommandOutput> {
  let out = run(program, args, cwd, env).await?;
  if !out.success() {
    return Err(CommandError::Failed {
      program: program.to_string(),
      args: args.join(" "),
      status: out.status,
      stderr: out.stderr.trim().to_string(),
    });
  }
  Ok(out)
}

/// Run a shell command line via `sh -c` in `cwd`. The child is killed once `timeout` elapses.
pub async fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput> {
  match tokio::time::timeout(timeout, run("sh", &["-c", command], cwd, &[])).await {
    Ok(res) => res,
    Err(_) => {
      warn!(event = "command_timeout", command, timeout_secs = timeout.as_secs());
      Err(CommandError::TimedOut {
        command: command.to_string(),
        timeout,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn captures_stdout_and_stderr() {
    let td = tempfile::tempdir().unwrap();
    let out = run("sh", &["-c", "echo out; echo err 1>&2"], td.path(), &[])
      .await
      .expect("run sh");
    assert!(out.success());
    assert_eq!(out.stdout.trim(), "out");
    assert_eq!(out.stderr.trim(), "err");
  }

  #[tokio::test]
  async fn checked_rejects_non_zero_exit() {
    let td = tempfile::tempdir().unwrap();
    let err = run_checked("sh", &["-c", "echo nope 1>&2; exit 3"], td.path(), &[])
      .await
      .unwrap_err();
    match err {
      CommandError::Failed { stderr, status, .. } => {
        assert_eq!(stderr, "nope");
        assert_eq!(status.code(), Some(3));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn passes_environment() {
    let td = tempfile::tempdir().unwrap();
    let out = run("sh", &["-c", "printf %s \"$WEFT_X\""], td.path(), &[("WEFT_X", "42")])
      .await
      .unwrap();
    assert_eq!(out.stdout, "42");
  }

  #[tokio::test]
  async fn missing_program_is_a_spawn_error() {
    let td = tempfile::tempdir().unwrap();
    let err = run("weft-definitely-not-a-binary", &[], td.path(), &[])
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Spawn { .. }));
  }

  #[tokio::test]
  async fn shell_timeout_is_reported() {
    let td = tempfile::tempdir().unwrap();
    let err = run_shell("sleep 5", td.path(), Duration::from_millis(100))
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::TimedOut { .. }));
  }

  #[tokio::test]
  async fn shell_reports_exit_code() {
    let td = tempfile::tempdir().unwrap();
    let out = run_shell("exit 7", td.path(), Duration::from_secs(5))
      .await
      .unwrap();
    assert_eq!(out.code(), 7);
  }
}
