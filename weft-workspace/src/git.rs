//! Git subprocess runner: combined stdout+stderr capture, loud vs quiet logging.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Error from one git invocation.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("spawn git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {args} timed out after {seconds}s")]
    Timeout { args: String, seconds: u64 },
    #[error("git {args} failed: {output}")]
    Exit { args: String, output: String },
}

impl GitError {
    /// Combined stdout+stderr of the failed command, when it ran at all.
    pub fn output(&self) -> &str {
        match self {
            Self::Exit { output, .. } => output,
            _ => "",
        }
    }
}

/// Runs `git <args>` in a directory, capturing stdout and stderr together.
///
/// "Loud" runs log the command and its combined output at `info`; quiet runs
/// at `debug`. The child inherits the process environment, so host-side
/// credentials (`GITHUB_TOKEN`, credential helpers) are available.
#[derive(Clone, Copy, Debug, Default)]
pub struct GitRunner;

impl GitRunner {
    pub fn new() -> Self {
        Self
    }

    /// Loud invocation with the default 60s timeout.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        self.run_with_timeout(dir, args, Duration::from_secs(60), true)
            .await
    }

    /// Quiet invocation with the default 60s timeout.
    pub async fn run_quiet(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        self.run_with_timeout(dir, args, Duration::from_secs(60), false)
            .await
    }

    /// Invocation with an explicit timeout. Network operations (push, fetch)
    /// use 2 minutes regardless of the caller's outer deadline.
    pub async fn run_with_timeout(
        &self,
        dir: &Path,
        args: &[&str],
        timeout: Duration,
        loud: bool,
    ) -> Result<String, GitError> {
        let args_str = args.join(" ");
        if loud {
            tracing::info!(dir = %dir.display(), args = %args_str, "git");
        } else {
            tracing::debug!(dir = %dir.display(), args = %args_str, "git");
        }

        let child = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GitError::Spawn {
                args: args_str.clone(),
                source,
            })?;

        let out = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(source)) => {
                return Err(GitError::Spawn {
                    args: args_str,
                    source,
                })
            }
            Err(_) => {
                return Err(GitError::Timeout {
                    args: args_str,
                    seconds: timeout.as_secs(),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));

        if loud && !combined.trim().is_empty() {
            tracing::info!(args = %args_str, output = %combined.trim(), "git output");
        } else if !combined.trim().is_empty() {
            tracing::debug!(args = %args_str, output = %combined.trim(), "git output");
        }

        if out.status.success() {
            Ok(combined)
        } else {
            Err(GitError::Exit {
                args: args_str,
                output: combined,
            })
        }
    }
}
