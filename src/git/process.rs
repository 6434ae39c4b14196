use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{FetchOptions, FetchedTree, GitFetcher, redact_url};
use crate::error::{Error, Result};

const KILL_GRACE: Duration = Duration::from_secs(5);

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Drives the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitCommandFetcher {
    git: PathBuf,
}

impl Default for GitCommandFetcher {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }
}

impl GitCommandFetcher {
    #[must_use]
    pub fn new(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    /// Runs git to completion. The child is supervised on its own task, so
    /// dropping this future still ends it with SIGTERM, then SIGKILL.
    async fn run(
        &self,
        args: Vec<OsString>,
        timeout: Duration,
        cancel: &CancellationToken,
        what: &str,
    ) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.git)
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::UpstreamUnavailable(format!("failed to spawn git: {e}")))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let cancel = cancel.clone();
        let supervisor = tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => Outcome::Exited(status),
                () = tokio::time::sleep(timeout) => Outcome::TimedOut,
                () = cancel.cancelled() => Outcome::Cancelled,
            };
            if matches!(outcome, Outcome::TimedOut | Outcome::Cancelled) {
                terminate(&mut child).await;
            }
            outcome
        });

        let outcome = supervisor
            .await
            .map_err(|e| Error::Internal(format!("{what} supervisor failed: {e}")))?;

        match outcome {
            Outcome::Exited(Ok(status)) if status.success() => {
                Ok(stdout.await.unwrap_or_default())
            }
            Outcome::Exited(Ok(status)) => {
                let stderr = stderr.await.unwrap_or_default();
                Err(Error::UpstreamUnavailable(format!(
                    "{what} failed ({status}): {}",
                    String::from_utf8_lossy(&stderr).trim()
                )))
            }
            Outcome::Exited(Err(e)) => {
                Err(Error::UpstreamUnavailable(format!("{what} failed: {e}")))
            }
            Outcome::TimedOut => Err(Error::UpstreamUnavailable(format!(
                "{what} timed out after {}ms",
                timeout.as_millis()
            ))),
            Outcome::Cancelled => Err(Error::UpstreamUnavailable(format!("{what} cancelled"))),
        }
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// SIGTERM, then SIGKILL once the grace period runs out.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: pid belongs to a child we spawned and have not reaped yet.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill git process");
    }
}

fn parse_ls_remote(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, reference)| reference.strip_prefix("refs/tags/"))
        .map(String::from)
        .collect()
}

fn head_commit(dest: &Path) -> Result<String> {
    let repo = git2::Repository::open(dest)
        .map_err(|e| Error::UpstreamUnavailable(format!("cloned repository unreadable: {e}")))?;
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| Error::UpstreamUnavailable(format!("cannot resolve HEAD: {e}")))?;
    Ok(commit.id().to_string())
}

#[async_trait]
impl GitFetcher for GitCommandFetcher {
    async fn list_tags(
        &self,
        url: &str,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        debug!(url = %redact_url(url), "listing remote tags");
        let args = ["ls-remote", "--tags", "--refs", "--", url]
            .into_iter()
            .map(OsString::from)
            .collect();
        let stdout = self
            .run(args, options.clone_timeout, cancel, "git ls-remote")
            .await?;
        Ok(parse_ls_remote(&String::from_utf8_lossy(&stdout)))
    }

    async fn clone_at_tag(
        &self,
        url: &str,
        tag: &str,
        dest: &Path,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<FetchedTree> {
        debug!(url = %redact_url(url), tag, shallow = !options.need_tags, "cloning");

        let mut args: Vec<OsString> = vec!["clone".into(), "--quiet".into()];
        if options.need_tags {
            args.push("--no-checkout".into());
        } else {
            args.extend(["--depth", "1", "--single-branch", "--branch", tag].map(OsString::from));
        }
        args.extend(["--".into(), url.into(), dest.as_os_str().to_os_string()]);
        self.run(args, options.clone_timeout, cancel, "git clone").await?;

        if options.need_tags {
            let mut args: Vec<OsString> = vec!["-C".into(), dest.as_os_str().to_os_string()];
            args.extend(["checkout", "--quiet", "--detach", tag].map(OsString::from));
            self.run(args, options.checkout_timeout, cancel, "git checkout")
                .await?;
        }

        let dest = dest.to_path_buf();
        let commit_sha = tokio::task::spawn_blocking(move || head_commit(&dest))
            .await
            .map_err(|e| Error::Internal(format!("commit lookup task failed: {e}")))??;

        Ok(FetchedTree { commit_sha })
    }
}
