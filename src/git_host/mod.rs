//! GitHost (spec §4.G) — thin, scoped invoker of the `git` binary.
//!
//! Read-only inspection goes through `git2` (see [`status`]), mirroring the
//! teacher's `repo::git` module. Every operation that must trigger a
//! repository's hooks — add, commit, and the hook invocation itself — goes
//! through `std::process::Command` with an argv array, never a shell
//! string, because `git2`/libgit2 does not run hooks on commit (spec §9
//! redesign flag: "String-built shell commands. Replace every call with
//! argv-array spawn").

pub mod status;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::errors::CoreError;

pub use status::{read_status, RepoStatus};

static VALID_BRANCH_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap());

pub struct GitHost {
    repo_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitHost {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// `git init` plus a first empty commit, only if the directory isn't
    /// already a repository. Idempotent — safe to call on every write.
    pub async fn ensure_repo(&self) -> Result<()> {
        if self.repo_root.join(".git").exists() {
            return Ok(());
        }
        self.run(&["init"]).await?;
        self.run(&["config", "user.name", "gasmcpd"]).await?;
        self.run(&["config", "user.email", "gasmcpd@localhost"]).await?;
        self.run(&["commit", "--allow-empty", "-m", "initial commit"]).await?;
        Ok(())
    }

    /// Create (if absent) and check out a feature branch. Branch names are
    /// validated against a strict whitelist before ever reaching a spawned
    /// argv, and a leading `-` is rejected outright so the name can never be
    /// mistaken for a flag by `git` itself.
    pub async fn ensure_feature_branch(&self, name: &str) -> Result<()> {
        validate_branch_name(name)?;
        let exists = self
            .run(&["rev-parse", "--verify", &format!("refs/heads/{name}")])
            .await
            .map(|o| o.status_ok)
            .unwrap_or(false);
        if exists {
            self.run(&["checkout", name]).await?;
        } else {
            self.run(&["checkout", "-b", name]).await?;
        }
        Ok(())
    }

    pub async fn add(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args).await?;
        Ok(())
    }

    /// Commits staged changes. Git invokes `pre-commit`/`commit-msg` hooks
    /// itself as a side effect of this call — callers that need to read
    /// back hook-rewritten content should re-read the working tree after
    /// this returns, not before (spec §4.H step 4).
    pub async fn commit(&self, message: &str) -> Result<CommandOutput> {
        self.run(&["commit", "-m", message]).await
    }

    pub async fn status_porcelain(&self) -> Result<String> {
        let out = self.run(&["status", "--porcelain"]).await?;
        Ok(out.stdout)
    }

    pub async fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run(&["reset", "--hard", rev]).await?;
        Ok(())
    }

    pub async fn rev_parse_head(&self) -> Result<String> {
        let out = self.run(&["rev-parse", "HEAD"]).await?;
        Ok(out.stdout.trim().to_string())
    }

    pub async fn show_stat_head(&self) -> Result<String> {
        let out = self.run(&["show", "--stat", "HEAD"]).await?;
        Ok(out.stdout)
    }

    /// Read-only status via `git2` (see [`status::read_status`]).
    pub fn status(&self) -> Result<RepoStatus> {
        status::read_status(&self.repo_root)
    }

    /// Run the repository's `pre-commit` hook directly against the current
    /// index, outside of a real commit. Used by `GitOperationManager` to
    /// let a hook rewrite staged content before the orchestrator decides
    /// whether to proceed (spec §4.H step 3 "hook validate").
    pub async fn run_pre_commit_hook(&self) -> Result<Option<CommandOutput>> {
        let hook_path = self.hooks_dir().await?.join("pre-commit");
        if !is_executable(&hook_path) {
            return Ok(None);
        }
        let output = Command::new(&hook_path)
            .current_dir(&self.repo_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("spawning pre-commit hook at {}", hook_path.display()))?;
        let result = CommandOutput {
            status_ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if !result.status_ok {
            return Err(anyhow::anyhow!(CoreError::HookRejected {
                stderr: result.stderr,
            }));
        }
        Ok(Some(result))
    }

    async fn hooks_dir(&self) -> Result<PathBuf> {
        let out = self.run(&["config", "--get", "core.hooksPath"]).await;
        match out {
            Ok(o) if o.status_ok && !o.stdout.trim().is_empty() => {
                let configured = o.stdout.trim();
                let path = Path::new(configured);
                Ok(if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.repo_root.join(path)
                })
            }
            _ => Ok(self.repo_root.join(".git").join("hooks")),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        debug!(args = ?args, repo = %self.repo_root.display(), "spawning git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("spawning `git {}`", args.join(" ")))?;
        Ok(CommandOutput {
            status_ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') {
        bail!(CoreError::Validation(format!(
            "invalid branch name '{name}'"
        )));
    }
    if !VALID_BRANCH_NAME.is_match(name) {
        bail!(CoreError::Validation(format!(
            "branch name '{name}' contains disallowed characters"
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_repo_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let host = GitHost::new(dir.path().to_path_buf());
        host.ensure_repo().await.unwrap();
        host.ensure_repo().await.unwrap();
        assert!(dir.path().join(".git").exists());
    }

    #[tokio::test]
    async fn rev_parse_head_returns_a_sha_after_init() {
        let dir = tempfile::tempdir().unwrap();
        let host = GitHost::new(dir.path().to_path_buf());
        host.ensure_repo().await.unwrap();
        let sha = host.rev_parse_head().await.unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[tokio::test]
    async fn add_and_commit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let host = GitHost::new(dir.path().to_path_buf());
        host.ensure_repo().await.unwrap();
        tokio::fs::write(dir.path().join("a.js"), b"var x = 1;").await.unwrap();
        host.add(&["a.js".to_string()]).await.unwrap();
        let out = host.commit("add a.js").await.unwrap();
        assert!(out.status_ok);
        let stat = host.show_stat_head().await.unwrap();
        assert!(stat.contains("a.js"));
    }

    #[test]
    fn rejects_branch_names_starting_with_dash() {
        assert!(validate_branch_name("-x").is_err());
    }

    #[test]
    fn rejects_branch_names_with_shell_metacharacters() {
        assert!(validate_branch_name("feature; rm -rf /").is_err());
    }

    #[test]
    fn accepts_ordinary_branch_names() {
        assert!(validate_branch_name("mcp/edit-Code-20260101").is_ok());
    }

    #[tokio::test]
    async fn no_pre_commit_hook_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let host = GitHost::new(dir.path().to_path_buf());
        host.ensure_repo().await.unwrap();
        assert!(host.run_pre_commit_hook().await.unwrap().is_none());
    }
}
