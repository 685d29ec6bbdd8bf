//! FileOperationStrategy + GitOperationManager (spec §4.H) — every write
//! tool (edit/aider/cp/mv/rm/write) computes its changes through a
//! `FileOperationStrategy`; `GitOperationManager` is the single place that
//! turns those changes into a safe, hook-respecting, rollback-capable
//! remote write.

pub mod aider;
pub mod copy;
pub mod delete;
pub mod edit;
pub mod mv;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::commonjs_shim::{EXEC_BOOTSTRAP_FILE_NAME, SHIM_FILE_NAME};
use crate::errors::CoreError;
use crate::gas_api::{GasApi, GasFile};
use crate::git_host::GitHost;
use crate::local_mirror::LocalMirror;
use crate::lock_manager::LockManager;
use crate::module_wrapper::ModuleWrapper;
use crate::path_resolver::{GasFileType, PathResolver};

/// One file's desired end state after a strategy runs. `new_content: None`
/// means "delete this file".
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub rel_path: String,
    pub new_content: Option<Vec<u8>>,
}

impl FileChange {
    pub fn write(rel_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            rel_path: rel_path.into(),
            new_content: Some(content.into()),
        }
    }

    pub fn delete(rel_path: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            new_content: None,
        }
    }
}

/// Shared, read-only context a strategy needs to compute its changes. Kept
/// separate from `GitOperationManager` so `compute_changes` stays pure and
/// testable without a lock, a git repo, or a GasApi.
pub struct StrategyContext<'a> {
    pub mirror: &'a LocalMirror,
    pub similarity_threshold: f64,
}

#[async_trait]
pub trait FileOperationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute the file changes this operation requires. Pure with respect
    /// to the remote and to git: reads only through `ctx.mirror`, never
    /// writes.
    async fn compute_changes(&self, ctx: &StrategyContext<'_>) -> Result<Vec<FileChange>>;

    fn describe(&self) -> String {
        self.name().to_string()
    }
}

/// Orchestrates one write tool call end-to-end (spec §4.H):
/// 1. acquire the project lock
/// 2. compute changes (pure)
/// 3. stage them into the local mirror + git index
/// 4. run `pre-commit`; if it rewrites staged files, re-read canonical bytes
/// 5. push the (possibly hook-rewritten) bytes to the remote via `GasApi`
/// 6. commit
/// 7. on any failure from step 5 onward, roll back local + best-effort
///    remote state to what it was before step 3
pub struct GitOperationManager {
    mirror: Arc<LocalMirror>,
    git: Arc<GitHost>,
    gas_api: Arc<dyn GasApi>,
    lock_manager: Arc<LockManager>,
    script_id: String,
    hooks_enabled: bool,
    similarity_threshold: f64,
}

#[derive(Debug)]
pub struct ApplyReport {
    pub changed_paths: Vec<String>,
    pub commit_sha: String,
    pub hook_rewrote: bool,
}

/// `push_to_remote`'s failure mode: the underlying error, plus every GAS
/// file name it had already written before hitting it (in push order).
struct PushFailure {
    err: anyhow::Error,
    written: Vec<String>,
}

impl GitOperationManager {
    pub fn new(
        mirror: Arc<LocalMirror>,
        git: Arc<GitHost>,
        gas_api: Arc<dyn GasApi>,
        lock_manager: Arc<LockManager>,
        script_id: String,
    ) -> Self {
        Self {
            mirror,
            git,
            gas_api,
            lock_manager,
            script_id,
            hooks_enabled: true,
            similarity_threshold: 0.8,
        }
    }

    /// `hooks_enabled: false` (spec §10.2 `gasmcp.toml` field) skips the
    /// pre-commit hook step entirely instead of just finding no executable
    /// hook to run.
    pub fn with_hooks_enabled(mut self, hooks_enabled: bool) -> Self {
        self.hooks_enabled = hooks_enabled;
        self
    }

    /// Overrides the aider fuzzy-match acceptance threshold (spec §4.H
    /// "Aider" default 0.8, tunable via `gasmcp.toml`).
    pub fn with_similarity_threshold(mut self, similarity_threshold: f64) -> Self {
        self.similarity_threshold = similarity_threshold;
        self
    }

    pub async fn apply(
        &self,
        strategy: &dyn FileOperationStrategy,
        tool_name: &str,
    ) -> Result<ApplyReport> {
        self.apply_full(strategy, tool_name, false, None, None).await
    }

    /// Like [`Self::apply`], but every touched file's bytes are pushed to
    /// the remote verbatim — no wrap, regardless of file type or name (spec
    /// §6 "raw-variant tools bypass wrap/unwrap"). Intended for callers
    /// writing system files outside the usual user-module surface.
    pub async fn apply_raw(
        &self,
        strategy: &dyn FileOperationStrategy,
        tool_name: &str,
    ) -> Result<ApplyReport> {
        self.apply_full(strategy, tool_name, true, None, None).await
    }

    /// Like [`Self::apply`], but `opts` overrides whatever `moduleOptions`
    /// would otherwise be recovered from the remote's existing copy (spec
    /// §6 `write`'s `moduleOptions` field). Used when a caller explicitly
    /// sets `loadNow`/hoisted functions/an explicit module name on write,
    /// rather than preserving whatever the file already had.
    pub async fn apply_with_options(
        &self,
        strategy: &dyn FileOperationStrategy,
        tool_name: &str,
        opts: crate::module_wrapper::ModuleOptions,
    ) -> Result<ApplyReport> {
        self.apply_full(strategy, tool_name, false, Some(opts), None).await
    }

    /// Like [`Self::apply`], but names the feature branch after an explicit
    /// caller-supplied `changeReason` (spec §6 `write`'s `changeReason`
    /// field) rather than the tool name alone.
    pub async fn apply_with_reason(
        &self,
        strategy: &dyn FileOperationStrategy,
        tool_name: &str,
        change_reason: Option<&str>,
    ) -> Result<ApplyReport> {
        self.apply_full(strategy, tool_name, false, None, change_reason).await
    }

    /// Combines [`Self::apply_with_options`] and [`Self::apply_with_reason`]
    /// for callers (the `write` tool) whose schema allows `moduleOptions`
    /// and `changeReason` in the same call.
    pub async fn apply_with_options_and_reason(
        &self,
        strategy: &dyn FileOperationStrategy,
        tool_name: &str,
        opts: Option<crate::module_wrapper::ModuleOptions>,
        change_reason: Option<&str>,
    ) -> Result<ApplyReport> {
        self.apply_full(strategy, tool_name, false, opts, change_reason).await
    }

    async fn apply_full(
        &self,
        strategy: &dyn FileOperationStrategy,
        tool_name: &str,
        raw: bool,
        explicit_opts: Option<crate::module_wrapper::ModuleOptions>,
        change_reason: Option<&str>,
    ) -> Result<ApplyReport> {
        let project_root = self.mirror.root().to_path_buf();

        self.lock_manager
            .with_lock(&project_root, tool_name, strategy.name(), || {
                self.apply_locked(strategy, &project_root, raw, explicit_opts.as_ref(), tool_name, change_reason)
            })
            .await
    }

    async fn apply_locked(
        &self,
        strategy: &dyn FileOperationStrategy,
        project_root: &std::path::Path,
        raw: bool,
        explicit_opts: Option<&crate::module_wrapper::ModuleOptions>,
        tool_name: &str,
        change_reason: Option<&str>,
    ) -> Result<ApplyReport> {
        let script_id = self.script_id.as_str();
        self.git.ensure_repo().await?;
        let branch_name = feature_branch_name(change_reason.unwrap_or(tool_name));
        self.git.ensure_feature_branch(&branch_name).await?;
        let pre_head = self.git.rev_parse_head().await?;

        let ctx = StrategyContext {
            mirror: &self.mirror,
            similarity_threshold: self.similarity_threshold,
        };
        let changes = strategy.compute_changes(&ctx).await?;
        if changes.is_empty() {
            return Err(anyhow!(CoreError::Validation(
                "operation produced no changes".to_string()
            )));
        }

        // Step: stage.
        let mut touched = Vec::new();
        for change in &changes {
            match &change.new_content {
                Some(bytes) => {
                    self.mirror.write(&change.rel_path, bytes).await?;
                }
                None => {
                    self.mirror.delete(&change.rel_path).await?;
                }
            }
            touched.push(change.rel_path.clone());
        }
        self.git.add(&touched).await?;

        // Step: hook validate. A hook may rewrite staged files in place;
        // compare each touched file's bytes before and after the hook runs
        // to tell "hook ran, left everything alone" from "hook ran and
        // rewrote content" (spec §4.H step 5 distinguishes the two; a hook
        // that merely lints and exits 0 must not be reported as having
        // modified anything).
        let pre_hook_bytes = self.read_touched(&touched).await?;
        let hook_ran = if self.hooks_enabled {
            match self.git.run_pre_commit_hook().await {
                Ok(outcome) => outcome.is_some(),
                Err(e) => {
                    self.rollback(project_root, &pre_head, &touched).await.ok();
                    return Err(e);
                }
            }
        } else {
            false
        };
        let hook_rewrote = if hook_ran {
            let post_hook_bytes = self.read_touched(&touched).await?;
            post_hook_bytes != pre_hook_bytes
        } else {
            false
        };

        let final_bytes = self.read_touched(&touched).await?;

        // Step: remote write. `push_to_remote` pushes each touched file in
        // order and reports, on failure, exactly which destinations it had
        // already written (spec §4.H step 6 "attempt compensating updates
        // for every already-written destination").
        let prior_remote = self.snapshot_remote_prior(script_id, &final_bytes).await?;
        if let Err(failure) = self.push_to_remote(script_id, &final_bytes, raw, explicit_opts).await {
            warn!("remote write failed, compensating and rolling back: {:#}", failure.err);
            let compensation = self.compensate_remote(script_id, &prior_remote, &failure.written).await;
            self.rollback(project_root, &pre_head, &touched).await?;
            return Err(match compensation {
                Ok(()) => failure.err,
                Err(divergent_files) => anyhow!(CoreError::RollbackIncomplete {
                    divergent_files,
                    cause: Some(format!("{:#}", failure.err)),
                }),
            });
        }
        if let Err(e) = self.enforce_load_order(script_id).await {
            warn!("load-order enforcement failed, rolling back: {e:#}");
            self.rollback(project_root, &pre_head, &touched).await?;
            return Err(e);
        }

        // Step: commit (hooks already ran above; this commit targets the
        // post-hook tree, so re-stage anything the hook rewrote).
        self.git.add(&touched).await?;
        let message = format!("{}: {}", strategy.name(), strategy.describe());
        let commit_result = self.git.commit(&message).await;
        let commit_sha = match commit_result {
            Ok(out) if out.status_ok => self.git.rev_parse_head().await?,
            Ok(out) => {
                warn!("commit failed, rolling back: {}", out.stderr);
                self.rollback(project_root, &pre_head, &touched).await?;
                return Err(anyhow!(CoreError::Internal(format!(
                    "git commit failed: {}",
                    out.stderr
                ))));
            }
            Err(e) => {
                self.rollback(project_root, &pre_head, &touched).await?;
                return Err(e);
            }
        };

        info!(tool = strategy.name(), commit_sha, "applied write operation");
        Ok(ApplyReport {
            changed_paths: touched,
            commit_sha,
            hook_rewrote,
        })
    }

    /// Snapshots each touched path's current on-disk bytes (`None` if the
    /// path doesn't exist, e.g. a staged deletion), for before/after
    /// comparison around the pre-commit hook.
    async fn read_touched(&self, touched: &[String]) -> Result<Vec<(String, Option<Vec<u8>>)>> {
        let mut out = Vec::with_capacity(touched.len());
        for path in touched {
            let bytes = if self.mirror.exists(path).await {
                Some(self.mirror.read(path).await?)
            } else {
                None
            };
            out.push((path.clone(), bytes));
        }
        Ok(out)
    }

    /// Captures each touched path's current remote state before
    /// `push_to_remote` runs, so a failure partway through a multi-file
    /// strategy (e.g. `mv` = write destination, then delete source) has
    /// something to restore the already-written destinations to (spec
    /// §4.H step 6).
    async fn snapshot_remote_prior(
        &self,
        script_id: &str,
        files: &[(String, Option<Vec<u8>>)],
    ) -> Result<Vec<(String, Option<GasFile>)>> {
        let mut out = Vec::with_capacity(files.len());
        for (rel_path, _) in files {
            let name = PathResolver::local_to_gas(rel_path)
                .map(|(name, _)| name)
                .unwrap_or_else(|_| rel_path.clone());
            let prior = self.gas_api.get_file(script_id, &name).await?;
            out.push((name, prior));
        }
        Ok(out)
    }

    /// Best-effort compensation for a partially-applied multi-file remote
    /// write: for every GAS file name `push_to_remote` actually wrote
    /// before failing, restore it to the state `snapshot_remote_prior`
    /// captured (re-`updateFile` if it existed before, `deleteFile` if the
    /// push created it from nothing). Returns the names that couldn't be
    /// restored, if any (spec §4.H step 6 "if compensating updates
    /// themselves fail, surface a compound error").
    async fn compensate_remote(
        &self,
        script_id: &str,
        prior: &[(String, Option<GasFile>)],
        written: &[String],
    ) -> std::result::Result<(), Vec<String>> {
        let mut divergent = Vec::new();
        for name in written {
            let prior_state = prior.iter().find(|(n, _)| n == name).map(|(_, state)| state);
            let restore_result = match prior_state {
                Some(Some(file)) => self
                    .gas_api
                    .update_file(script_id, name, file.file_type, &file.source)
                    .await
                    .map(|_| ()),
                Some(None) => self.gas_api.delete_file(script_id, name).await,
                None => Ok(()),
            };
            if let Err(e) = restore_result {
                warn!("compensating restore of '{name}' also failed: {e:#}");
                divergent.push(name.clone());
            }
        }
        if divergent.is_empty() {
            Ok(())
        } else {
            Err(divergent)
        }
    }

    /// Pushes each touched file's final local bytes to the remote project.
    /// User SERVER_JS files are wrapped before they leave the host (spec §6
    /// "SERVER_JS over the wire is the wrapped form, always"); the shim and
    /// exec bootstrap are system files written verbatim. Prior
    /// `moduleOptions` are recovered from the remote's current wrapped copy
    /// so an edit that only ever sees the unwrapped body doesn't silently
    /// drop them (spec §4.C "Preservation across edits"). On failure,
    /// reports exactly which GAS file names were already written so the
    /// caller can compensate.
    async fn push_to_remote(
        &self,
        script_id: &str,
        files: &[(String, Option<Vec<u8>>)],
        raw: bool,
        explicit_opts: Option<&crate::module_wrapper::ModuleOptions>,
    ) -> std::result::Result<(), PushFailure> {
        let mut written = Vec::with_capacity(files.len());
        for (rel_path, bytes) in files {
            let (name, file_type) = PathResolver::local_to_gas(rel_path)
                .unwrap_or_else(|_| (rel_path.clone(), GasFileType::ServerJs));
            let result = self
                .push_one(script_id, &name, file_type, bytes.as_deref(), raw, explicit_opts)
                .await;
            match result {
                Ok(()) => written.push(name),
                Err(err) => return Err(PushFailure { err, written }),
            }
        }
        Ok(())
    }

    async fn push_one(
        &self,
        script_id: &str,
        name: &str,
        file_type: GasFileType,
        bytes: Option<&[u8]>,
        raw: bool,
        explicit_opts: Option<&crate::module_wrapper::ModuleOptions>,
    ) -> Result<()> {
        match bytes {
            Some(bytes) => {
                let body = String::from_utf8_lossy(bytes).to_string();
                let source = if file_type == GasFileType::ServerJs && !raw && !is_system_module(name) {
                    let mut opts = match explicit_opts {
                        Some(opts) => opts.clone(),
                        None => match self.gas_api.get_file(script_id, name).await? {
                            Some(existing) => ModuleWrapper::extract_options(&existing.source),
                            None => Default::default(),
                        },
                    };
                    // GAS gives the shim no way to introspect "which file
                    // is this" at runtime, so the module self-registers
                    // under its own GAS logical name unless the caller
                    // already asked for a different one.
                    opts.explicit_name.get_or_insert_with(|| name.to_string());
                    ModuleWrapper::wrap(&body, &opts)
                } else {
                    body
                };
                self.gas_api.update_file(script_id, name, file_type, &source).await?;
            }
            None => {
                self.gas_api.delete_file(script_id, name).await?;
            }
        }
        Ok(())
    }

    /// Re-asserts the shim/exec-bootstrap leading order (spec §4.B "File
    /// load order matters") after any write that may have introduced a new
    /// file or otherwise perturbed the remote's execution order. A no-op
    /// for projects that haven't had the shim installed yet — bootstrap is
    /// a separate, explicit step, not an implicit side effect of every
    /// write.
    async fn enforce_load_order(&self, script_id: &str) -> Result<()> {
        let current: Vec<String> = self
            .gas_api
            .list_content(script_id)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        let shim_installed = [EXEC_BOOTSTRAP_FILE_NAME, SHIM_FILE_NAME]
            .iter()
            .all(|name| current.iter().any(|n| n == name));
        if !shim_installed {
            return Ok(());
        }
        if let Some(desired) = crate::commonjs_shim::enforce_load_order(&current) {
            self.gas_api.reorder(script_id, &desired).await?;
        }
        Ok(())
    }

    /// Resets the working tree to the pre-operation commit. Remote
    /// compensation happens separately, in `compensate_remote`, before this
    /// runs — this only undoes the local stage. If even that fails, it
    /// surfaces as `RollbackIncomplete` naming every file whose local (and
    /// possibly remote) state may now be divergent (spec §4.H step 8).
    async fn rollback(
        &self,
        _project_root: &std::path::Path,
        pre_head: &str,
        touched: &[String],
    ) -> Result<()> {
        match self.git.reset_hard(pre_head).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("local rollback itself failed: {e:#}");
                Err(anyhow!(CoreError::RollbackIncomplete {
                    divergent_files: touched.to_vec(),
                    cause: None,
                }))
            }
        }
    }
}

fn is_system_module(gas_name: &str) -> bool {
    gas_name == SHIM_FILE_NAME || gas_name == EXEC_BOOTSTRAP_FILE_NAME
}

/// Derives a branch name for `GitHost::ensure_feature_branch` (spec §4.H
/// step 2) from a tool name or caller-supplied change reason. Slugifies to
/// the character set `ensure_feature_branch` accepts and appends a
/// millisecond timestamp so repeated calls with the same reason don't
/// collide on an existing branch from a prior, already-merged change.
fn feature_branch_name(reason: &str) -> String {
    let slug: String = reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "change" } else { slug };
    format!("mcp/{}-{}", slug, chrono::Utc::now().format("%Y%m%d%H%M%S%3f"))
}
