//! `GasMcpServer` — routes `tools/list`/`tools/call` to the rest of the
//! crate. Per-project state (`LocalMirror`, `GitHost`, `GitOperationManager`,
//! `DeploymentManager`, `RsyncEngine`) is constructed fresh for each call
//! rather than cached on the server: several of those types borrow `GasApi`/
//! `LocalMirror` by reference (spec §4.E/§4.I/§4.J), so there is nowhere to
//! store a long-lived instance without also storing the borrow's target.
//! Only the things genuinely shared across every call — config, the `GasApi`
//! handle, and the project lock table — live on the server itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::analyzer;
use crate::config::GasMcpConfig;
use crate::deployment::{DeploymentManager, DeploymentPriorStore, Environment};
use crate::errors::{self, CoreError};
use crate::gas_api::GasApi;
use crate::git_host::GitHost;
use crate::hashing;
use crate::local_mirror::LocalMirror;
use crate::lock_manager::LockManager;
use crate::module_wrapper::{ModuleOptions, ModuleWrapper};
use crate::path_resolver::{GasFileType, PathResolver};
use crate::rsync_engine::{Direction, IncludeExcludeGlobs, RsyncEngine};
use crate::strategy::aider::{AiderEdit, AiderStrategy};
use crate::strategy::copy::CopyStrategy;
use crate::strategy::delete::DeleteStrategy;
use crate::strategy::edit::EditStrategy;
use crate::strategy::mv::MoveStrategy;
use crate::strategy::write::WriteStrategy;
use crate::strategy::{ApplyReport, FileOperationStrategy, GitOperationManager, StrategyContext};

use super::tools::dispatch_support::{opt_bool, opt_str, str_arg, str_array};
use super::tools::handle_tools_list;
use super::transport::{McpError, McpTransportHandler, MCP_INVALID_PARAMS, MCP_METHOD_NOT_FOUND};

pub struct GasMcpServer {
    config: GasMcpConfig,
    gas_api: Arc<dyn GasApi>,
    lock_manager: Arc<LockManager>,
    /// Lives for the server's whole process lifetime, unlike the
    /// per-call `DeploymentManager` itself — a `rollback` needs to see the
    /// prior recorded by an earlier, separate `promote` call (spec §4.J).
    deployment_priors: Arc<DeploymentPriorStore>,
}

impl GasMcpServer {
    pub fn new(config: GasMcpConfig, gas_api: Arc<dyn GasApi>) -> Self {
        let lock_manager = Arc::new(LockManager::new(Duration::from_secs(config.lock_timeout_secs)));
        Self {
            config,
            gas_api,
            lock_manager,
            deployment_priors: Arc::new(DeploymentPriorStore::new()),
        }
    }

    /// Ensures `<repos-root>/project-<scriptId>/` exists, then hands back a
    /// fresh `LocalMirror`/`GitHost` pair scoped to it.
    async fn project_handles(&self, script_id: &str) -> Result<(Arc<LocalMirror>, Arc<GitHost>)> {
        let project_dir = self.config.project_dir(script_id);
        tokio::fs::create_dir_all(&project_dir).await?;
        Ok((
            Arc::new(LocalMirror::new(project_dir.clone())),
            Arc::new(GitHost::new(project_dir)),
        ))
    }

    fn git_manager(&self, mirror: Arc<LocalMirror>, git: Arc<GitHost>, script_id: &str) -> GitOperationManager {
        GitOperationManager::new(mirror, git, self.gas_api.clone(), self.lock_manager.clone(), script_id.to_string())
            .with_hooks_enabled(self.config.hooks_enabled)
            .with_similarity_threshold(self.config.similarity_threshold)
    }

    async fn dispatch_tool(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            "cat" => self.tool_cat(&args).await,
            "write" => self.tool_write(&args).await,
            "edit" => self.tool_edit(&args).await,
            "aider" => self.tool_aider(&args).await,
            "cp" => self.tool_cp(&args).await,
            "mv" => self.tool_mv(&args).await,
            "rm" => self.tool_rm(&args).await,
            "ls" => self.tool_ls(&args).await,
            "file_status" => self.tool_file_status(&args).await,
            "rsync" => self.tool_rsync(&args).await,
            "exec" => self.tool_exec(&args).await,
            "deploy" => self.tool_deploy(&args).await,
            other => Err(anyhow!(CoreError::Validation(format!("unknown tool '{other}'")))),
        }
    }

    /// Reads a file's current body: local mirror if present, else fetched
    /// from the remote project and cached locally (spec §4.D fast-path
    /// read). SERVER_JS is unwrapped before it's returned or cached, unless
    /// `raw` asks for the on-wire form.
    async fn tool_cat(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let path = str_arg(args, "path")?;
        let raw = opt_bool(args, "raw", false);

        let (mirror, _git) = self.project_handles(script_id).await?;
        let content = if mirror.exists(path).await {
            mirror.read_to_string(path).await?
        } else {
            let (name, file_type) = PathResolver::local_to_gas(path)?;
            let file = self
                .gas_api
                .get_file(script_id, &name)
                .await?
                .ok_or_else(|| anyhow!(CoreError::NotFound(format!("'{path}' does not exist in project '{script_id}'"))))?;
            let body = if file_type == GasFileType::ServerJs && !raw {
                ModuleWrapper::unwrap(&file.source)
            } else {
                file.source.clone()
            };
            mirror.write(path, body.as_bytes()).await?;
            mirror.set_metadata(path, file.update_time, file_type).await?;
            body
        };
        Ok(json!({ "path": path, "content": content }))
    }

    async fn tool_write(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let path = str_arg(args, "path")?;
        let content = str_arg(args, "content")?;
        let raw = opt_bool(args, "raw", false);
        let change_reason = opt_str(args, "changeReason");
        let module_options: Option<ModuleOptions> = match args.get("moduleOptions") {
            Some(v) if !v.is_null() => Some(serde_json::from_value(v.clone())?),
            _ => None,
        };

        let (mirror, git) = self.project_handles(script_id).await?;
        let manager = self.git_manager(mirror, git, script_id);
        let strategy = WriteStrategy::new(path.to_string(), content.as_bytes().to_vec());

        let report = if raw {
            manager.apply_raw(&strategy, "write").await?
        } else {
            manager
                .apply_with_options_and_reason(&strategy, "write", module_options.clone(), change_reason)
                .await?
        };
        let mut out = report_to_json(&report);
        if !raw {
            let warnings = write_warnings(path, content, module_options.as_ref());
            if !warnings.is_empty() {
                out["warnings"] = json!(warnings);
            }
        }
        Ok(out)
    }

    async fn tool_edit(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let path = str_arg(args, "path")?;
        let search = str_arg(args, "searchText")?;
        let replace = str_arg(args, "replaceText")?;
        let replace_all = opt_bool(args, "replaceAll", false);
        let raw = opt_bool(args, "raw", false);
        let change_reason = opt_str(args, "changeReason");

        let (mirror, git) = self.project_handles(script_id).await?;
        let manager = self.git_manager(mirror, git, script_id);
        let strategy = EditStrategy::new(path.to_string(), search.to_string(), replace.to_string(), replace_all);

        let report = if raw {
            manager.apply_raw(&strategy, "edit").await?
        } else {
            manager.apply_with_reason(&strategy, "edit", change_reason).await?
        };
        Ok(report_to_json(&report))
    }

    /// `edits` may name more than one file; each distinct path is applied
    /// (and committed) as its own operation, since `AiderStrategy` targets a
    /// single file (spec §6 `aider`: "a batch tolerant of minor drift").
    async fn tool_aider(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let edits_val = args.get("edits").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let dry_run = opt_bool(args, "dryRun", false);
        if edits_val.is_empty() {
            return Err(anyhow!(CoreError::Validation("edits must not be empty".to_string())));
        }

        let mut by_path: HashMap<String, Vec<AiderEdit>> = HashMap::new();
        let mut threshold_override = None;
        for edit in &edits_val {
            let path = edit
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!(CoreError::Validation("aider edit missing 'path'".to_string())))?;
            let search = edit
                .get("searchText")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!(CoreError::Validation("aider edit missing 'searchText'".to_string())))?;
            let replace = edit
                .get("replaceText")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!(CoreError::Validation("aider edit missing 'replaceText'".to_string())))?;
            if let Some(t) = edit.get("similarityThreshold").and_then(|v| v.as_f64()) {
                threshold_override = Some(t);
            }
            by_path.entry(path.to_string()).or_default().push(AiderEdit {
                search: search.to_string(),
                replace: replace.to_string(),
            });
        }

        let (mirror, git) = self.project_handles(script_id).await?;
        let threshold = threshold_override.unwrap_or(self.config.similarity_threshold);

        if dry_run {
            let ctx = StrategyContext {
                mirror: &mirror,
                similarity_threshold: threshold,
            };
            let mut previews = Vec::new();
            for (path, edits) in &by_path {
                let strategy = AiderStrategy::new(path.clone(), edits.clone());
                let changes = strategy.compute_changes(&ctx).await?;
                previews.push(json!({ "path": path, "hunksApplied": changes.len() }));
            }
            return Ok(json!({ "dryRun": true, "previews": previews }));
        }

        let manager = self.git_manager(mirror, git, script_id).with_similarity_threshold(threshold);
        let mut changed_paths = Vec::new();
        let mut commit_sha = String::new();
        let mut hook_rewrote = false;
        for (path, edits) in by_path {
            let strategy = AiderStrategy::new(path, edits);
            let report = manager.apply(&strategy, "aider").await?;
            changed_paths.extend(report.changed_paths);
            commit_sha = report.commit_sha;
            hook_rewrote = hook_rewrote || report.hook_rewrote;
        }
        Ok(json!({ "changedPaths": changed_paths, "commitSha": commit_sha, "hookRewrote": hook_rewrote }))
    }

    async fn tool_cp(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let from = str_arg(args, "from")?;
        let to = str_arg(args, "to")?;
        let change_reason = opt_str(args, "changeReason");

        let (mirror, git) = self.project_handles(script_id).await?;
        let manager = self.git_manager(mirror, git, script_id);
        let strategy = CopyStrategy::new(from.to_string(), to.to_string());
        let report = manager.apply_with_reason(&strategy, "cp", change_reason).await?;
        Ok(report_to_json(&report))
    }

    async fn tool_mv(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let from = str_arg(args, "from")?;
        let to = str_arg(args, "to")?;
        let change_reason = opt_str(args, "changeReason");

        let (mirror, git) = self.project_handles(script_id).await?;
        let manager = self.git_manager(mirror, git, script_id);
        let strategy = MoveStrategy::new(from.to_string(), to.to_string());
        let report = manager.apply_with_reason(&strategy, "mv", change_reason).await?;
        Ok(report_to_json(&report))
    }

    async fn tool_rm(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let path = str_arg(args, "path")?;
        let change_reason = opt_str(args, "changeReason");

        let (mirror, git) = self.project_handles(script_id).await?;
        let manager = self.git_manager(mirror, git, script_id);
        let strategy = DeleteStrategy::new(path.to_string());
        let report = manager.apply_with_reason(&strategy, "rm", change_reason).await?;
        Ok(report_to_json(&report))
    }

    async fn tool_ls(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let prefix = opt_str(args, "path");
        let want_checksums = opt_bool(args, "checksums", false);

        let (mirror, _git) = self.project_handles(script_id).await?;
        let mut entries = Vec::new();
        for rel_path in mirror.list().await? {
            if let Some(p) = prefix {
                if !rel_path.starts_with(p) {
                    continue;
                }
            }
            let meta = mirror.get_metadata(&rel_path).await;
            let mut entry = json!({
                "path": rel_path,
                "updateTime": meta.as_ref().map(|m| m.update_time.to_rfc3339()),
                "fileType": meta.as_ref().map(|m| m.file_type.as_str()),
            });
            if want_checksums {
                let bytes = mirror.read(&rel_path).await?;
                entry["checksums"] = serde_json::to_value(hashing::checksums(&bytes))?;
            }
            entries.push(entry);
        }
        Ok(json!({ "files": entries }))
    }

    async fn tool_file_status(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let paths = str_array(args, "paths");
        let hash_types = str_array(args, "hashTypes");

        let (mirror, _git) = self.project_handles(script_id).await?;
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let exists = mirror.exists(&path).await;
            let meta = mirror.get_metadata(&path).await;
            let mut entry = json!({
                "path": path,
                "exists": exists,
                "updateTime": meta.as_ref().map(|m| m.update_time.to_rfc3339()),
            });
            if exists && !hash_types.is_empty() {
                let bytes = mirror.read(&path).await?;
                let sums = hashing::checksums(&bytes);
                let mut by_type = serde_json::Map::new();
                for ty in &hash_types {
                    match ty.as_str() {
                        "git-sha1" => {
                            by_type.insert("gitSha1".to_string(), json!(sums.git_sha1));
                        }
                        "sha256" => {
                            by_type.insert("sha256".to_string(), json!(sums.sha256));
                        }
                        "md5" => {
                            by_type.insert("md5".to_string(), json!(sums.md5));
                        }
                        _ => {}
                    }
                }
                entry["checksums"] = Value::Object(by_type);
            }
            files.push(entry);
        }
        Ok(json!({ "files": files }))
    }

    async fn tool_rsync(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let direction = match str_arg(args, "direction")? {
            "pull" => Direction::Pull,
            "push" => Direction::Push,
            other => return Err(anyhow!(CoreError::Validation(format!("unknown rsync direction '{other}'")))),
        };
        let direction_name = if direction == Direction::Pull { "pull" } else { "push" };
        let dry_run = opt_bool(args, "dryRun", false);
        let confirm_deletions = opt_bool(args, "confirmDeletions", false);
        let include_globs = str_array(args, "includeGlobs");
        let exclude_globs = str_array(args, "excludeGlobs");

        let (mirror, _git) = self.project_handles(script_id).await?;
        let globs = IncludeExcludeGlobs::new(&include_globs, &exclude_globs)?;
        let engine = RsyncEngine::new(&mirror, self.gas_api.as_ref());
        let project_root = mirror.root().to_path_buf();

        let (plan, applied) = self
            .lock_manager
            .with_lock(&project_root, "rsync", direction_name, || async {
                let plan = engine.plan(script_id, direction, &globs).await?;
                if dry_run {
                    Ok((plan, Vec::new()))
                } else {
                    let applied = engine.apply(script_id, direction, &plan, confirm_deletions).await?;
                    Ok((plan, applied))
                }
            })
            .await?;

        Ok(json!({ "plan": plan, "applied": applied, "dryRun": dry_run }))
    }

    async fn tool_exec(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let js_statement = str_arg(args, "jsStatement")?;
        let result = self.gas_api.execute(script_id, js_statement).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn tool_deploy(&self, args: &Value) -> Result<Value> {
        let script_id = str_arg(args, "scriptId")?;
        let operation = str_arg(args, "operation")?;
        let manager = DeploymentManager::new(self.gas_api.as_ref(), &self.deployment_priors);

        match operation {
            "status" => Ok(json!({ "environments": manager.status(script_id).await? })),
            "promote" => {
                let env = parse_environment(opt_str(args, "environment"))?;
                let description = opt_str(args, "description").unwrap_or("");
                Ok(serde_json::to_value(manager.promote(script_id, env, description).await?)?)
            }
            "rollback" => {
                let env = parse_environment(opt_str(args, "environment"))?;
                let to_version = args.get("toVersion").and_then(|v| v.as_i64());
                Ok(serde_json::to_value(manager.rollback(script_id, env, to_version).await?)?)
            }
            "reset" => Ok(json!({ "environments": manager.reset(script_id).await? })),
            other => Err(anyhow!(CoreError::Validation(format!("unknown deploy operation '{other}'")))),
        }
    }
}

fn parse_environment(raw: Option<&str>) -> Result<Environment> {
    match raw {
        Some("staging") => Ok(Environment::Staging),
        Some("prod") => Ok(Environment::Prod),
        Some(other) => Err(anyhow!(CoreError::Validation(format!("unknown deploy environment '{other}'")))),
        None => Err(anyhow!(CoreError::Validation(
            "'environment' is required for this operation".to_string()
        ))),
    }
}

/// Static write analyzer (spec §8 testable property 10): a SERVER_JS file
/// written with `moduleOptions.loadNow` false or omitted, whose content
/// defines one of the reserved trigger entry points at the top level, gets
/// a critical warning — lazy modules never run until `require`d, so a
/// trigger defined inside one is silently dead unless the author also
/// wires it through `__events__`.
fn write_warnings(path: &str, content: &str, module_options: Option<&ModuleOptions>) -> Vec<Value> {
    let (_, file_type) = match PathResolver::local_to_gas(path) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    if file_type != GasFileType::ServerJs {
        return Vec::new();
    }
    let load_now = module_options.and_then(|o| o.load_now).unwrap_or(false);
    if load_now {
        return Vec::new();
    }
    analyzer::detect_trigger_handlers(content)
        .into_iter()
        .map(|trigger| {
            json!({
                "severity": "critical",
                "kind": "lazy-trigger-handler",
                "message": format!(
                    "'{trigger}' is defined here but moduleOptions.loadNow is not true, so this module only runs on require(); '{trigger}' will not fire unless exported through __events__ or the module is loaded eagerly."
                ),
            })
        })
        .collect()
}

fn report_to_json(report: &ApplyReport) -> Value {
    json!({
        "changedPaths": report.changed_paths,
        "commitSha": report.commit_sha,
        "hookRewrote": report.hook_rewrote,
    })
}

#[async_trait]
impl McpTransportHandler for GasMcpServer {
    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        match method {
            "tools/list" => Ok(handle_tools_list()),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| McpError::new(MCP_INVALID_PARAMS, "missing 'name'"))?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                match self.dispatch_tool(name, arguments).await {
                    Ok(value) => Ok(json!({
                        "content": [{ "type": "text", "text": value.to_string() }],
                        "isError": false,
                    })),
                    Err(err) => {
                        debug!(tool = name, "tool call failed: {err:#}");
                        Ok(json!({
                            "content": [{ "type": "text", "text": errors::classify(&err).to_string() }],
                            "isError": true,
                        }))
                    }
                }
            }
            other => Err(McpError::new(MCP_METHOD_NOT_FOUND, format!("unknown method '{other}'"))),
        }
    }

    async fn handle_notification(&self, method: &str, _params: Value) {
        debug!(method, "ignoring MCP notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_trigger_handler_produces_critical_warning() {
        let warnings = write_warnings("Code.js", "function doGet(e) { return 1; }", None);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0]["severity"], "critical");
    }

    #[test]
    fn eager_module_suppresses_the_warning() {
        let opts = ModuleOptions { load_now: Some(true), ..Default::default() };
        let warnings = write_warnings("Code.js", "function doGet(e) { return 1; }", Some(&opts));
        assert!(warnings.is_empty());
    }

    #[test]
    fn comment_only_mentions_are_not_flagged() {
        let warnings = write_warnings("Code.js", "// function doGet(e) {}\nfunction helper() {}", None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn non_server_js_files_are_never_analyzed() {
        let warnings = write_warnings("Page.html", "function doGet(e) {}", None);
        assert!(warnings.is_empty());
    }
}
