//! RsyncEngine (spec §4.I) — stateless bidirectional diff-and-apply between
//! the local mirror and the remote project. Glob include/exclude filtering
//! follows the `IncludeExcludeGlobs` pattern used elsewhere in the corpus
//! for the same include/exclude-precedence decision.

use std::collections::HashMap;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;

use crate::gas_api::{GasApi, GasFile};
use crate::local_mirror::LocalMirror;
use crate::module_wrapper::ModuleWrapper;
use crate::path_resolver::{GasFileType, PathResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    Allowed,
    DeniedByExclude,
    DeniedByMissingInclude,
}

impl MatchDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone)]
pub struct IncludeExcludeGlobs {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl IncludeExcludeGlobs {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn decide(&self, candidate: &str) -> MatchDecision {
        let path = std::path::Path::new(candidate);
        if self.exclude.as_ref().is_some_and(|set| set.is_match(path)) {
            return MatchDecision::DeniedByExclude;
        }
        if self.include.as_ref().is_some_and(|set| !set.is_match(path)) {
            return MatchDecision::DeniedByMissingInclude;
        }
        MatchDecision::Allowed
    }
}

/// The remote file's content in the same canonical form the local mirror
/// stores (spec §6: SERVER_JS is wrapped on the wire, unwrapped on disk;
/// HTML/JSON pass through untouched).
fn unwrapped_remote_bytes(remote_file: &GasFile) -> Vec<u8> {
    if remote_file.file_type == GasFileType::ServerJs {
        ModuleWrapper::unwrap(&remote_file.source).into_bytes()
    } else {
        remote_file.source.clone().into_bytes()
    }
}

/// `literal_separator(true)` so a single `*` never crosses a `/`, while `**`
/// still does (spec §4.I "Glob matching is path-segment-aware ... `*` does
/// not cross `/`, `**` does").
fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        let glob = GlobBuilder::new(p)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid glob: {p}"))?;
        builder.add(glob);
    }
    Ok(Some(builder.build()?))
}

/// One entry in a computed plan: what would happen to a single path if the
/// plan were applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlannedChange {
    Create { path: String },
    Update { path: String },
    Delete { path: String },
}

impl PlannedChange {
    pub fn path(&self) -> &str {
        match self {
            PlannedChange::Create { path } | PlannedChange::Update { path } | PlannedChange::Delete { path } => path,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PlannedChange::Delete { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RsyncPlan {
    pub changes: Vec<PlannedChange>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote is canonical; local mirror is brought in line with it.
    Pull,
    /// Local mirror is canonical; remote is brought in line with it.
    Push,
}

pub struct RsyncEngine<'a> {
    pub mirror: &'a LocalMirror,
    pub gas_api: &'a dyn GasApi,
}

impl<'a> RsyncEngine<'a> {
    pub fn new(mirror: &'a LocalMirror, gas_api: &'a dyn GasApi) -> Self {
        Self { mirror, gas_api }
    }

    /// Compute (never apply) the set of changes a sync in `direction` would
    /// make, filtered by `globs`. Pure with respect to both sides: reads
    /// local and remote state but writes nothing.
    pub async fn plan(
        &self,
        script_id: &str,
        direction: Direction,
        globs: &IncludeExcludeGlobs,
    ) -> Result<RsyncPlan> {
        let remote_files = self.gas_api.list_content(script_id).await?;
        let mut remote_by_local: HashMap<String, &GasFile> = HashMap::new();
        for f in &remote_files {
            if let Ok(local_path) = PathResolver::gas_to_local(&f.name, f.file_type) {
                remote_by_local.insert(local_path, f);
            }
        }
        let local_paths = self.mirror.list().await?;

        let mut changes = Vec::new();
        match direction {
            Direction::Pull => {
                for (local_path, remote_file) in &remote_by_local {
                    if globs.decide(local_path) != MatchDecision::Allowed {
                        continue;
                    }
                    // Local mirror is always the unwrapped, canonical form
                    // (spec §6 "wire format for content") — compare against
                    // the remote's unwrapped body, never its raw wrapped
                    // bytes, or every SERVER_JS file would show as modified.
                    let remote_local_form = unwrapped_remote_bytes(remote_file);
                    let exists = self.mirror.exists(local_path).await;
                    let differs = if exists {
                        self.mirror.read(local_path).await? != remote_local_form
                    } else {
                        true
                    };
                    if differs {
                        if exists {
                            changes.push(PlannedChange::Update { path: local_path.clone() });
                        } else {
                            changes.push(PlannedChange::Create { path: local_path.clone() });
                        }
                    }
                }
                for local_path in &local_paths {
                    if globs.decide(local_path) != MatchDecision::Allowed {
                        continue;
                    }
                    if !remote_by_local.contains_key(local_path) {
                        changes.push(PlannedChange::Delete { path: local_path.clone() });
                    }
                }
            }
            Direction::Push => {
                for local_path in &local_paths {
                    if globs.decide(local_path) != MatchDecision::Allowed {
                        continue;
                    }
                    let local_bytes = self.mirror.read(local_path).await?;
                    match remote_by_local.get(local_path) {
                        Some(remote_file) => {
                            if unwrapped_remote_bytes(remote_file) != local_bytes {
                                changes.push(PlannedChange::Update { path: local_path.clone() });
                            }
                        }
                        None => changes.push(PlannedChange::Create { path: local_path.clone() }),
                    }
                }
                for local_path in remote_by_local.keys() {
                    if globs.decide(local_path) != MatchDecision::Allowed {
                        continue;
                    }
                    if !local_paths.contains(local_path) {
                        changes.push(PlannedChange::Delete { path: local_path.clone() });
                    }
                }
            }
        }

        changes.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(RsyncPlan { changes, dry_run: true })
    }

    /// Apply a previously computed plan. Deletions require explicit
    /// confirmation (`allow_deletions`); a bootstrap pull — the local
    /// mirror starts empty — always blocks deletions regardless of the
    /// flag, since an empty mirror diffed against a populated remote would
    /// otherwise "delete" the caller's very first pull (spec §4.I "bootstrap
    /// pull always blocks deletions").
    pub async fn apply(
        &self,
        script_id: &str,
        direction: Direction,
        plan: &RsyncPlan,
        allow_deletions: bool,
    ) -> Result<Vec<PlannedChange>> {
        let is_bootstrap = direction == Direction::Pull && self.mirror.list().await?.is_empty();
        let deletions_blocked = is_bootstrap || !allow_deletions;

        let mut applied = Vec::new();
        for change in &plan.changes {
            if change.is_delete() && deletions_blocked {
                continue;
            }
            match (direction, change) {
                (Direction::Pull, PlannedChange::Create { path } | PlannedChange::Update { path }) => {
                    let (name, file_type) = PathResolver::local_to_gas(path)?;
                    if let Some(remote_file) = self.gas_api.get_file(script_id, &name).await? {
                        self.mirror.write(path, &unwrapped_remote_bytes(&remote_file)).await?;
                        self.mirror
                            .set_metadata(path, remote_file.update_time, file_type)
                            .await?;
                    }
                }
                (Direction::Pull, PlannedChange::Delete { path }) => {
                    self.mirror.delete(path).await?;
                }
                (Direction::Push, PlannedChange::Create { path } | PlannedChange::Update { path }) => {
                    let (name, file_type) = PathResolver::local_to_gas(path)?;
                    let bytes = self.mirror.read(path).await?;
                    let body = String::from_utf8_lossy(&bytes).to_string();
                    let source = if file_type == GasFileType::ServerJs {
                        let mut opts = match self.gas_api.get_file(script_id, &name).await? {
                            Some(existing) => ModuleWrapper::extract_options(&existing.source),
                            None => Default::default(),
                        };
                        opts.explicit_name.get_or_insert_with(|| name.clone());
                        ModuleWrapper::wrap(&body, &opts)
                    } else {
                        body
                    };
                    self.gas_api.update_file(script_id, &name, file_type, &source).await?;
                }
                (Direction::Push, PlannedChange::Delete { path }) => {
                    let (name, _) = PathResolver::local_to_gas(path)?;
                    self.gas_api.delete_file(script_id, &name).await?;
                }
            }
            applied.push(change.clone());
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas_api::fake::FakeGasApi;
    use crate::path_resolver::GasFileType;
    use chrono::Utc;

    fn no_globs() -> IncludeExcludeGlobs {
        IncludeExcludeGlobs::new(&[], &[]).unwrap()
    }

    #[tokio::test]
    async fn s4_bootstrap_pull_never_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        let api = FakeGasApi::new();
        api.seed(
            "s1",
            vec![GasFile {
                name: "Code".to_string(),
                file_type: GasFileType::ServerJs,
                source: "var x = 1;".to_string(),
                update_time: Utc::now(),
            }],
        );
        let engine = RsyncEngine::new(&mirror, &api);
        let plan = engine.plan("s1", Direction::Pull, &no_globs()).await.unwrap();
        assert!(plan.changes.iter().any(|c| matches!(c, PlannedChange::Create { .. })));

        // Even with allow_deletions: true, a bootstrap pull must not delete
        // anything — there is nothing extraneous to delete yet, by
        // definition, since local started empty.
        let applied = engine.apply("s1", Direction::Pull, &plan, true).await.unwrap();
        assert!(!applied.iter().any(|c| c.is_delete()));
        assert!(mirror.exists("Code.js").await);
    }

    #[tokio::test]
    async fn dryrun_plan_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        let api = FakeGasApi::new();
        api.seed(
            "s1",
            vec![GasFile {
                name: "Code".to_string(),
                file_type: GasFileType::ServerJs,
                source: "var x = 1;".to_string(),
                update_time: Utc::now(),
            }],
        );
        let engine = RsyncEngine::new(&mirror, &api);
        engine.plan("s1", Direction::Pull, &no_globs()).await.unwrap();
        assert!(!mirror.exists("Code.js").await);
    }

    #[tokio::test]
    async fn deletions_require_explicit_confirmation_on_non_bootstrap_pull() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("Stale.js", b"old").await.unwrap();
        let api = FakeGasApi::new(); // remote has nothing
        let engine = RsyncEngine::new(&mirror, &api);
        let plan = engine.plan("s1", Direction::Pull, &no_globs()).await.unwrap();
        assert!(plan.changes.iter().any(|c| c.is_delete()));

        let applied = engine.apply("s1", Direction::Pull, &plan, false).await.unwrap();
        assert!(applied.is_empty());
        assert!(mirror.exists("Stale.js").await);

        let applied = engine.apply("s1", Direction::Pull, &plan, true).await.unwrap();
        assert!(applied.iter().any(|c| c.is_delete()));
        assert!(!mirror.exists("Stale.js").await);
    }

    #[tokio::test]
    async fn glob_exclude_filters_out_matching_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        let api = FakeGasApi::new();
        api.seed(
            "s1",
            vec![GasFile {
                name: "secrets".to_string(),
                file_type: GasFileType::Json,
                source: "{}".to_string(),
                update_time: Utc::now(),
            }],
        );
        let globs = IncludeExcludeGlobs::new(&[], &["secrets*".to_string()]).unwrap();
        let engine = RsyncEngine::new(&mirror, &api);
        let plan = engine.plan("s1", Direction::Pull, &globs).await.unwrap();
        assert!(plan.changes.is_empty());
    }
}
