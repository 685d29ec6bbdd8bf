//! `<repos-root>/gasmcp.toml` loader — all fields optional overrides.
//!
//! Priority: CLI flag / env var > TOML > built-in default, the same order
//! the teacher daemon resolves `DaemonConfig`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
const DEFAULT_LOG: &str = "info";

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    repos_root: Option<PathBuf>,
    log: Option<String>,
    lock_timeout_secs: Option<u64>,
    similarity_threshold: Option<f64>,
    hooks_enabled: Option<bool>,
}

fn load_toml(repos_root: &Path) -> Option<TomlConfig> {
    let path = repos_root.join("gasmcp.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse gasmcp.toml — using defaults");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct GasMcpConfig {
    /// Root directory under which every `project-<scriptId>/` mirror lives.
    pub repos_root: PathBuf,
    pub log: String,
    /// LockManager acquisition timeout (spec §5, default 30s).
    pub lock_timeout_secs: u64,
    /// Aider default similarity threshold (spec §4.H, default 0.8).
    pub similarity_threshold: f64,
    /// Whether GitOperationManager invokes the pre-commit hook at all.
    pub hooks_enabled: bool,
}

impl GasMcpConfig {
    /// Resolve from an explicit `repos_root` plus whatever `gasmcp.toml` it
    /// contains, falling back to built-in defaults for anything unset.
    pub fn load(repos_root: PathBuf, log_override: Option<String>) -> Self {
        let toml_cfg = load_toml(&repos_root).unwrap_or_default();

        Self {
            log: log_override
                .or(toml_cfg.log)
                .unwrap_or_else(|| DEFAULT_LOG.to_string()),
            lock_timeout_secs: toml_cfg.lock_timeout_secs.unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
            similarity_threshold: toml_cfg
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            hooks_enabled: toml_cfg.hooks_enabled.unwrap_or(true),
            repos_root: toml_cfg.repos_root.unwrap_or(repos_root),
        }
    }

    /// Path to the local mirror directory for a given scriptId (spec §6
    /// persisted state layout).
    pub fn project_dir(&self, script_id: &str) -> PathBuf {
        self.repos_root.join(format!("project-{script_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_toml_present() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GasMcpConfig::load(dir.path().to_path_buf(), None);
        assert_eq!(cfg.lock_timeout_secs, DEFAULT_LOCK_TIMEOUT_SECS);
        assert_eq!(cfg.similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(cfg.log, DEFAULT_LOG);
        assert!(cfg.hooks_enabled);
    }

    #[test]
    fn log_override_wins_over_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gasmcp.toml"), "log = \"debug\"\n").unwrap();
        let cfg = GasMcpConfig::load(dir.path().to_path_buf(), Some("trace".to_string()));
        assert_eq!(cfg.log, "trace");
    }

    #[test]
    fn toml_values_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gasmcp.toml"),
            "lock_timeout_secs = 60\nsimilarity_threshold = 0.9\nhooks_enabled = false\n",
        )
        .unwrap();
        let cfg = GasMcpConfig::load(dir.path().to_path_buf(), None);
        assert_eq!(cfg.lock_timeout_secs, 60);
        assert_eq!(cfg.similarity_threshold, 0.9);
        assert!(!cfg.hooks_enabled);
    }

    #[test]
    fn project_dir_naming() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GasMcpConfig::load(dir.path().to_path_buf(), None);
        let p = cfg.project_dir("abc123");
        assert_eq!(p.file_name().unwrap(), "project-abc123");
    }
}
