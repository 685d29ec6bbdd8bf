//! LockManager (spec §4.F) — one exclusive writer per project at a time,
//! enforced with a `.lock` file under the project root rather than an
//! in-process mutex, so a crashed process's lock can be detected and
//! recovered by the next one to touch that project.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::errors::CoreError;

const LOCK_FILE_NAME: &str = ".mcp-lock.json";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub started_at_ms: i64,
    pub tool: String,
    pub operation: String,
}

pub struct LockManager {
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn lock_path(project_root: &Path) -> PathBuf {
        project_root.join(LOCK_FILE_NAME)
    }

    /// Acquire the project's lock, run `f`, then release it — even if `f`
    /// fails. Blocks (async-yielding) up to `self.timeout` waiting for a
    /// live holder to finish; a dead holder's stale lock is reclaimed
    /// immediately.
    pub async fn with_lock<T, F, Fut>(
        &self,
        project_root: &Path,
        tool: &str,
        operation: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let guard = self.acquire(project_root, tool, operation).await?;
        let result = f().await;
        drop(guard);
        result
    }

    async fn acquire(&self, project_root: &Path, tool: &str, operation: &str) -> Result<LockGuard> {
        let path = Self::lock_path(project_root);
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.try_create(&path, tool, operation).await {
                Ok(()) => {
                    return Ok(LockGuard { path });
                }
                Err(existing) => {
                    if is_stale(&existing, self.timeout) {
                        info!(
                            holder_pid = existing.pid,
                            "reclaiming stale lock left by a dead or expired holder"
                        );
                        tokio::fs::remove_file(&path).await.ok();
                        continue;
                    }
                    if Instant::now() >= deadline {
                        let held_for = Duration::from_millis(
                            (now_ms() - existing.started_at_ms).max(0) as u64,
                        );
                        return Err(anyhow::anyhow!(CoreError::LockTimeout {
                            holder_pid: existing.pid as i64,
                            holder_tool: existing.tool,
                            holder_operation: existing.operation,
                            held_for_secs: held_for.as_secs(),
                        }));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Atomically create the lock file if absent; returns the existing
    /// holder's metadata if one is already there.
    async fn try_create(&self, path: &Path, tool: &str, operation: &str) -> Result<(), LockMeta> {
        let meta = LockMeta {
            pid: std::process::id(),
            started_at_ms: now_ms(),
            tool: tool.to_string(),
            operation: operation.to_string(),
        };
        let json = serde_json::to_string(&meta).expect("LockMeta always serializes");

        use std::io::Write;
        let mut open_opts = std::fs::OpenOptions::new();
        open_opts.write(true).create_new(true);
        match open_opts.open(path) {
            Ok(mut file) => {
                let _ = file.write_all(json.as_bytes());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = read_lock_meta(path).unwrap_or(LockMeta {
                    pid: 0,
                    started_at_ms: now_ms(),
                    tool: "unknown".to_string(),
                    operation: "unknown".to_string(),
                });
                Err(existing)
            }
            Err(e) => {
                warn!("failed to create lock file at {}: {e}", path.display());
                Err(LockMeta {
                    pid: 0,
                    started_at_ms: now_ms(),
                    tool: "unknown".to_string(),
                    operation: "unknown".to_string(),
                })
            }
        }
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_lock_meta(path: &Path) -> Option<LockMeta> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// A lock is stale if its PID is no longer a live process, or it has been
/// held longer than `timeout` regardless of liveness (a live process that
/// has wedged is indistinguishable from one making legitimate slow
/// progress past the configured ceiling, so the timeout wins).
fn is_stale(meta: &LockMeta, timeout: Duration) -> bool {
    if meta.pid == 0 {
        return true;
    }
    let age_ms = now_ms() - meta.started_at_ms;
    if age_ms > timeout.as_millis() as i64 {
        return true;
    }
    !pid_is_alive(meta.pid)
}

fn pid_is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    sys.process(Pid::from_u32(pid)).is_some()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(Duration::from_secs(1));
        let result = manager
            .with_lock(dir.path(), "write", "edit", || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert!(!LockManager::lock_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn lock_file_is_removed_even_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(Duration::from_secs(1));
        let result: Result<()> = manager
            .with_lock(dir.path(), "write", "edit", || async {
                Err(anyhow::anyhow!("boom"))
            })
            .await;
        assert!(result.is_err());
        assert!(!LockManager::lock_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn concurrent_writers_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let manager = std::sync::Arc::new(LockManager::new(Duration::from_secs(5)));
        let order = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let manager = manager.clone();
            let order = order.clone();
            let root = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                manager
                    .with_lock(&root, "write", "edit", || async {
                        order.lock().await.push(i);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, anyhow::Error>(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn dead_pid_lock_is_reclaimed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let stale = LockMeta {
            pid: 999_999, // exceedingly unlikely to be a live pid
            started_at_ms: now_ms(),
            tool: "write".to_string(),
            operation: "edit".to_string(),
        };
        std::fs::write(
            LockManager::lock_path(dir.path()),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let manager = LockManager::new(Duration::from_secs(30));
        let result = manager
            .with_lock(dir.path(), "write", "edit", || async { Ok(1) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn live_holder_older_than_timeout_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let holder = LockMeta {
            pid: std::process::id(),
            started_at_ms: now_ms() - 10_000,
            tool: "rsync".to_string(),
            operation: "push".to_string(),
        };
        std::fs::write(
            LockManager::lock_path(dir.path()),
            serde_json::to_string(&holder).unwrap(),
        )
        .unwrap();

        let manager = LockManager::new(Duration::from_millis(5_000));
        let result: Result<()> = manager
            .with_lock(dir.path(), "write", "edit", || async { Ok(()) })
            .await;
        // Our own pid is alive, so the pre-existing lock is live but the
        // 10s-old timestamp already exceeds the 5s timeout — reclaimed.
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn timeout_against_a_genuinely_live_holder_surfaces_lock_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let manager = std::sync::Arc::new(LockManager::new(Duration::from_secs(30)));
        let holder_manager = manager.clone();
        let holder_root = root.clone();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let holder = tokio::spawn(async move {
            holder_manager
                .with_lock(&holder_root, "write", "edit", || async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok::<_, anyhow::Error>(())
                })
                .await
        });
        started_rx.await.unwrap();

        let waiter = LockManager::new(Duration::from_millis(50));
        let result: Result<()> = waiter
            .with_lock(&root, "write", "edit", || async { Ok(()) })
            .await;
        let err = result.unwrap_err();
        let core = err.downcast_ref::<CoreError>().expect("LockTimeout variant");
        assert!(matches!(core, CoreError::LockTimeout { .. }));

        holder.await.unwrap().unwrap();
    }
}
