//! Read-only status inspection via `git2`, adapted from the teacher's
//! `repo::git` module. Kept separate from [`super::GitHost`]'s
//! hook-triggering write path: `git2` never invokes hooks, which is exactly
//! why it's safe to use here and unsafe to use for commits.

use anyhow::Result;
use chrono::Utc;
use git2::{Repository, StatusOptions};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub repo_path: String,
    pub branch: String,
    pub files: Vec<FileStatusEntry>,
    pub has_conflicts: bool,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusEntry {
    pub path: String,
    pub status: FileStatusKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatusKind {
    Modified,
    Staged,
    Deleted,
    Untracked,
    Conflict,
}

pub fn read_status(repo_root: &std::path::Path) -> Result<RepoStatus> {
    let repo = Repository::open(repo_root)?;
    let repo_path = repo
        .workdir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let branch = current_branch(&repo).unwrap_or_else(|_| "HEAD".to_string());

    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .include_ignored(false)
        .recurse_untracked_dirs(true);

    let statuses = repo.statuses(Some(&mut opts))?;
    let mut files = Vec::new();
    let mut has_conflicts = false;

    for entry in statuses.iter() {
        let path = entry.path().unwrap_or("").to_string();
        let s = entry.status();

        if s.is_conflicted() {
            has_conflicts = true;
            files.push(FileStatusEntry {
                path,
                status: FileStatusKind::Conflict,
            });
        } else if s.is_wt_new() {
            files.push(FileStatusEntry {
                path,
                status: FileStatusKind::Untracked,
            });
        } else if s.is_index_new() || s.is_index_modified() || s.is_index_renamed() {
            files.push(FileStatusEntry {
                path,
                status: FileStatusKind::Staged,
            });
        } else if s.is_wt_modified() || s.is_wt_renamed() {
            files.push(FileStatusEntry {
                path,
                status: FileStatusKind::Modified,
            });
        } else if s.is_wt_deleted() || s.is_index_deleted() {
            files.push(FileStatusEntry {
                path,
                status: FileStatusKind::Deleted,
            });
        }
    }

    Ok(RepoStatus {
        repo_path,
        branch,
        files,
        has_conflicts,
        last_updated: Utc::now().to_rfc3339(),
    })
}

fn current_branch(repo: &Repository) -> Result<String> {
    let head = repo.head()?;
    if head.is_branch() {
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    } else {
        let oid = head.peel_to_commit()?.id();
        Ok(format!("{:.7}", oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &std::path::Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "gasmcpd").unwrap();
            config.set_str("user.email", "gasmcpd@localhost").unwrap();
        }
        let sig = repo.signature().unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        repo
    }

    #[test]
    fn untracked_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.js"), b"x").unwrap();

        let status = read_status(dir.path()).unwrap();
        assert!(status.files.iter().any(|f| f.path == "a.js" && f.status == FileStatusKind::Untracked));
        assert!(!status.has_conflicts);
    }

    #[test]
    fn clean_repo_has_no_files() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let status = read_status(dir.path()).unwrap();
        assert!(status.files.is_empty());
    }
}
