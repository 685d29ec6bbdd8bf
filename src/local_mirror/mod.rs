//! LocalMirror (spec §4.D) — filesystem-backed cache for one project at
//! `<repos-root>/project-<scriptId>/`, with xattr-based metadata caching and
//! a fast-path read that skips the remote fetch when the cache is known
//! fresh.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path_resolver::GasFileType;

const XATTR_UPDATE_TIME: &str = "user.gas.updateTime";
const XATTR_FILE_TYPE: &str = "user.gas.fileType";
const SIDECAR_NAME: &str = ".gas-meta.json";

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMeta {
    pub update_time: DateTime<Utc>,
    pub file_type: GasFileType,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SidecarFile {
    // Keyed by relative path, one sidecar per directory (spec §9: "Where
    // xattr is unavailable, keep a sidecar .gas-meta.json per directory").
    entries: HashMap<String, SidecarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarEntry {
    update_time: String,
    file_type: String,
}

pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(project_root: PathBuf) -> Self {
        Self { root: project_root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Atomic-ish write: write-to-temp in the same directory, then rename.
    /// Tracks the file in the mirror ledger (creates the parent directory
    /// and writes the bytes) *before* any mtime/xattr adjustment, so a
    /// failed metadata write still leaves the file trackable (spec §9).
    pub async fn write(&self, rel_path: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.abs(rel_path);
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow::anyhow!("'{rel_path}' has no parent directory"))?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating parent directory for '{rel_path}'"))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temp file for '{rel_path}'"))?;
        {
            use std::io::Write;
            tmp.write_all(bytes)
                .with_context(|| format!("writing temp file for '{rel_path}'"))?;
            tmp.flush()?;
        }
        tmp.persist(&dest)
            .map_err(|e| anyhow::anyhow!("renaming temp file into place for '{rel_path}': {e}"))?;
        Ok(())
    }

    pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.abs(rel_path))
            .await
            .with_context(|| format!("reading '{rel_path}' from local mirror"))
    }

    pub async fn read_to_string(&self, rel_path: &str) -> Result<String> {
        let bytes = self.read(rel_path).await?;
        String::from_utf8(bytes).context("mirror file is not valid UTF-8")
    }

    pub async fn exists(&self, rel_path: &str) -> bool {
        tokio::fs::metadata(self.abs(rel_path)).await.is_ok()
    }

    pub async fn delete(&self, rel_path: &str) -> Result<()> {
        let path = self.abs(rel_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context(format!("deleting '{rel_path}'")),
        }
        self.clear_metadata(rel_path).await.ok();
        Ok(())
    }

    /// List every tracked file under the mirror root, relative to it, in
    /// lexical order. Skips `.git` and the sidecar metadata files.
    pub async fn list(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_blocking(&root))
            .await
            .context("directory walk task panicked")?
    }

    /// Write `gas.updateTime`/`gas.fileType` metadata for a file, via xattr
    /// if supported, else a per-directory sidecar JSON file.
    pub async fn set_metadata(
        &self,
        rel_path: &str,
        update_time: DateTime<Utc>,
        file_type: GasFileType,
    ) -> Result<()> {
        let abs = self.abs(rel_path);
        let update_time_str = update_time.to_rfc3339();
        let file_type_str = file_type.as_str().to_string();

        let xattr_ok = xattr::set(&abs, XATTR_UPDATE_TIME, update_time_str.as_bytes()).is_ok()
            && xattr::set(&abs, XATTR_FILE_TYPE, file_type_str.as_bytes()).is_ok();
        if xattr_ok {
            return Ok(());
        }

        self.set_sidecar_metadata(rel_path, &update_time_str, &file_type_str)
            .await
    }

    /// Read back cached metadata, preferring xattr, falling back to the
    /// sidecar. Returns `None` if neither is present (cold file).
    pub async fn get_metadata(&self, rel_path: &str) -> Option<CachedMeta> {
        let abs = self.abs(rel_path);
        if let (Ok(Some(ut)), Ok(Some(ft))) = (
            xattr::get(&abs, XATTR_UPDATE_TIME),
            xattr::get(&abs, XATTR_FILE_TYPE),
        ) {
            if let Some(meta) = parse_meta(&ut, &ft) {
                return Some(meta);
            }
        }
        self.get_sidecar_metadata(rel_path).await
    }

    async fn clear_metadata(&self, rel_path: &str) -> Result<()> {
        let abs = self.abs(rel_path);
        xattr::remove(&abs, XATTR_UPDATE_TIME).ok();
        xattr::remove(&abs, XATTR_FILE_TYPE).ok();
        self.remove_sidecar_entry(rel_path).await
    }

    /// Fast-path read validity check (spec §3 "fast-path invariant"): the
    /// caller already knows the remote's current `updateTime`; if the
    /// cached value matches and the local file's mtime is at least as new,
    /// local bytes are canonical and a remote fetch can be skipped.
    pub async fn is_fast_path_valid(&self, rel_path: &str, remote_update_time: DateTime<Utc>) -> bool {
        let Some(cached) = self.get_metadata(rel_path).await else {
            return false;
        };
        if cached.update_time != remote_update_time {
            return false;
        }
        let Ok(metadata) = tokio::fs::metadata(self.abs(rel_path)).await else {
            return false;
        };
        let Ok(mtime) = metadata.modified() else {
            return false;
        };
        let mtime: DateTime<Utc> = mtime.into();
        mtime >= cached.update_time
    }

    fn sidecar_path(dir: &Path) -> PathBuf {
        dir.join(SIDECAR_NAME)
    }

    async fn set_sidecar_metadata(&self, rel_path: &str, update_time: &str, file_type: &str) -> Result<()> {
        let abs = self.abs(rel_path);
        let dir = abs.parent().unwrap_or(&self.root);
        let sidecar_path = Self::sidecar_path(dir);
        let file_name = abs
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("'{rel_path}' has no file name"))?
            .to_string();

        let mut sidecar = read_sidecar(&sidecar_path).await;
        sidecar.entries.insert(
            file_name,
            SidecarEntry {
                update_time: update_time.to_string(),
                file_type: file_type.to_string(),
            },
        );
        write_sidecar(&sidecar_path, &sidecar).await
    }

    async fn get_sidecar_metadata(&self, rel_path: &str) -> Option<CachedMeta> {
        let abs = self.abs(rel_path);
        let dir = abs.parent().unwrap_or(&self.root);
        let sidecar_path = Self::sidecar_path(dir);
        let file_name = abs.file_name()?.to_str()?;
        let sidecar = read_sidecar(&sidecar_path).await;
        let entry = sidecar.entries.get(file_name)?;
        parse_meta(entry.update_time.as_bytes(), entry.file_type.as_bytes())
    }

    async fn remove_sidecar_entry(&self, rel_path: &str) -> Result<()> {
        let abs = self.abs(rel_path);
        let dir = abs.parent().unwrap_or(&self.root).to_path_buf();
        let sidecar_path = Self::sidecar_path(&dir);
        let Some(file_name) = abs.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let mut sidecar = read_sidecar(&sidecar_path).await;
        if sidecar.entries.remove(file_name).is_some() {
            write_sidecar(&sidecar_path, &sidecar).await?;
        }
        Ok(())
    }
}

fn parse_meta(update_time: &[u8], file_type: &[u8]) -> Option<CachedMeta> {
    let update_time = std::str::from_utf8(update_time).ok()?;
    let update_time = DateTime::parse_from_rfc3339(update_time).ok()?.with_timezone(&Utc);
    let file_type = match std::str::from_utf8(file_type).ok()? {
        "SERVER_JS" => GasFileType::ServerJs,
        "HTML" => GasFileType::Html,
        "JSON" => GasFileType::Json,
        _ => return None,
    };
    Some(CachedMeta { update_time, file_type })
}

async fn read_sidecar(path: &Path) -> SidecarFile {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => SidecarFile::default(),
    }
}

async fn write_sidecar(path: &Path, sidecar: &SidecarFile) -> Result<()> {
    let json = serde_json::to_string_pretty(sidecar)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing sidecar metadata at '{}'", path.display()))
}

fn list_blocking(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    visit(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

fn visit(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name == ".git" || name == SIDECAR_NAME {
            continue;
        }
        if path.is_dir() {
            visit(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            out.push(rel);
        }
    }
    Ok(())
}
